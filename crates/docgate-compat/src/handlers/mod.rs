//! Command handlers
//!
//! Each handler validates its options, turns the command into backend work
//! and shapes a protocol-neutral result document. Unknown options are
//! ignored.

pub mod admin;
pub mod aggregate;
pub mod count;
pub mod cursor_ops;
pub mod ddl;
pub mod explain;
pub mod find;
pub mod write;

use bson::{doc, Bson, Document};

use crate::backend::DocumentStream;
use crate::context::RequestContext;
use crate::document::{type_name, OptionsExt};
use crate::error::{CommandError, ErrorCode, ErrorKind};
use crate::gateway::Gateway;
use crate::request::CommandRequest;

/// Collection named by the command key, which must be a non-empty string
pub(crate) fn collection_name(req: &CommandRequest) -> Result<&str, CommandError> {
    match req.command.get(&req.name) {
        Some(Bson::String(name)) if !name.is_empty() => Ok(name),
        Some(Bson::String(_)) => Err(CommandError::from_code(
            ErrorCode::InvalidNamespace,
            format!("Invalid namespace specified '{}.'", req.database),
        )),
        Some(other) => Err(CommandError::from_code(
            ErrorCode::InvalidNamespace,
            format!("collection name has invalid type {}", type_name(other)),
        )),
        None => Err(CommandError::failed_to_parse(format!("{} requires a collection", req.name))),
    }
}

/// A required option missing from the command
pub(crate) fn missing_field(command: &str, field: &str) -> CommandError {
    CommandError::new(
        ErrorKind::FailedToParse,
        ErrorCode::Location(40414),
        format!("BSON field '{}.{}' is missing but a required field", command, field),
    )
    .with_field(format!("{}.{}", command, field))
}

/// `batchSize` option, clamped to the configured maximum
pub(crate) fn batch_size(
    gw: &Gateway,
    options: &Document,
    command: &str,
) -> Result<Option<usize>, CommandError> {
    let max = gw.config().cursor.max_batch_size;
    Ok(options
        .opt_non_negative(command, "batchSize")?
        .map(|n| usize::try_from(n).unwrap_or(max).min(max)))
}

/// Open a cursor over `stream` and build the `{cursor: {firstBatch, id, ns}}`
/// reply.
///
/// The cursor is closed right away when the results fit in the first batch
/// or `single_batch` is set, and whenever fetching the first batch fails.
pub(crate) async fn first_batch_reply(
    gw: &Gateway,
    ctx: &RequestContext,
    namespace: String,
    stream: DocumentStream,
    batch_size: Option<usize>,
    single_batch: bool,
) -> Result<Document, CommandError> {
    let cursors = gw.cursors();
    let config = &gw.config().cursor;
    let id = cursors.create(stream, config.max_batch_size, namespace.clone(), ctx.session);

    let wanted = batch_size.unwrap_or(config.default_batch_size);
    let batch = match ctx.run(cursors.next_batch(id, Some(wanted))).await {
        Ok(batch) => batch,
        Err(err) => {
            cursors.kill(id);
            return Err(err);
        }
    };

    let cursor_id = if batch.exhausted {
        0
    } else if single_batch {
        cursors.kill(id);
        0
    } else {
        id
    };

    Ok(doc! {
        "cursor": {
            "firstBatch": batch.documents,
            "id": cursor_id,
            "ns": namespace,
        }
    })
}
