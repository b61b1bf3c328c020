//! `find`

use bson::Document;

use super::{batch_size, collection_name, first_batch_reply};
use crate::backend::{FindSpec, Operation};
use crate::context::RequestContext;
use crate::document::OptionsExt;
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::request::CommandRequest;

/// Validate a `find` and describe it as backend work
pub fn plan(req: &CommandRequest) -> Result<(String, Operation), CommandError> {
    let collection = collection_name(req)?;
    let cmd = &req.command;

    let spec = FindSpec {
        filter: cmd.opt_document("find", "filter")?.cloned().unwrap_or_default(),
        sort: cmd.opt_document("find", "sort")?.cloned(),
        projection: cmd.opt_document("find", "projection")?.cloned(),
        skip: cmd.opt_non_negative("find", "skip")?.map_or(0, i64::unsigned_abs),
        // A negative limit means the same count in a single batch
        limit: cmd.opt_whole_number("find", "limit")?.map_or(0, i64::unsigned_abs),
    };
    Ok((collection.to_string(), Operation::Find(spec)))
}

pub async fn handle(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let (collection, operation) = plan(req)?;
    let mut batch_size = batch_size(gw, &req.command, "find")?;
    let mut single_batch = req.command.opt_bool("find", "singleBatch")?.unwrap_or(false);
    if let Some(n) = req.command.opt_whole_number("find", "limit")?.filter(|n| *n < 0) {
        single_batch = true;
        let max = gw.config().cursor.max_batch_size;
        let wanted = usize::try_from(n.unsigned_abs()).unwrap_or(max).min(max);
        batch_size = Some(batch_size.map_or(wanted, |size| size.min(wanted)));
    }

    let stream = ctx
        .run(async {
            gw.backend()
                .execute(&req.database, Some(collection.as_str()), operation)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    let namespace = format!("{}.{}", req.database, collection);
    first_batch_reply(gw, ctx, namespace, stream, batch_size, single_batch).await
}
