//! `count`

use bson::{doc, Bson, Document};
use futures::StreamExt;

use super::collection_name;
use crate::backend::{CountSpec, Operation};
use crate::context::RequestContext;
use crate::document::OptionsExt;
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::request::CommandRequest;

/// Validate a `count` and describe it as backend work
pub fn plan(req: &CommandRequest) -> Result<(String, Operation), CommandError> {
    let collection = collection_name(req)?;
    let cmd = &req.command;

    let spec = CountSpec {
        query: cmd.opt_document("count", "query")?.cloned().unwrap_or_default(),
        skip: cmd.opt_non_negative("count", "skip")?.map_or(0, i64::unsigned_abs),
        limit: cmd.opt_non_negative("count", "limit")?.map_or(0, i64::unsigned_abs),
    };
    Ok((collection.to_string(), Operation::Count(spec)))
}

pub async fn handle(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let (collection, operation) = plan(req)?;

    let n = ctx
        .run(async {
            let mut stream = gw
                .backend()
                .execute(&req.database, Some(collection.as_str()), operation)
                .await?;
            match stream.next().await {
                Some(Ok(mut result)) => Ok(result.remove("n").unwrap_or(Bson::Int32(0))),
                Some(Err(err)) => Err(CommandError::from(err)),
                None => Ok(Bson::Int32(0)),
            }
        })
        .await?;

    Ok(doc! { "n": n })
}
