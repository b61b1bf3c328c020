//! `aggregate`

use bson::{Bson, Document};

use super::{batch_size, explain, first_batch_reply, missing_field};
use crate::backend::Operation;
use crate::context::RequestContext;
use crate::document::{as_whole_number, OptionsExt};
use crate::error::{CommandError, ErrorCode, ErrorKind};
use crate::gateway::Gateway;
use crate::request::CommandRequest;

/// Validate an `aggregate` and describe it as backend work.
///
/// The target is `None` for collection-less pipelines (`aggregate: 1`).
pub fn plan(req: &CommandRequest) -> Result<(Option<String>, Operation), CommandError> {
    let collection = match req.command.get("aggregate") {
        Some(Bson::String(name)) if !name.is_empty() => Some(name.clone()),
        Some(value) if as_whole_number(value) == Some(1) => None,
        _ => {
            return Err(CommandError::failed_to_parse(
                "Invalid command format: the 'aggregate' field must specify a collection name or 1",
            )
            .with_field("aggregate"))
        }
    };

    let Some(pipeline) = req.command.opt_array("aggregate", "pipeline")? else {
        return Err(missing_field("aggregate", "pipeline"));
    };
    let stages = pipeline
        .iter()
        .map(|stage| match stage {
            Bson::Document(stage) => Ok(stage.clone()),
            _ => Err(CommandError::new(
                ErrorKind::FailedToParse,
                ErrorCode::TypeMismatch,
                "Each element of the 'pipeline' array must be an object",
            )
            .with_field("aggregate.pipeline")),
        })
        .collect::<Result<Vec<Document>, _>>()?;

    Ok((collection, Operation::Aggregate(stages)))
}

pub async fn handle(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let (collection, operation) = plan(req)?;

    if req.command.opt_bool("aggregate", "explain")?.unwrap_or(false) {
        return explain::explain_plan(gw, ctx, req, collection.as_deref(), &operation).await;
    }

    let Some(cursor) = req.command.opt_document("aggregate", "cursor")? else {
        return Err(CommandError::failed_to_parse(
            "The 'cursor' option is required, except for aggregate with the explain argument",
        )
        .with_field("aggregate.cursor"));
    };
    let batch_size = batch_size(gw, cursor, "aggregate.cursor")?;

    let stream = ctx
        .run(async {
            gw.backend()
                .execute(&req.database, collection.as_deref(), operation)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    let namespace = match &collection {
        Some(name) => format!("{}.{}", req.database, name),
        None => format!("{}.$cmd.aggregate", req.database),
    };
    first_batch_reply(gw, ctx, namespace, stream, batch_size, false).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Ingress;
    use bson::doc;

    fn request(raw: Document) -> CommandRequest {
        CommandRequest::from_raw(raw, None, Ingress::OpMsg).unwrap()
    }

    #[test]
    fn test_plan_targets() {
        let (collection, _) =
            plan(&request(doc! { "aggregate": "c", "$db": "test", "pipeline": [] })).unwrap();
        assert_eq!(collection.as_deref(), Some("c"));

        let (collection, _) =
            plan(&request(doc! { "aggregate": 1, "$db": "test", "pipeline": [] })).unwrap();
        assert_eq!(collection, None);
    }

    #[test]
    fn test_plan_rejects_bad_targets_and_stages() {
        let err = plan(&request(doc! { "aggregate": true, "$db": "test", "pipeline": [1] })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedToParse);

        let err = plan(&request(doc! { "aggregate": "c", "$db": "test", "pipeline": [1] })).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FailedToParse);
        assert_eq!(err.code(), ErrorCode::TypeMismatch);

        let err = plan(&request(doc! { "aggregate": "c", "$db": "test", "pipeline": {} })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);

        let err = plan(&request(doc! { "aggregate": "c", "$db": "test" })).unwrap_err();
        assert_eq!(err.code(), ErrorCode::Location(40414));
        assert_eq!(err.kind(), ErrorKind::FailedToParse);
    }
}
