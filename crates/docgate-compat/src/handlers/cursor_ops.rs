//! `getMore` and `killCursors`

use bson::{doc, Bson, Document};

use super::{batch_size, missing_field};
use crate::context::RequestContext;
use crate::cursor::CursorId;
use crate::document::{type_name, OptionsExt};
use crate::error::{CommandError, ErrorCode, ErrorKind};
use crate::gateway::Gateway;
use crate::request::CommandRequest;

fn cursor_id(value: &Bson, field: &str) -> Result<CursorId, CommandError> {
    match value {
        Bson::Int64(id) => Ok(*id),
        Bson::Int32(id) => Ok(i64::from(*id)),
        other => Err(CommandError::type_mismatch(field, type_name(other), "long")),
    }
}

pub async fn get_more(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let id = match req.command.get("getMore") {
        Some(value) => cursor_id(value, "getMore.getMore")?,
        None => return Err(missing_field("getMore", "getMore")),
    };
    let Some(collection) = req.command.opt_str("getMore", "collection")? else {
        return Err(missing_field("getMore", "collection"));
    };
    // batchSize 0 means the cursor's own size here
    let batch_size = batch_size(gw, &req.command, "getMore")?.filter(|n| *n > 0);

    let cursors = gw.cursors();
    let namespace = format!("{}.{}", req.database, collection);
    match cursors.namespace(id) {
        None => return Err(CommandError::cursor_not_found(id)),
        Some(opened_on) if opened_on != namespace => {
            return Err(CommandError::from_code(
                ErrorCode::Unauthorized,
                format!(
                    "Requested getMore on namespace '{}', but cursor belongs to a different namespace {}",
                    namespace, opened_on
                ),
            ))
        }
        Some(_) => {}
    }

    let batch = match ctx.run(cursors.next_batch(id, batch_size)).await {
        Ok(batch) => batch,
        Err(err) => {
            // An abandoned fetch leaves the stream position unknown
            if err.kind() == ErrorKind::OperationAborted {
                cursors.kill(id);
            }
            return Err(err);
        }
    };

    let cursor_id = if batch.exhausted { 0 } else { id };
    Ok(doc! {
        "cursor": {
            "nextBatch": batch.documents,
            "id": cursor_id,
            "ns": namespace,
        }
    })
}

pub async fn kill_cursors(
    gw: &Gateway,
    _ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let Some(ids) = req.command.opt_array("killCursors", "cursors")? else {
        return Err(missing_field("killCursors", "cursors"));
    };

    let mut killed = Vec::new();
    let mut not_found = Vec::new();
    for value in ids {
        let id = cursor_id(value, "killCursors.cursors")?;
        if gw.cursors().kill(id) {
            killed.push(Bson::Int64(id));
        } else {
            not_found.push(Bson::Int64(id));
        }
    }

    Ok(doc! {
        "cursorsKilled": killed,
        "cursorsNotFound": not_found,
        "cursorsAlive": [],
        "cursorsUnknown": [],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::request::Ingress;
    use docgate_common::Config;
    use std::sync::Arc;

    fn request(raw: Document) -> CommandRequest {
        CommandRequest::from_raw(raw, None, Ingress::OpMsg).unwrap()
    }

    async fn seeded() -> Gateway {
        let gw = Gateway::new(Config::default(), Arc::new(MemoryBackend::new()));
        let docs: Vec<_> = (0..5).map(|i| doc! { "_id": i }).collect();
        gw.backend().insert("test", "c", docs, true).await.unwrap();
        gw
    }

    fn opened_cursor(reply: &Document) -> i64 {
        reply.get_document("cursor").unwrap().get_i64("id").unwrap()
    }

    #[tokio::test]
    async fn test_get_more_pages_until_exhausted() {
        let gw = seeded().await;
        let session = gw.open_session();
        let ctx = gw.request_context(&session);

        let first = gw
            .handle(&ctx, &request(doc! { "find": "c", "$db": "test", "batchSize": 2 }))
            .await
            .result
            .unwrap();
        let id = opened_cursor(&first);
        assert_ne!(id, 0);

        let next = get_more(
            &gw,
            &ctx,
            &request(doc! { "getMore": id, "$db": "test", "collection": "c", "batchSize": 2 }),
        )
        .await
        .unwrap();
        let cursor = next.get_document("cursor").unwrap();
        assert_eq!(cursor.get_array("nextBatch").unwrap().len(), 2);
        assert_eq!(cursor.get_i64("id").unwrap(), id);

        let last = get_more(&gw, &ctx, &request(doc! { "getMore": id, "$db": "test", "collection": "c" }))
            .await
            .unwrap();
        let cursor = last.get_document("cursor").unwrap();
        assert_eq!(cursor.get_array("nextBatch").unwrap().len(), 1);
        assert_eq!(cursor.get_i64("id").unwrap(), 0);

        let err = get_more(&gw, &ctx, &request(doc! { "getMore": id, "$db": "test", "collection": "c" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::CursorNotFound);
    }

    #[tokio::test]
    async fn test_get_more_checks_namespace() {
        let gw = seeded().await;
        let session = gw.open_session();
        let ctx = gw.request_context(&session);
        let first = gw
            .handle(&ctx, &request(doc! { "find": "c", "$db": "test", "batchSize": 1 }))
            .await
            .result
            .unwrap();
        let id = opened_cursor(&first);

        let err = get_more(&gw, &ctx, &request(doc! { "getMore": id, "$db": "test", "collection": "other" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::Unauthorized);
        assert_eq!(err.kind(), ErrorKind::BackendError);
        assert!(gw.cursors().contains(id));

        let err = get_more(&gw, &ctx, &request(doc! { "getMore": "x", "$db": "test", "collection": "c" }))
            .await
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::TypeMismatch);
    }

    #[tokio::test]
    async fn test_kill_cursors_reports_each_id() {
        let gw = seeded().await;
        let session = gw.open_session();
        let ctx = gw.request_context(&session);
        let first = gw
            .handle(&ctx, &request(doc! { "find": "c", "$db": "test", "batchSize": 1 }))
            .await
            .result
            .unwrap();
        let id = opened_cursor(&first);

        let out = kill_cursors(
            &gw,
            &ctx,
            &request(doc! { "killCursors": "c", "$db": "test", "cursors": [id, 12345i64] }),
        )
        .await
        .unwrap();
        assert_eq!(out.get_array("cursorsKilled").unwrap(), &vec![Bson::Int64(id)]);
        assert_eq!(out.get_array("cursorsNotFound").unwrap(), &vec![Bson::Int64(12345)]);
        assert!(gw.cursors().is_empty());
    }
}
