//! Namespace commands: `create`, `drop`, `listCollections`, `listDatabases`

use bson::{doc, Bson, Document};

use super::collection_name;
use crate::backend::Filter;
use crate::context::RequestContext;
use crate::document::OptionsExt;
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::request::CommandRequest;

const MB: u64 = 1024 * 1024;

fn size_value(bytes: u64) -> i64 {
    i64::try_from(bytes).unwrap_or(i64::MAX)
}

pub async fn create(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let collection = collection_name(req)?;
    ctx.run(async {
        gw.backend()
            .create_collection(&req.database, collection)
            .await
            .map_err(CommandError::from)
    })
    .await?;
    Ok(Document::new())
}

pub async fn drop(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let collection = collection_name(req)?;
    let dropped = ctx
        .run(async {
            gw.backend()
                .drop_collection(&req.database, collection)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    // Open cursors keep their snapshot; dropping does not invalidate them
    let mut reply = doc! { "ns": format!("{}.{}", req.database, collection) };
    if dropped {
        reply.insert("nIndexesWas", 1);
    }
    Ok(reply)
}

pub async fn list_collections(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let filter = req
        .command
        .opt_document("listCollections", "filter")?
        .map(Filter::parse)
        .transpose()?;
    let name_only = req.command.opt_bool("listCollections", "nameOnly")?.unwrap_or(false);

    let names = ctx
        .run(async {
            gw.backend()
                .list_collections(&req.database)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    let batch: Vec<Bson> = names
        .into_iter()
        .map(|name| {
            if name_only {
                doc! { "name": name, "type": "collection" }
            } else {
                doc! {
                    "name": name,
                    "type": "collection",
                    "options": {},
                    "info": { "readOnly": false },
                }
            }
        })
        .filter(|info| filter.as_ref().map_or(true, |f| f.matches(info)))
        .map(Bson::Document)
        .collect();

    Ok(doc! {
        "cursor": {
            "id": 0i64,
            "ns": format!("{}.$cmd.listCollections", req.database),
            "firstBatch": batch,
        }
    })
}

pub async fn list_databases(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let name_only = req.command.opt_bool("listDatabases", "nameOnly")?.unwrap_or(false);
    let databases = ctx
        .run(async { gw.backend().list_databases().await.map_err(CommandError::from) })
        .await?;

    let total: u64 = databases.iter().map(|(_, size)| size).sum();
    let entries: Vec<Bson> = databases
        .into_iter()
        .map(|(name, size)| {
            Bson::Document(if name_only {
                doc! { "name": name }
            } else {
                doc! { "name": name, "sizeOnDisk": size_value(size), "empty": size == 0 }
            })
        })
        .collect();

    let mut reply = doc! { "databases": entries };
    if !name_only {
        reply.insert("totalSize", size_value(total));
        reply.insert("totalSizeMb", size_value(total / MB));
    }
    Ok(reply)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::MemoryBackend;
    use crate::error::ErrorCode;
    use crate::request::Ingress;
    use docgate_common::Config;
    use std::sync::Arc;

    async fn run(gw: &Gateway, raw: Document) -> Result<Document, CommandError> {
        let session = gw.open_session();
        let ctx = gw.request_context(&session);
        let req = CommandRequest::from_raw(raw, None, Ingress::OpMsg).unwrap();
        gw.handle(&ctx, &req).await.result
    }

    fn gateway() -> Gateway {
        Gateway::new(Config::default(), Arc::new(MemoryBackend::new()))
    }

    fn names(reply: &Document) -> Vec<String> {
        reply
            .get_document("cursor")
            .unwrap()
            .get_array("firstBatch")
            .unwrap()
            .iter()
            .map(|info| info.as_document().unwrap().get_str("name").unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_create_list_drop() {
        let gw = gateway();
        run(&gw, doc! { "create": "a", "$db": "test" }).await.unwrap();
        run(&gw, doc! { "create": "b", "$db": "test" }).await.unwrap();
        let err = run(&gw, doc! { "create": "a", "$db": "test" }).await.unwrap_err();
        assert_eq!(err.code(), ErrorCode::NamespaceExists);

        let listed = run(&gw, doc! { "listCollections": 1, "$db": "test" }).await.unwrap();
        assert_eq!(names(&listed), vec!["a", "b"]);
        let cursor = listed.get_document("cursor").unwrap();
        assert_eq!(cursor.get_i64("id").unwrap(), 0);
        assert_eq!(cursor.get_str("ns").unwrap(), "test.$cmd.listCollections");

        let filtered = run(
            &gw,
            doc! { "listCollections": 1, "$db": "test", "filter": { "name": "b" }, "nameOnly": true },
        )
        .await
        .unwrap();
        assert_eq!(names(&filtered), vec!["b"]);

        let out = run(&gw, doc! { "drop": "a", "$db": "test" }).await.unwrap();
        assert_eq!(out.get_str("ns").unwrap(), "test.a");
        assert!(out.contains_key("nIndexesWas"));

        let out = run(&gw, doc! { "drop": "a", "$db": "test" }).await.unwrap();
        assert!(!out.contains_key("nIndexesWas"));
    }

    #[tokio::test]
    async fn test_list_databases() {
        let gw = gateway();
        run(&gw, doc! { "insert": "c", "$db": "one", "documents": [ { "_id": 1 } ] })
            .await
            .unwrap();
        run(&gw, doc! { "create": "c", "$db": "two" }).await.unwrap();

        let out = run(&gw, doc! { "listDatabases": 1, "$db": "admin" }).await.unwrap();
        let dbs = out.get_array("databases").unwrap();
        assert_eq!(dbs.len(), 2);
        let two = dbs[1].as_document().unwrap();
        assert_eq!(two.get_str("name").unwrap(), "two");
        assert!(two.get_bool("empty").unwrap());
        assert!(out.get_i64("totalSize").unwrap() > 0);
    }
}
