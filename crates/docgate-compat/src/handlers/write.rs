//! `insert` and `delete`
//!
//! Per-document failures are reported in `writeErrors` of an otherwise
//! successful reply.

use bson::{doc, Bson, Document};

use super::{collection_name, missing_field};
use crate::context::RequestContext;
use crate::document::{as_whole_number, count_value, type_name, OptionsExt};
use crate::error::CommandError;
use crate::gateway::Gateway;
use crate::request::CommandRequest;

fn write_error(index: usize, code: i32, message: &str) -> Bson {
    Bson::Document(doc! {
        "index": i32::try_from(index).unwrap_or(i32::MAX),
        "code": code,
        "errmsg": message,
    })
}

pub async fn insert(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let collection = collection_name(req)?;
    let Some(items) = req.command.opt_array("insert", "documents")? else {
        return Err(missing_field("insert", "documents"));
    };
    let documents = items
        .iter()
        .map(|item| match item {
            Bson::Document(doc) => Ok(doc.clone()),
            other => Err(CommandError::type_mismatch("insert.documents", type_name(other), "object")),
        })
        .collect::<Result<Vec<_>, _>>()?;
    let max = gw.config().wire.max_write_batch_size;
    if documents.len() > max {
        return Err(CommandError::bad_value(format!(
            "Write batch sizes must be between 1 and {}. Got {} operations.",
            max,
            documents.len()
        )));
    }
    let ordered = req.command.opt_bool("insert", "ordered")?.unwrap_or(true);

    let outcome = ctx
        .run(async {
            gw.backend()
                .insert(&req.database, collection, documents, ordered)
                .await
                .map_err(CommandError::from)
        })
        .await?;

    let mut reply = doc! { "n": count_value(outcome.inserted) };
    if !outcome.errors.is_empty() {
        let errors: Vec<Bson> = outcome
            .errors
            .iter()
            .map(|(index, err)| write_error(*index, err.code.code(), &err.message))
            .collect();
        reply.insert("writeErrors", errors);
    }
    Ok(reply)
}

pub async fn delete(
    gw: &Gateway,
    ctx: &RequestContext,
    req: &CommandRequest,
) -> Result<Document, CommandError> {
    let collection = collection_name(req)?;
    let Some(statements) = req.command.opt_array("delete", "deletes")? else {
        return Err(missing_field("delete", "deletes"));
    };

    let mut parsed = Vec::with_capacity(statements.len());
    for statement in statements {
        let Bson::Document(statement) = statement else {
            return Err(CommandError::type_mismatch("delete.deletes", type_name(statement), "object"));
        };
        let Some(filter) = statement.opt_document("delete.deletes", "q")? else {
            return Err(missing_field("delete.deletes", "q"));
        };
        let limit_one = match statement.get("limit") {
            None => return Err(missing_field("delete.deletes", "limit")),
            Some(value) => match as_whole_number(value) {
                Some(0) => false,
                Some(1) => true,
                _ => {
                    return Err(CommandError::failed_to_parse(format!(
                        "The limit field in delete objects must be 0 or 1. Got {}",
                        value
                    ))
                    .with_field("delete.deletes.limit"))
                }
            },
        };
        parsed.push((filter.clone(), limit_one));
    }
    let ordered = req.command.opt_bool("delete", "ordered")?.unwrap_or(true);

    let (deleted, errors) = ctx
        .run(async {
            let mut deleted = 0u64;
            let mut errors = Vec::new();
            for (index, (filter, limit_one)) in parsed.iter().enumerate() {
                match gw.backend().delete(&req.database, collection, filter, *limit_one).await {
                    Ok(n) => deleted += n,
                    Err(err) => {
                        errors.push(write_error(index, err.code.code(), &err.message));
                        if ordered {
                            break;
                        }
                    }
                }
            }
            Ok((deleted, errors))
        })
        .await?;

    let mut reply = doc! { "n": count_value(deleted) };
    if !errors.is_empty() {
        reply.insert("writeErrors", errors);
    }
    Ok(reply)
}
