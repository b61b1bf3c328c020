//! Data API (JSON over HTTP) requests

use std::fmt;
use std::str::FromStr;

use bson::oid::ObjectId;
use bson::{Bson, Document};
use serde::Deserialize;
use serde_json::Value;

use super::{CommandRequest, Ingress};
use crate::document::{count_value, document_from_json, type_name, value_from_json};
use crate::error::CommandError;

/// Data API endpoints, one per `/action/<name>`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataApiAction {
    Aggregate,
    Find,
    FindOne,
    InsertOne,
    InsertMany,
    DeleteOne,
    DeleteMany,
    Count,
}

impl DataApiAction {
    pub const ALL: [DataApiAction; 8] = [
        DataApiAction::Aggregate,
        DataApiAction::Find,
        DataApiAction::FindOne,
        DataApiAction::InsertOne,
        DataApiAction::InsertMany,
        DataApiAction::DeleteOne,
        DataApiAction::DeleteMany,
        DataApiAction::Count,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            DataApiAction::Aggregate => "aggregate",
            DataApiAction::Find => "find",
            DataApiAction::FindOne => "findOne",
            DataApiAction::InsertOne => "insertOne",
            DataApiAction::InsertMany => "insertMany",
            DataApiAction::DeleteOne => "deleteOne",
            DataApiAction::DeleteMany => "deleteMany",
            DataApiAction::Count => "count",
        }
    }
}

impl fmt::Display for DataApiAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DataApiAction {
    type Err = CommandError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|action| action.as_str() == s)
            .ok_or_else(|| CommandError::command_not_found(s))
    }
}

/// Fields accepted across all actions; each action reads the ones it needs
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ActionBody {
    #[allow(dead_code)]
    data_source: Option<String>,
    database: String,
    collection: Option<String>,
    filter: Option<Value>,
    projection: Option<Value>,
    sort: Option<Value>,
    limit: Option<u64>,
    skip: Option<u64>,
    pipeline: Option<Value>,
    document: Option<Value>,
    documents: Option<Vec<Value>>,
}

impl ActionBody {
    fn collection(&self) -> Result<&str, CommandError> {
        match self.collection.as_deref() {
            Some(coll) if !coll.is_empty() => Ok(coll),
            _ => Err(CommandError::malformed("'collection' is required").with_field("collection")),
        }
    }

    fn filter(&mut self) -> Result<Option<Document>, CommandError> {
        self.filter
            .take()
            .map(|v| document_from_json("filter", v))
            .transpose()
    }
}

/// Reassemble a Data API body into the command a driver would have sent
pub fn normalize_json(action: DataApiAction, body: Value) -> Result<CommandRequest, CommandError> {
    if !body.is_object() {
        return Err(CommandError::malformed("request body must be a JSON object"));
    }
    let mut body: ActionBody = serde_json::from_value(body)
        .map_err(|e| CommandError::malformed(format!("invalid request body: {}", e)))?;
    if body.database.is_empty() {
        return Err(CommandError::malformed("'database' is required").with_field("database"));
    }

    let mut command = Document::new();
    match action {
        DataApiAction::Aggregate => {
            let target = match body.collection.as_deref() {
                Some(coll) if !coll.is_empty() => Bson::String(coll.to_string()),
                _ => Bson::Int32(1),
            };
            let pipeline = match body.pipeline.take() {
                Some(value) => match value_from_json("pipeline", value)? {
                    pipeline @ Bson::Array(_) => pipeline,
                    other => {
                        return Err(CommandError::malformed(format!(
                            "'pipeline' must be an array, got {}",
                            type_name(&other)
                        ))
                        .with_field("pipeline"))
                    }
                },
                None => {
                    return Err(CommandError::malformed("'pipeline' is required").with_field("pipeline"))
                }
            };
            command.insert("aggregate", target);
            command.insert("pipeline", pipeline);
            command.insert("cursor", Document::new());
        }
        DataApiAction::Find | DataApiAction::FindOne => {
            command.insert("find", body.collection()?.to_string());
            if let Some(filter) = body.filter()? {
                command.insert("filter", filter);
            }
            if let Some(projection) = body.projection.take() {
                command.insert("projection", document_from_json("projection", projection)?);
            }
            if action == DataApiAction::FindOne {
                command.insert("limit", 1);
                command.insert("singleBatch", true);
            } else {
                if let Some(sort) = body.sort.take() {
                    command.insert("sort", document_from_json("sort", sort)?);
                }
                if let Some(limit) = body.limit {
                    command.insert("limit", count_value(limit));
                }
                if let Some(skip) = body.skip {
                    command.insert("skip", count_value(skip));
                }
            }
        }
        DataApiAction::InsertOne => {
            let Some(document) = body.document.take() else {
                return Err(CommandError::malformed("'document' is required").with_field("document"));
            };
            command.insert("insert", body.collection()?.to_string());
            command.insert("documents", vec![Bson::Document(with_id(document_from_json("document", document)?))]);
        }
        DataApiAction::InsertMany => {
            let Some(documents) = body.documents.take() else {
                return Err(CommandError::malformed("'documents' is required").with_field("documents"));
            };
            let documents = documents
                .into_iter()
                .map(|doc| document_from_json("documents", doc).map(|d| Bson::Document(with_id(d))))
                .collect::<Result<Vec<_>, _>>()?;
            command.insert("insert", body.collection()?.to_string());
            command.insert("documents", documents);
        }
        DataApiAction::DeleteOne | DataApiAction::DeleteMany => {
            let Some(filter) = body.filter()? else {
                return Err(CommandError::malformed("'filter' is required").with_field("filter"));
            };
            let limit = i32::from(action == DataApiAction::DeleteOne);
            command.insert("delete", body.collection()?.to_string());
            command.insert("deletes", vec![Bson::Document(bson::doc! { "q": filter, "limit": limit })]);
        }
        DataApiAction::Count => {
            command.insert("count", body.collection()?.to_string());
            if let Some(filter) = body.filter()? {
                command.insert("query", filter);
            }
        }
    }

    CommandRequest::from_raw(command, Some(body.database), Ingress::DataApi)
}

/// Give a document an `_id` if it lacks one, keeping `_id` first
fn with_id(doc: Document) -> Document {
    if doc.contains_key("_id") {
        return doc;
    }
    let mut out = Document::new();
    out.insert("_id", ObjectId::new());
    out.extend(doc);
    out
}
