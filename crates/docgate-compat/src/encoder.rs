//! Response encoding for both ingresses
//!
//! Handlers return protocol-neutral result documents. This module adds the
//! `ok` envelope for the wire protocol and reshapes results into Data API
//! bodies, so no handler knows which ingress it is serving.

use bson::{doc, Bson, Document};
use bytes::Bytes;
use serde_json::{json, Value};

use docgate_common::ProtocolError;

use crate::document::{as_whole_number, document_to_json};
use crate::error::{CommandError, ErrorCode, ErrorKind};
use crate::request::{CommandRequest, DataApiAction, Ingress};
use crate::wire::protocol::{serialize_op_msg, serialize_op_reply};

/// Outcome of one command: a result document or a structured error
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResponse {
    pub name: String,
    pub ingress: Ingress,
    pub result: Result<Document, CommandError>,
}

impl CommandResponse {
    #[must_use]
    pub fn new(request: &CommandRequest, result: Result<Document, CommandError>) -> Self {
        Self {
            name: request.name.clone(),
            ingress: request.ingress,
            result,
        }
    }

    /// A request that failed before it could be dispatched
    #[must_use]
    pub fn rejected(ingress: Ingress, error: CommandError) -> Self {
        Self {
            name: String::new(),
            ingress,
            result: Err(error),
        }
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }

    /// Body document for the wire protocol, `ok` included
    #[must_use]
    pub fn to_wire_document(&self) -> Document {
        match &self.result {
            Ok(doc) => {
                let mut out = doc.clone();
                out.insert("ok", 1.0);
                out
            }
            Err(err) => error_document(err),
        }
    }

    /// Serialize as the reply to a wire request with id `response_to`
    pub fn encode_wire(&self, request_id: i32, response_to: i32) -> Result<Bytes, ProtocolError> {
        let doc = self.to_wire_document();
        let buf = match self.ingress {
            Ingress::OpQuery => serialize_op_reply(request_id, response_to, &doc)?,
            Ingress::OpMsg | Ingress::DataApi => serialize_op_msg(request_id, response_to, &doc)?,
        };
        Ok(buf.freeze())
    }
}

/// `{ok: 0, errmsg, code, codeName}`
#[must_use]
pub fn error_document(err: &CommandError) -> Document {
    doc! {
        "ok": 0.0,
        "errmsg": err.message(),
        "code": err.code().code(),
        "codeName": err.code().name(),
    }
}

/// HTTP status a Data API failure is reported with
#[must_use]
pub fn http_status(err: &CommandError) -> u16 {
    match err.code() {
        ErrorCode::DuplicateKey | ErrorCode::NamespaceExists => return 409,
        ErrorCode::NamespaceNotFound => return 404,
        _ => {}
    }
    match err.kind() {
        ErrorKind::MalformedRequest | ErrorKind::FailedToParse => 400,
        ErrorKind::UnsupportedCommand | ErrorKind::CursorNotFound => 404,
        ErrorKind::OperationAborted => 503,
        ErrorKind::BackendError => 500,
    }
}

/// A Data API response ready to be written
#[derive(Debug, Clone, PartialEq)]
pub struct JsonReply {
    pub status: u16,
    pub body: Value,
    /// Seconds to advertise in `Retry-After`, for retryable failures
    pub retry_after: Option<u64>,
}

impl JsonReply {
    #[must_use]
    pub fn error(err: &CommandError) -> Self {
        Self {
            status: http_status(err),
            body: json!({
                "error": err.message(),
                "error_code": err.code().name(),
                "code": err.code().code(),
            }),
            retry_after: err.is_retryable().then_some(1),
        }
    }

    fn ok(body: Value) -> Self {
        Self {
            status: 200,
            body,
            retry_after: None,
        }
    }
}

/// Reshape a command response into the body of a Data API action
#[must_use]
pub fn encode_json(action: DataApiAction, request: &CommandRequest, response: &CommandResponse) -> JsonReply {
    let result = match &response.result {
        Ok(result) => result,
        Err(err) => return JsonReply::error(err),
    };
    if let Some(err) = first_write_error(result) {
        return JsonReply::error(&err);
    }

    match action {
        DataApiAction::Aggregate | DataApiAction::Find => {
            JsonReply::ok(json!({ "documents": array_to_json(first_batch(result)) }))
        }
        DataApiAction::FindOne => {
            let document = first_batch(result)
                .first()
                .and_then(Bson::as_document)
                .map_or(Value::Null, document_to_json);
            JsonReply::ok(json!({ "document": document }))
        }
        DataApiAction::InsertOne => {
            let id = inserted_ids(request).into_iter().next().unwrap_or(Bson::Null);
            JsonReply::ok(json!({ "insertedId": id.into_relaxed_extjson() }))
        }
        DataApiAction::InsertMany => {
            let ids = inserted_ids(request).into_iter().map(Bson::into_relaxed_extjson).collect::<Vec<_>>();
            JsonReply::ok(json!({ "insertedIds": ids }))
        }
        DataApiAction::DeleteOne | DataApiAction::DeleteMany => {
            JsonReply::ok(json!({ "deletedCount": count_field(result) }))
        }
        DataApiAction::Count => JsonReply::ok(json!({ "n": count_field(result) })),
    }
}

fn first_batch(result: &Document) -> &[Bson] {
    result
        .get_document("cursor")
        .and_then(|cursor| cursor.get_array("firstBatch"))
        .map(Vec::as_slice)
        .unwrap_or_default()
}

fn array_to_json(items: &[Bson]) -> Value {
    Bson::Array(items.to_vec()).into_relaxed_extjson()
}

fn count_field(result: &Document) -> i64 {
    result.get("n").and_then(as_whole_number).unwrap_or_default()
}

fn inserted_ids(request: &CommandRequest) -> Vec<Bson> {
    request
        .command
        .get_array("documents")
        .map(|docs| {
            docs.iter()
                .filter_map(|d| d.as_document().and_then(|d| d.get("_id")).cloned())
                .collect()
        })
        .unwrap_or_default()
}

/// Write errors are reported inside a successful reply on the wire, but fail
/// the whole Data API call
fn first_write_error(result: &Document) -> Option<CommandError> {
    let first = result.get_array("writeErrors").ok()?.first()?.as_document()?;
    let code = first.get("code").and_then(as_whole_number).unwrap_or(1);
    let message = first.get_str("errmsg").unwrap_or("write error");
    Some(CommandError::from_code(
        ErrorCode::from_code(i32::try_from(code).unwrap_or(1)),
        message,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::normalize_json;
    use crate::wire::protocol::{parse_header, parse_reply_document};
    use crate::wire::{OpCode, HEADER_LEN};

    fn find_result() -> Document {
        doc! { "cursor": { "firstBatch": [ { "_id": 1, "v": 42 } ], "id": 0i64, "ns": "test.c" } }
    }

    #[test]
    fn test_wire_success_appends_ok() {
        let response = CommandResponse {
            name: "find".into(),
            ingress: Ingress::OpMsg,
            result: Ok(find_result()),
        };
        let doc = response.to_wire_document();
        assert_eq!(doc.keys().last().map(String::as_str), Some("ok"));
        assert_eq!(doc.get_f64("ok").unwrap(), 1.0);
        assert!(doc.get_document("cursor").is_ok());
    }

    #[test]
    fn test_wire_failure_shape() {
        let response = CommandResponse::rejected(Ingress::OpMsg, CommandError::command_not_found("nope"));
        assert_eq!(
            response.to_wire_document(),
            doc! {
                "ok": 0.0,
                "errmsg": "no such command: 'nope'",
                "code": 59,
                "codeName": "CommandNotFound",
            }
        );
    }

    #[test]
    fn test_reply_opcode_follows_ingress() {
        let mut response = CommandResponse {
            name: "isMaster".into(),
            ingress: Ingress::OpQuery,
            result: Ok(doc! { "ismaster": true }),
        };
        let bytes = response.encode_wire(5, 3).unwrap();
        let header = parse_header(&bytes).unwrap();
        assert_eq!(header.op_code, OpCode::OpReply);
        assert_eq!(header.response_to, 3);
        let doc = parse_reply_document(header.op_code, &bytes[HEADER_LEN..]).unwrap();
        assert_eq!(doc, doc! { "ismaster": true, "ok": 1.0 });

        response.ingress = Ingress::OpMsg;
        let bytes = response.encode_wire(6, 4).unwrap();
        assert_eq!(parse_header(&bytes).unwrap().op_code, OpCode::OpMsg);
    }

    #[test]
    fn test_json_shapes() {
        let request = normalize_json(
            DataApiAction::Find,
            json!({ "database": "test", "collection": "c" }),
        )
        .unwrap();
        let response = CommandResponse::new(&request, Ok(find_result()));

        let reply = encode_json(DataApiAction::Find, &request, &response);
        assert_eq!(reply.status, 200);
        assert_eq!(reply.body, json!({ "documents": [ { "_id": 1, "v": 42 } ] }));

        let reply = encode_json(DataApiAction::FindOne, &request, &response);
        assert_eq!(reply.body, json!({ "document": { "_id": 1, "v": 42 } }));

        let empty = CommandResponse::new(
            &request,
            Ok(doc! { "cursor": { "firstBatch": [], "id": 0i64, "ns": "test.c" } }),
        );
        let reply = encode_json(DataApiAction::FindOne, &request, &empty);
        assert_eq!(reply.body, json!({ "document": null }));
    }

    #[test]
    fn test_json_insert_reports_ids() {
        let request = normalize_json(
            DataApiAction::InsertMany,
            json!({ "database": "test", "collection": "c", "documents": [ { "_id": 1 }, { "_id": "b" } ] }),
        )
        .unwrap();
        let response = CommandResponse::new(&request, Ok(doc! { "n": 2 }));
        let reply = encode_json(DataApiAction::InsertMany, &request, &response);
        assert_eq!(reply.body, json!({ "insertedIds": [1, "b"] }));

        let failed = CommandResponse::new(
            &request,
            Ok(doc! { "n": 1, "writeErrors": [ { "index": 1, "code": 11000, "errmsg": "E11000 duplicate key" } ] }),
        );
        let reply = encode_json(DataApiAction::InsertMany, &request, &failed);
        assert_eq!(reply.status, 409);
        assert_eq!(reply.body["code"], json!(11000));
    }

    #[test]
    fn test_http_status_map() {
        assert_eq!(http_status(&CommandError::malformed("x")), 400);
        assert_eq!(http_status(&CommandError::failed_to_parse("x")), 400);
        assert_eq!(http_status(&CommandError::command_not_found("x")), 404);
        assert_eq!(http_status(&CommandError::cursor_not_found(1)), 404);
        assert_eq!(http_status(&CommandError::internal("x")), 500);
        assert_eq!(
            http_status(&CommandError::from_code(ErrorCode::NamespaceExists, "x")),
            409
        );

        let reply = JsonReply::error(&CommandError::interrupted());
        assert_eq!(reply.status, 503);
        assert_eq!(reply.retry_after, Some(1));
        assert_eq!(reply.body["error_code"], json!("Interrupted"));
    }
}
