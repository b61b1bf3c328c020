//! Binary wire requests

use bson::{Bson, Document};

use super::{CommandRequest, Ingress};
use crate::error::CommandError;
use crate::wire::{OpMsg, OpQuery, Section};

/// Build a request from an OP_MSG.
///
/// Exactly one body section is allowed; each document sequence is folded into
/// the body as an array under its identifier.
pub fn normalize_msg(msg: OpMsg) -> Result<CommandRequest, CommandError> {
    let mut body: Option<Document> = None;
    let mut sequences = Vec::new();

    for section in msg.sections {
        match section {
            Section::Body(doc) => {
                if body.replace(doc).is_some() {
                    return Err(CommandError::malformed("OP_MSG carries more than one body section"));
                }
            }
            Section::Sequence {
                identifier,
                documents,
            } => sequences.push((identifier, documents)),
        }
    }

    let Some(mut body) = body else {
        return Err(CommandError::malformed("OP_MSG has no body section"));
    };

    for (identifier, documents) in sequences {
        if body.contains_key(&identifier) {
            return Err(CommandError::malformed(format!(
                "duplicate field '{}' in body and document sequence",
                identifier
            ))
            .with_field(identifier));
        }
        body.insert(
            identifier,
            Bson::Array(documents.into_iter().map(Bson::Document).collect()),
        );
    }

    CommandRequest::from_raw(body, None, Ingress::OpMsg)
}

/// Build a request from a legacy OP_QUERY against `<db>.$cmd`
pub fn normalize_query(query: OpQuery) -> Result<CommandRequest, CommandError> {
    let Some(database) = query.full_collection_name.strip_suffix(".$cmd") else {
        return Err(CommandError::malformed(format!(
            "OP_QUERY is only supported for commands, got namespace '{}'",
            query.full_collection_name
        )));
    };

    let mut doc = query.query;
    let wrapped = match doc.iter().next() {
        Some((key, Bson::Document(_))) if key == "$query" || key == "query" => Some(key.clone()),
        _ => None,
    };
    if let Some(key) = wrapped {
        if let Ok(inner) = doc.get_document_mut(&key) {
            doc = std::mem::take(inner);
        }
    }

    CommandRequest::from_raw(doc, Some(database.to_string()), Ingress::OpQuery)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::wire::MsgFlags;
    use bson::doc;

    fn msg(sections: Vec<Section>) -> OpMsg {
        OpMsg {
            flags: MsgFlags::default(),
            sections,
        }
    }

    #[test]
    fn test_document_sequence_is_folded() {
        let req = normalize_msg(msg(vec![
            Section::Body(doc! { "insert": "c", "$db": "test", "ordered": true }),
            Section::Sequence {
                identifier: "documents".to_string(),
                documents: vec![doc! { "_id": 1 }, doc! { "_id": 2 }],
            },
        ]))
        .unwrap();

        assert_eq!(
            req.command,
            doc! {
                "insert": "c",
                "$db": "test",
                "ordered": true,
                "documents": [ { "_id": 1 }, { "_id": 2 } ],
            }
        );
        assert_eq!(req.ingress, Ingress::OpMsg);
    }

    #[test]
    fn test_body_section_rules() {
        let err = normalize_msg(msg(vec![])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);

        let err = normalize_msg(msg(vec![
            Section::Body(doc! { "ping": 1, "$db": "a" }),
            Section::Body(doc! { "ping": 1, "$db": "a" }),
        ]))
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);

        let err = normalize_msg(msg(vec![
            Section::Body(doc! { "insert": "c", "$db": "a", "documents": [] }),
            Section::Sequence {
                identifier: "documents".to_string(),
                documents: vec![],
            },
        ]))
        .unwrap_err();
        assert_eq!(err.field(), Some("documents"));
    }

    #[test]
    fn test_op_query_unwraps_query() {
        let req = normalize_query(OpQuery {
            flags: 0,
            full_collection_name: "admin.$cmd".to_string(),
            number_to_skip: 0,
            number_to_return: -1,
            query: doc! { "$query": { "isMaster": 1 }, "$readPreference": { "mode": "primary" } },
        })
        .unwrap();
        assert_eq!(req.name, "isMaster");
        assert_eq!(req.command, doc! { "isMaster": 1, "$db": "admin" });
        assert_eq!(req.ingress, Ingress::OpQuery);
    }

    #[test]
    fn test_op_query_requires_command_namespace() {
        let err = normalize_query(OpQuery {
            flags: 0,
            full_collection_name: "test.users".to_string(),
            number_to_skip: 0,
            number_to_return: 1,
            query: doc! { "a": 1 },
        })
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::MalformedRequest);
    }
}
