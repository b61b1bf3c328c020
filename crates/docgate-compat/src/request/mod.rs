//! Request normalization
//!
//! Both ingresses produce the same [`CommandRequest`]: a command document
//! whose first key is the command name, followed by `$db`, followed by the
//! command's own options in the order the client sent them. Generic driver
//! arguments that do not change what a command does are moved aside into
//! `metadata`, so a binary request and its Data API equivalent compare equal.

mod json;
mod wire;

pub use json::{normalize_json, DataApiAction};
pub use wire::{normalize_msg, normalize_query};

use bson::{Bson, Document};

use crate::error::CommandError;

/// Driver arguments carried alongside a command without affecting it
pub const GENERIC_ARGUMENTS: &[&str] = &[
    "lsid",
    "$clusterTime",
    "$readPreference",
    "apiVersion",
    "apiStrict",
    "apiDeprecationErrors",
    "txnNumber",
    "autocommit",
    "startTransaction",
    "readConcern",
    "writeConcern",
    "comment",
];

/// Where a request arrived from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Ingress {
    OpMsg,
    OpQuery,
    DataApi,
}

impl Ingress {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Ingress::OpMsg => "op_msg",
            Ingress::OpQuery => "op_query",
            Ingress::DataApi => "data_api",
        }
    }
}

/// A request in canonical form, independent of its ingress
#[derive(Debug, Clone, PartialEq)]
pub struct CommandRequest {
    /// Command name as sent (first key of the command document)
    pub name: String,
    /// Target database
    pub database: String,
    /// Target collection, when the command names one
    pub collection: Option<String>,
    /// Canonical command document, `$db` included
    pub command: Document,
    /// Generic arguments removed from the command document
    pub metadata: Document,
    pub ingress: Ingress,
}

impl CommandRequest {
    /// Canonicalize a raw command document.
    ///
    /// `database` overrides any `$db` in `raw`; when `None`, `raw` must
    /// carry `$db` itself.
    pub fn from_raw(
        raw: Document,
        database: Option<String>,
        ingress: Ingress,
    ) -> Result<Self, CommandError> {
        let Some((name, first)) = raw.iter().next().map(|(k, v)| (k.clone(), v.clone())) else {
            return Err(CommandError::malformed("empty command document"));
        };
        if name == "$db" {
            return Err(CommandError::malformed("command document must start with the command name"));
        }

        let database = match database {
            Some(db) => db,
            None => match raw.get("$db") {
                Some(Bson::String(db)) => db.clone(),
                Some(other) => {
                    return Err(CommandError::malformed(format!(
                        "$db must be a string, got {}",
                        crate::document::type_name(other)
                    ))
                    .with_field("$db"))
                }
                None => {
                    return Err(CommandError::malformed("missing $db in command").with_field("$db"))
                }
            },
        };
        if database.is_empty() {
            return Err(CommandError::malformed("database name must not be empty"));
        }

        let mut command = Document::new();
        let mut metadata = Document::new();
        command.insert(name.clone(), first.clone());
        command.insert("$db", database.clone());
        for (key, value) in raw.into_iter().skip(1) {
            if key == "$db" {
                continue;
            }
            if GENERIC_ARGUMENTS.contains(&key.as_str()) {
                metadata.insert(key, value);
            } else {
                command.insert(key, value);
            }
        }

        let collection = match first {
            Bson::String(coll) if !coll.is_empty() => Some(coll),
            _ => None,
        };

        Ok(Self {
            name,
            database,
            collection,
            command,
            metadata,
            ingress,
        })
    }

    /// `<database>.<collection>`, or `<database>.$cmd` without a collection
    #[must_use]
    pub fn namespace(&self) -> String {
        match &self.collection {
            Some(coll) => format!("{}.{}", self.database, coll),
            None => format!("{}.$cmd", self.database),
        }
    }

    /// Command document without `$db`
    #[must_use]
    pub fn body(&self) -> Document {
        let mut body = self.command.clone();
        body.remove("$db");
        body
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bson::doc;

    #[test]
    fn test_canonical_order_and_metadata() {
        let raw = doc! {
            "find": "c",
            "filter": { "a": 1 },
            "lsid": { "id": 1 },
            "$db": "test",
            "limit": 2,
            "$readPreference": { "mode": "primary" },
        };
        let req = CommandRequest::from_raw(raw, None, Ingress::OpMsg).unwrap();
        assert_eq!(req.name, "find");
        assert_eq!(req.database, "test");
        assert_eq!(req.collection.as_deref(), Some("c"));
        assert_eq!(
            req.command,
            doc! { "find": "c", "$db": "test", "filter": { "a": 1 }, "limit": 2 }
        );
        assert_eq!(
            req.metadata,
            doc! { "lsid": { "id": 1 }, "$readPreference": { "mode": "primary" } }
        );
        assert_eq!(req.namespace(), "test.c");
    }

    #[test]
    fn test_missing_db_is_malformed() {
        let err = CommandRequest::from_raw(doc! { "ping": 1 }, None, Ingress::OpMsg).unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::MalformedRequest);
        assert!(CommandRequest::from_raw(doc! {}, Some("db".into()), Ingress::OpMsg).is_err());
    }

    #[test]
    fn test_explicit_database_overrides_db_field() {
        let req = CommandRequest::from_raw(
            doc! { "ping": 1, "$db": "other" },
            Some("admin".into()),
            Ingress::OpQuery,
        )
        .unwrap();
        assert_eq!(req.database, "admin");
        assert_eq!(req.command, doc! { "ping": 1, "$db": "admin" });
        assert_eq!(req.collection, None);
        assert_eq!(req.namespace(), "admin.$cmd");
    }
}
