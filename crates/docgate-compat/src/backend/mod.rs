//! Storage backend interface
//!
//! Handlers never touch storage directly. They describe work as an
//! [`Operation`] and hand it to a [`Backend`], which answers with a lazy
//! [`DocumentStream`] so large results can be paged through a cursor.

mod filter;
mod memory;
mod pipeline;

pub(crate) use filter::Filter;
pub use memory::MemoryBackend;

use async_trait::async_trait;
use bson::Document;
use futures::stream::BoxStream;
use thiserror::Error;

use crate::error::{CommandError, ErrorCode};

/// Lazy, fallible sequence of result documents
pub type DocumentStream = BoxStream<'static, Result<Document, BackendError>>;

/// Failure reported by a backend, carrying the code clients will see
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct BackendError {
    pub code: ErrorCode,
    pub message: String,
}

impl BackendError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::BadValue, message)
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InternalError, message)
    }
}

impl From<BackendError> for CommandError {
    fn from(err: BackendError) -> Self {
        CommandError::from_code(err.code, err.message)
    }
}

/// Parameters of a `find`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindSpec {
    pub filter: Document,
    pub sort: Option<Document>,
    pub projection: Option<Document>,
    pub skip: u64,
    /// 0 means no limit
    pub limit: u64,
}

/// Parameters of a `count`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct CountSpec {
    pub query: Document,
    pub skip: u64,
    /// 0 means no limit
    pub limit: u64,
}

/// A read the backend can execute or explain
#[derive(Debug, Clone, PartialEq)]
pub enum Operation {
    Find(FindSpec),
    Aggregate(Vec<Document>),
    Count(CountSpec),
}

impl Operation {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Operation::Find(_) => "find",
            Operation::Aggregate(_) => "aggregate",
            Operation::Count(_) => "count",
        }
    }
}

/// Result of a batched insert
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Failed documents by position in the batch
    pub errors: Vec<(usize, BackendError)>,
}

/// Storage backend.
///
/// `collection` is `None` for collection-less aggregations (`aggregate: 1`).
/// Implementations must not hold locks across the returned stream's await
/// points; the stream may be polled long after `execute` returned.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Run a read and return its results lazily.
    ///
    /// `Count` yields a single `{n}` document.
    async fn execute(
        &self,
        database: &str,
        collection: Option<&str>,
        operation: Operation,
    ) -> Result<DocumentStream, BackendError>;

    /// Describe how `operation` would run, as a `queryPlanner` document
    async fn explain(
        &self,
        database: &str,
        collection: Option<&str>,
        operation: &Operation,
    ) -> Result<Document, BackendError>;

    /// Insert documents, creating the collection if needed.
    ///
    /// With `ordered`, the first failure stops the batch.
    async fn insert(
        &self,
        database: &str,
        collection: &str,
        documents: Vec<Document>,
        ordered: bool,
    ) -> Result<InsertOutcome, BackendError>;

    /// Delete matching documents, at most one with `limit_one`
    async fn delete(
        &self,
        database: &str,
        collection: &str,
        filter: &Document,
        limit_one: bool,
    ) -> Result<u64, BackendError>;

    /// Fails with `NamespaceExists` when the collection is already there
    async fn create_collection(&self, database: &str, collection: &str) -> Result<(), BackendError>;

    /// Returns whether a collection was dropped
    async fn drop_collection(&self, database: &str, collection: &str) -> Result<bool, BackendError>;

    async fn list_collections(&self, database: &str) -> Result<Vec<String>, BackendError>;

    /// Database names with their approximate size in bytes
    async fn list_databases(&self) -> Result<Vec<(String, u64)>, BackendError>;
}
