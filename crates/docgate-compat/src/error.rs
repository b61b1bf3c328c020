//! Structured command errors
//!
//! Every command failure carries a numeric code from the document database
//! error taxonomy. Codes are what clients and compatibility tests compare;
//! messages are informative only.

use std::fmt;

use thiserror::Error;

/// Numeric error codes understood by clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    InternalError,
    BadValue,
    FailedToParse,
    Unauthorized,
    TypeMismatch,
    IllegalOperation,
    NamespaceNotFound,
    CursorNotFound,
    NamespaceExists,
    MaxTimeMSExpired,
    CommandNotFound,
    InvalidNamespace,
    DuplicateKey,
    Interrupted,
    /// Numbered assertion without a symbolic name, reported as `Location<n>`
    Location(i32),
}

impl ErrorCode {
    /// Numeric code as sent on the wire
    #[must_use]
    pub fn code(self) -> i32 {
        match self {
            ErrorCode::InternalError => 1,
            ErrorCode::BadValue => 2,
            ErrorCode::FailedToParse => 9,
            ErrorCode::Unauthorized => 13,
            ErrorCode::TypeMismatch => 14,
            ErrorCode::IllegalOperation => 20,
            ErrorCode::NamespaceNotFound => 26,
            ErrorCode::CursorNotFound => 43,
            ErrorCode::NamespaceExists => 48,
            ErrorCode::MaxTimeMSExpired => 50,
            ErrorCode::CommandNotFound => 59,
            ErrorCode::InvalidNamespace => 73,
            ErrorCode::DuplicateKey => 11000,
            ErrorCode::Interrupted => 11601,
            ErrorCode::Location(code) => code,
        }
    }

    /// Symbolic name as sent in `codeName`
    #[must_use]
    pub fn name(self) -> String {
        match self {
            ErrorCode::InternalError => "InternalError".to_string(),
            ErrorCode::BadValue => "BadValue".to_string(),
            ErrorCode::FailedToParse => "FailedToParse".to_string(),
            ErrorCode::Unauthorized => "Unauthorized".to_string(),
            ErrorCode::TypeMismatch => "TypeMismatch".to_string(),
            ErrorCode::IllegalOperation => "IllegalOperation".to_string(),
            ErrorCode::NamespaceNotFound => "NamespaceNotFound".to_string(),
            ErrorCode::CursorNotFound => "CursorNotFound".to_string(),
            ErrorCode::NamespaceExists => "NamespaceExists".to_string(),
            ErrorCode::MaxTimeMSExpired => "MaxTimeMSExpired".to_string(),
            ErrorCode::CommandNotFound => "CommandNotFound".to_string(),
            ErrorCode::InvalidNamespace => "InvalidNamespace".to_string(),
            ErrorCode::DuplicateKey => "DuplicateKey".to_string(),
            ErrorCode::Interrupted => "Interrupted".to_string(),
            ErrorCode::Location(code) => format!("Location{}", code),
        }
    }

    /// Map a numeric code back to its variant
    #[must_use]
    pub fn from_code(code: i32) -> Self {
        match code {
            1 => ErrorCode::InternalError,
            2 => ErrorCode::BadValue,
            9 => ErrorCode::FailedToParse,
            13 => ErrorCode::Unauthorized,
            14 => ErrorCode::TypeMismatch,
            20 => ErrorCode::IllegalOperation,
            26 => ErrorCode::NamespaceNotFound,
            43 => ErrorCode::CursorNotFound,
            48 => ErrorCode::NamespaceExists,
            50 => ErrorCode::MaxTimeMSExpired,
            59 => ErrorCode::CommandNotFound,
            73 => ErrorCode::InvalidNamespace,
            11000 => ErrorCode::DuplicateKey,
            11601 => ErrorCode::Interrupted,
            other => ErrorCode::Location(other),
        }
    }

    /// Taxonomy class a code falls into when it is raised without context
    #[must_use]
    pub fn default_kind(self) -> ErrorKind {
        match self {
            ErrorCode::FailedToParse
            | ErrorCode::BadValue
            | ErrorCode::TypeMismatch
            | ErrorCode::InvalidNamespace
            | ErrorCode::Location(40323 | 40324 | 51024) => ErrorKind::FailedToParse,
            ErrorCode::CommandNotFound | ErrorCode::IllegalOperation => {
                ErrorKind::UnsupportedCommand
            }
            ErrorCode::CursorNotFound => ErrorKind::CursorNotFound,
            ErrorCode::Interrupted | ErrorCode::MaxTimeMSExpired => ErrorKind::OperationAborted,
            _ => ErrorKind::BackendError,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}) {}", self.code(), self.name())
    }
}

/// Failure classes of the command pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The request could not be decoded into a command
    MalformedRequest,
    /// No handler is registered for the command name
    UnsupportedCommand,
    /// A command option is missing or has the wrong shape
    FailedToParse,
    /// Batch fetch against an unknown or released cursor
    CursorNotFound,
    /// Cancellation or deadline during execution; retryable
    OperationAborted,
    /// Failure reported by the storage backend
    BackendError,
}

/// A command failure reported back to the client
#[derive(Error, Debug, Clone, PartialEq)]
#[error("{code}: {message}")]
pub struct CommandError {
    kind: ErrorKind,
    code: ErrorCode,
    message: String,
    field: Option<String>,
}

impl CommandError {
    pub fn new(kind: ErrorKind, code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            kind,
            code,
            message: message.into(),
            field: None,
        }
    }

    /// Error whose kind follows from its code
    pub fn from_code(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::new(code.default_kind(), code, message)
    }

    /// Attach the offending field name
    #[must_use]
    pub fn with_field(mut self, field: impl Into<String>) -> Self {
        self.field = Some(field.into());
        self
    }

    pub fn malformed(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::MalformedRequest, ErrorCode::BadValue, message)
    }

    pub fn command_not_found(name: &str) -> Self {
        Self::new(
            ErrorKind::UnsupportedCommand,
            ErrorCode::CommandNotFound,
            format!("no such command: '{}'", name),
        )
    }

    pub fn failed_to_parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedToParse, ErrorCode::FailedToParse, message)
    }

    pub fn bad_value(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FailedToParse, ErrorCode::BadValue, message)
    }

    /// `BSON field '<field>' is the wrong type '<actual>', expected type '<expected>'`
    pub fn type_mismatch(field: &str, actual: &str, expected: &str) -> Self {
        Self::new(
            ErrorKind::FailedToParse,
            ErrorCode::TypeMismatch,
            format!(
                "BSON field '{}' is the wrong type '{}', expected type '{}'",
                field, actual, expected
            ),
        )
        .with_field(field)
    }

    pub fn cursor_not_found(id: i64) -> Self {
        Self::new(
            ErrorKind::CursorNotFound,
            ErrorCode::CursorNotFound,
            format!("cursor id {} not found", id),
        )
    }

    pub fn interrupted() -> Self {
        Self::new(
            ErrorKind::OperationAborted,
            ErrorCode::Interrupted,
            "operation was interrupted",
        )
    }

    pub fn max_time_expired() -> Self {
        Self::new(
            ErrorKind::OperationAborted,
            ErrorCode::MaxTimeMSExpired,
            "operation exceeded time limit",
        )
    }

    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::BackendError, ErrorCode::InternalError, message)
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn code(&self) -> ErrorCode {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn field(&self) -> Option<&str> {
        self.field.as_deref()
    }

    /// Whether the client may retry the same request unchanged
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::OperationAborted
    }
}
