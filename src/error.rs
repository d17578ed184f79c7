//! Error types for the PostgreSQL driver.
//!
//! Errors are split by layer: transport (`Io`, `ConnectionClosed`), protocol
//! (`Protocol`), session setup (`Config`, `Auth`), server-reported query
//! errors (`Database`), and per-column decode failures (`Decode`).

use std::collections::HashMap;
use std::fmt;
use std::io;

use thiserror::Error;

use crate::types::Oid;

/// Result type for driver operations.
pub type PgResult<T> = Result<T, PgError>;

/// Errors that can occur while talking to a PostgreSQL server.
#[derive(Error, Debug)]
pub enum PgError {
    /// I/O error on the underlying socket. Fatal to the connection.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Malformed frame, unexpected message, or unsupported protocol
    /// feature. Fatal to the connection.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Authentication was rejected or used an unsupported method.
    #[error("Authentication failed: {0}")]
    Auth(String),

    /// The connection string could not be parsed.
    #[error("Invalid connection string: {0}")]
    Config(String),

    /// The connection is closed; every pending and future operation on it
    /// fails with this error.
    #[error("Connection is closed")]
    ConnectionClosed,

    /// The server reported an error for the in-flight statement.
    #[error(transparent)]
    Database(Box<DatabaseError>),

    /// A result column could not be decoded from its binary payload.
    /// Non-fatal: the connection stays usable once ReadyForQuery arrives.
    #[error("cannot decode column {column:?} of type oid {oid}: {message}")]
    Decode {
        column: String,
        oid: Oid,
        message: String,
    },
}

impl PgError {
    /// Attach the column name to a decode failure raised inside the codec
    /// registry, which only knows the OID.
    pub(crate) fn at_column(mut self, name: &str) -> Self {
        if let PgError::Decode { column, .. } = &mut self {
            *column = name.to_string();
        }
        self
    }

    pub(crate) fn decode(oid: Oid, message: impl Into<String>) -> Self {
        PgError::Decode {
            column: String::new(),
            oid,
            message: message.into(),
        }
    }

    /// Whether this error leaves the connection unusable.
    pub fn is_fatal(&self) -> bool {
        match self {
            PgError::Io(_) | PgError::Protocol(_) | PgError::ConnectionClosed => true,
            PgError::Database(e) => e.is_fatal(),
            _ => false,
        }
    }
}

// ============================================================================
// Server-reported errors
// ============================================================================

/// An error reported by the server via an ErrorResponse message.
#[derive(Debug, Clone)]
pub struct DatabaseError {
    /// Severity: ERROR, FATAL, or PANIC.
    pub severity: String,
    /// 5-character SQLSTATE code.
    pub sqlstate: String,
    /// Primary human-readable message.
    pub message: String,
    pub detail: Option<String>,
    pub hint: Option<String>,
}

impl DatabaseError {
    /// Build from the tagged field list of an ErrorResponse.
    ///
    /// Field tags per the protocol: 'S' severity, 'C' code, 'M' message,
    /// 'D' detail, 'H' hint.
    pub fn from_fields(fields: &HashMap<u8, String>) -> Self {
        Self {
            severity: fields.get(&b'S').cloned().unwrap_or_default(),
            sqlstate: fields.get(&b'C').cloned().unwrap_or_default(),
            message: fields.get(&b'M').cloned().unwrap_or_default(),
            detail: fields.get(&b'D').cloned(),
            hint: fields.get(&b'H').cloned(),
        }
    }

    /// Classify by SQLSTATE. Specific integrity subcodes are distinguished
    /// before falling back to the two-character class prefix.
    pub fn kind(&self) -> ErrorKind {
        match self.sqlstate.as_str() {
            "23505" => return ErrorKind::UniqueViolation,
            "23503" => return ErrorKind::ForeignKeyViolation,
            "23502" => return ErrorKind::NotNullViolation,
            "23514" => return ErrorKind::CheckViolation,
            _ => {}
        }
        match self.sqlstate.get(..2) {
            Some("23") => ErrorKind::IntegrityConstraintViolation,
            Some("08") => ErrorKind::ConnectionException,
            Some("28") => ErrorKind::InvalidAuthorization,
            Some("42") => ErrorKind::SyntaxOrAccessRuleViolation,
            _ => ErrorKind::Other,
        }
    }

    /// FATAL and PANIC severities terminate the backend session.
    pub fn is_fatal(&self) -> bool {
        matches!(self.severity.as_str(), "FATAL" | "PANIC")
    }
}

impl fmt::Display for DatabaseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} ({})", self.severity, self.message, self.sqlstate)?;
        if let Some(d) = &self.detail {
            write!(f, "\nDetail: {}", d)?;
        }
        if let Some(h) = &self.hint {
            write!(f, "\nHint: {}", h)?;
        }
        Ok(())
    }
}

impl std::error::Error for DatabaseError {}

impl From<DatabaseError> for PgError {
    fn from(e: DatabaseError) -> Self {
        PgError::Database(Box::new(e))
    }
}

/// Error classes derived from the SQLSTATE code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// 23505
    UniqueViolation,
    /// 23503
    ForeignKeyViolation,
    /// 23502
    NotNullViolation,
    /// 23514
    CheckViolation,
    /// Class 23, other subcodes
    IntegrityConstraintViolation,
    /// Class 08
    ConnectionException,
    /// Class 28
    InvalidAuthorization,
    /// Class 42
    SyntaxOrAccessRuleViolation,
    Other,
}
