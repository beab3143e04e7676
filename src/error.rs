//! Error types for the database access layer.
//!
//! This module defines the error taxonomy callers pattern-match on. Driver
//! failures surface as `Connection` or `Query` errors; the MySQL error
//! classifier refines `Query` errors into `DuplicateEntry`, `ServerGoneAway`
//! and `UserDefined`.

use thiserror::Error;

/// MySQL error number for a duplicate key.
pub const CODE_DUPLICATE_ENTRY: i64 = 1062;

/// MySQL client error number for "server has gone away".
pub const CODE_SERVER_GONE_AWAY: i64 = 2006;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DbError {
    #[error("Connection failed: {message}")]
    Connection { message: String, code: i64 },

    #[error("Query failed: {message}")]
    Query {
        message: String,
        /// Effective code after `SQLSTATE[<n>]` parsing, e.g. 1146 for an unknown table
        code: i64,
    },

    #[error("{}", duplicate_message(.entity.as_deref()))]
    DuplicateEntry { entity: Option<String> },

    #[error("MySQL server has gone away")]
    ServerGoneAway,

    #[error("User defined error {code}: {message}")]
    UserDefined { code: i64, message: String },

    #[error("Decode error: {message}")]
    Decode { message: String },

    #[error("Invalid input: {message}")]
    InvalidInput { message: String },
}

fn duplicate_message(entity: Option<&str>) -> String {
    match entity {
        Some(name) if !name.is_empty() => format!("{name} already exists"),
        _ => "Entity already exists".to_string(),
    }
}

impl DbError {
    /// Create a connection error.
    pub fn connection(message: impl Into<String>, code: i64) -> Self {
        Self::Connection {
            message: message.into(),
            code,
        }
    }

    /// Create an unclassified query error.
    pub fn query(message: impl Into<String>, code: i64) -> Self {
        Self::Query {
            message: message.into(),
            code,
        }
    }

    /// Create a duplicate entry error, optionally naming the entity.
    pub fn duplicate_entry(entity: Option<String>) -> Self {
        Self::DuplicateEntry { entity }
    }

    /// Create a user defined (SIGNAL) error.
    pub fn user_defined(code: i64, message: impl Into<String>) -> Self {
        Self::UserDefined {
            code,
            message: message.into(),
        }
    }

    /// Create a decode error.
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
        }
    }

    /// Numeric code carried by this error.
    pub fn code(&self) -> i64 {
        match self {
            Self::Connection { code, .. } => *code,
            Self::Query { code, .. } => *code,
            Self::DuplicateEntry { .. } => CODE_DUPLICATE_ENTRY,
            Self::ServerGoneAway => CODE_SERVER_GONE_AWAY,
            Self::UserDefined { code, .. } => *code,
            Self::Decode { .. } | Self::InvalidInput { .. } => 0,
        }
    }

    /// Name the entity of an anonymous duplicate entry error.
    ///
    /// Other errors, and duplicates that already carry a name, pass through
    /// unchanged.
    pub fn for_entity(self, entity: impl Into<String>) -> Self {
        match self {
            Self::DuplicateEntry { entity: None } => Self::DuplicateEntry {
                entity: Some(entity.into()),
            },
            other => other,
        }
    }

    /// Get a hint for recovering from this error, if one applies.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Connection { .. } => {
                Some("Check the host, port and credentials, and that the server is running")
            }
            Self::DuplicateEntry { .. } => Some("Update the existing row instead of inserting"),
            Self::ServerGoneAway => {
                Some("Enable retry_on_gone_away or reconnect before issuing the statement again")
            }
            Self::InvalidInput { .. } => Some("Bind a value for every placeholder in the statement"),
            _ => None,
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Connection { .. } | Self::ServerGoneAway)
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
