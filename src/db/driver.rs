//! Driver boundary.
//!
//! The connection layer never speaks a wire protocol itself. A `Backend`
//! opens `NativeConnection` handles, and everything the server reports comes
//! back as a `DriverError` with the driver's raw message and numeric code.

use crate::config::ConnectionOptions;
use crate::db::params::BoundValue;
use crate::models::Params;
use async_trait::async_trait;
use std::fmt;

/// A failure reported by the native driver.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub message: String,
    pub code: i64,
}

impl DriverError {
    pub fn new(message: impl Into<String>, code: i64) -> Self {
        Self {
            message: message.into(),
            code,
        }
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (code {})", self.message, self.code)
    }
}

impl std::error::Error for DriverError {}

/// Raw output of one executed statement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatementOutput {
    pub columns: Vec<String>,
    /// Cells as text; `None` is SQL NULL.
    pub rows: Vec<Vec<Option<String>>>,
    pub rows_affected: u64,
}

/// A statement issued right after a handle is opened.
#[derive(Debug, Clone, PartialEq)]
pub struct SetupStatement {
    pub sql: String,
    pub params: Params,
}

impl SetupStatement {
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            params: Params::new(),
        }
    }

    pub fn with_params(mut self, params: Params) -> Self {
        self.params = params;
        self
    }
}

/// One open native connection.
#[async_trait]
pub trait NativeConnection: Send {
    /// Run one statement. `sql` uses positional `?` markers and `params`
    /// holds one value per marker, in order.
    async fn execute(
        &mut self,
        sql: &str,
        params: &[&BoundValue],
    ) -> Result<StatementOutput, DriverError>;

    async fn begin(&mut self) -> Result<(), DriverError>;

    async fn commit(&mut self) -> Result<(), DriverError>;

    async fn rollback(&mut self) -> Result<(), DriverError>;

    /// Quote a value as an SQL literal.
    fn quote(&self, value: &BoundValue) -> Result<String, DriverError>;

    /// Id generated by the last insert. `name` is the sequence name on
    /// backends that use sequences.
    fn last_insert_id(&self, name: Option<&str>) -> Result<String, DriverError>;

    /// Release the handle. Never fails; problems are only logged.
    async fn close(&mut self);
}

/// A database backend: how to open handles and set up a fresh session.
#[async_trait]
pub trait Backend: Send + Sync {
    type Handle: NativeConnection;

    /// Backend name reported to observers, e.g. `"mysql"`.
    fn backend_type(&self) -> &'static str;

    fn options(&self) -> &ConnectionOptions;

    /// Whether a lost session should be reconnected and the statement retried once.
    fn retry_on_transient_loss(&self) -> bool {
        false
    }

    async fn open(&self) -> Result<Self::Handle, DriverError>;

    /// Statements issued on every freshly opened handle.
    fn session_setup(&self) -> Vec<SetupStatement> {
        Vec::new()
    }
}
