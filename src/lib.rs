//! MySQL database access layer.
//!
//! This library wraps one native connection per instance and provides
//! parameter binding, nested transaction accounting, pagination and a typed
//! error taxonomy with a one-shot reconnect when the server has gone away.

pub mod config;
pub mod db;
pub mod error;
pub mod models;

pub use config::{AccessConfig, Config, ConnectionOptions, MySqlConfig};
pub use db::{Connection, ConnectionFactory, DbConnection, MySqlConnection, RetryingConnection};
pub use error::{DbError, DbResult};
pub use models::{Params, QueryParam};
