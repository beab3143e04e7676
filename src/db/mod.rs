//! Database access layer.
//!
//! This module provides:
//! - The driver boundary (`Backend`, `NativeConnection`)
//! - `Connection` with nested transaction accounting
//! - `RetryingConnection` with MySQL error classification and one-shot reconnect
//! - The MySQL backend over `sqlx`
//! - Pagination, parameter binding and the row cursor
//! - Statement observers and WHERE clause builders

pub mod classifier;
pub mod conditions;
pub mod connection;
pub mod driver;
pub mod factory;
#[macro_use]
pub mod macros;
pub mod mysql;
pub mod observer;
pub mod pagination;
pub mod params;
pub mod result;
pub mod retry;
pub mod transaction;

pub use classifier::{ClassifiedError, ErrorClassifier, GONE_AWAY_SENTINEL};
pub use conditions::{ConditionBuilder, Conditions};
pub use connection::{Connection, DbConnection, PagedResult, escape_wildcards};
pub use driver::{Backend, DriverError, NativeConnection, SetupStatement, StatementOutput};
pub use factory::ConnectionFactory;
pub use mysql::{MySqlBackend, MySqlConnection, MySqlHandle};
pub use observer::{QueryCompleteEvent, QueryObserver, QueryStartEvent, TracingObserver};
pub use pagination::{FOUND_ROWS_QUERY, paginate};
pub use params::{BoundParam, BoundValue, ParamType, ParameterBinder};
pub use result::{QueryResult, Row};
pub use retry::RetryingConnection;
pub use transaction::{Completion, TransactionAccountant};
