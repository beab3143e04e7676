//! MySQL backend over a single `sqlx` connection.
//!
//! # Architecture
//!
//! `MySqlBackend` turns a [`MySqlConfig`] into `sqlx` connect options and the
//! session setup statements. `MySqlHandle` runs statements on one
//! `sqlx::MySqlConnection`:
//! - statements without parameters go through the text protocol
//! - statements with parameters are prepared
//! - every cell is decoded to text
//!
//! Server failures keep the server's message and error number. Lost sessions
//! are reported with the gone-away sentinel so the classifier can spot them.

use crate::config::{ConnectionOptions, MySqlConfig};
use crate::db::classifier::{CODE_USER_DEFINED, GONE_AWAY_SENTINEL};
use crate::db::driver::{Backend, DriverError, NativeConnection, SetupStatement, StatementOutput};
use crate::db::params::{BoundValue, bind_mysql_param};
use crate::db::retry::RetryingConnection;
use crate::error::CODE_SERVER_GONE_AWAY;
use crate::models::{DATE_FORMAT, DATE_TIME_FORMAT, Params};
use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value as JsonValue;
use sqlx::mysql::{
    MySqlConnectOptions, MySqlDatabaseError, MySqlRow, MySqlSslMode, MySqlTypeInfo, MySqlValueRef,
};
use sqlx::{Column, Connection as _, Decode, Either, Executor, Row, Type, TypeInfo, ValueRef};
use std::sync::Arc;
use tracing::{debug, error};

/// Client error number for a connection lost during a query.
const CODE_LOST_CONNECTION: i64 = 2013;

/// A retrying connection to MySQL.
pub type MySqlConnection = RetryingConnection<MySqlBackend>;

impl RetryingConnection<MySqlBackend> {
    /// Build a lazily connecting MySQL connection from its descriptor.
    pub fn from_config(config: impl Into<Arc<MySqlConfig>>) -> Self {
        Self::new(MySqlBackend::new(config))
    }
}

// =============================================================================
// Backend
// =============================================================================

/// Opens `sqlx` connections for one MySQL descriptor.
#[derive(Debug, Clone)]
pub struct MySqlBackend {
    config: Arc<MySqlConfig>,
}

impl MySqlBackend {
    pub fn new(config: impl Into<Arc<MySqlConfig>>) -> Self {
        Self {
            config: config.into(),
        }
    }

    pub fn config(&self) -> &MySqlConfig {
        &self.config
    }

    /// Build the `sqlx` connect options, applying supported driver options.
    pub fn connect_options(&self) -> Result<MySqlConnectOptions, DriverError> {
        let access = self.config.access();
        let mut options = MySqlConnectOptions::new()
            .host(access.host())
            .port(access.port())
            .username(access.username())
            .charset(self.config.charset())
            // session time zone and sql_mode are set only by the setup statements
            .timezone(None::<String>)
            .pipes_as_concat(false)
            .no_engine_substitution(false);

        if !access.password().is_empty() {
            options = options.password(access.password());
        }
        if !self.config.database().is_empty() {
            options = options.database(self.config.database());
        }

        for (key, value) in self.config.options().driver_options() {
            let raw = option_text(value);
            match key.as_str() {
                "ssl_mode" => {
                    let mode = raw.parse::<MySqlSslMode>().map_err(|e| {
                        DriverError::new(format!("Invalid ssl_mode '{raw}': {e}"), 0)
                    })?;
                    options = options.ssl_mode(mode);
                }
                "statement_cache_capacity" => {
                    let capacity = raw.parse::<usize>().map_err(|e| {
                        DriverError::new(
                            format!("Invalid statement_cache_capacity '{raw}': {e}"),
                            0,
                        )
                    })?;
                    options = options.statement_cache_capacity(capacity);
                }
                other => debug!(option = other, "Ignoring unsupported driver option"),
            }
        }

        Ok(options)
    }
}

fn option_text(value: &JsonValue) -> String {
    match value {
        JsonValue::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[async_trait]
impl Backend for MySqlBackend {
    type Handle = MySqlHandle;

    fn backend_type(&self) -> &'static str {
        "mysql"
    }

    fn options(&self) -> &ConnectionOptions {
        self.config.options()
    }

    fn retry_on_transient_loss(&self) -> bool {
        self.config.retry_on_gone_away()
    }

    async fn open(&self) -> Result<MySqlHandle, DriverError> {
        let options = self.connect_options()?;
        debug!(
            host = %self.config.access().host(),
            port = self.config.access().port(),
            database = %self.config.database(),
            persistent = self.config.persistent(),
            "Opening MySQL connection"
        );
        let conn = sqlx::MySqlConnection::connect_with(&options)
            .await
            .map_err(|e| connect_error(&e))?;
        Ok(MySqlHandle::new(conn))
    }

    fn session_setup(&self) -> Vec<SetupStatement> {
        let mut statements = vec![SetupStatement::new(format!(
            "SET NAMES {}",
            self.config.charset()
        ))];
        if self.config.strict_mode() {
            statements.push(SetupStatement::new("SET @@SESSION.sql_mode = 'TRADITIONAL'"));
        }
        if let Some(timezone) = self.config.timezone() {
            let prefix = self.config.options().param_prefix();
            statements.push(
                SetupStatement::new(format!("SET time_zone = :{prefix}tz"))
                    .with_params(Params::new().with("tz", timezone)),
            );
        }
        statements
    }
}

// =============================================================================
// Handle
// =============================================================================

/// One open `sqlx` MySQL connection.
pub struct MySqlHandle {
    conn: Option<sqlx::MySqlConnection>,
    last_insert_id: u64,
}

impl MySqlHandle {
    fn new(conn: sqlx::MySqlConnection) -> Self {
        Self {
            conn: Some(conn),
            last_insert_id: 0,
        }
    }

    fn conn_mut(&mut self) -> Result<&mut sqlx::MySqlConnection, DriverError> {
        self.conn.as_mut().ok_or_else(gone_away)
    }

    async fn run_plain(&mut self, sql: &str) -> Result<(), DriverError> {
        self.conn_mut()?
            .execute(sql)
            .await
            .map(|_| ())
            .map_err(|e| runtime_error(&e))
    }
}

#[async_trait]
impl NativeConnection for MySqlHandle {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[&BoundValue],
    ) -> Result<StatementOutput, DriverError> {
        let conn = self.conn.as_mut().ok_or_else(gone_away)?;
        let mut output = StatementOutput::default();
        let mut last_insert_id = self.last_insert_id;

        {
            // When params is empty, use the text protocol; some statements can't be prepared
            let mut stream = if params.is_empty() {
                conn.fetch_many(sql)
            } else {
                let mut query = sqlx::query(sql);
                for value in params {
                    query = bind_mysql_param(query, *value);
                }
                conn.fetch_many(query)
            };

            while let Some(item) = stream.next().await {
                match item.map_err(|e| runtime_error(&e))? {
                    Either::Left(done) => {
                        output.rows_affected += done.rows_affected();
                        last_insert_id = done.last_insert_id();
                    }
                    Either::Right(row) => {
                        if output.columns.is_empty() {
                            output.columns = row
                                .columns()
                                .iter()
                                .map(|c| c.name().to_string())
                                .collect();
                        }
                        output.rows.push(decode_row(&row));
                    }
                }
            }
        }

        self.last_insert_id = last_insert_id;
        Ok(output)
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.run_plain("START TRANSACTION").await
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.run_plain("COMMIT").await
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.run_plain("ROLLBACK").await
    }

    fn quote(&self, value: &BoundValue) -> Result<String, DriverError> {
        Ok(quote_literal(value))
    }

    fn last_insert_id(&self, _name: Option<&str>) -> Result<String, DriverError> {
        Ok(self.last_insert_id.to_string())
    }

    async fn close(&mut self) {
        if let Some(conn) = self.conn.take() {
            if let Err(e) = conn.close().await {
                debug!(error = %e, "Error while closing MySQL connection");
            }
        }
    }
}

/// Quote a value as a MySQL literal, escaping like `mysql_real_escape_string`.
pub fn quote_literal(value: &BoundValue) -> String {
    match value {
        BoundValue::Null => "NULL".to_string(),
        BoundValue::Bool(v) => if *v { "1" } else { "0" }.to_string(),
        BoundValue::Int(v) => v.to_string(),
        BoundValue::Str(s) => {
            let mut quoted = String::with_capacity(s.len() + 2);
            quoted.push('\'');
            for c in s.chars() {
                match c {
                    '\0' => quoted.push_str("\\0"),
                    '\n' => quoted.push_str("\\n"),
                    '\r' => quoted.push_str("\\r"),
                    '\x1a' => quoted.push_str("\\Z"),
                    '\\' | '\'' | '"' => {
                        quoted.push('\\');
                        quoted.push(c);
                    }
                    _ => quoted.push(c),
                }
            }
            quoted.push('\'');
            quoted
        }
    }
}

// =============================================================================
// Error Translation
// =============================================================================

fn gone_away() -> DriverError {
    DriverError::new(GONE_AWAY_SENTINEL, 0)
}

/// Translate a failure of a running session.
pub(crate) fn runtime_error(err: &sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db) => {
            if db.code().as_deref() == Some("45000") {
                return DriverError::new(db.message(), CODE_USER_DEFINED);
            }
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| i64::from(e.number()))
                .unwrap_or(0);
            if number == CODE_SERVER_GONE_AWAY || number == CODE_LOST_CONNECTION {
                gone_away()
            } else {
                DriverError::new(db.message(), number)
            }
        }
        sqlx::Error::Io(_) | sqlx::Error::Protocol(_) | sqlx::Error::WorkerCrashed => gone_away(),
        other => DriverError::new(other.to_string(), 0),
    }
}

/// Translate a failure to establish a session.
pub(crate) fn connect_error(err: &sqlx::Error) -> DriverError {
    match err {
        sqlx::Error::Database(db) => {
            let number = db
                .try_downcast_ref::<MySqlDatabaseError>()
                .map(|e| i64::from(e.number()))
                .unwrap_or(0);
            DriverError::new(db.message(), number)
        }
        other => DriverError::new(other.to_string(), 0),
    }
}

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for MySQL column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Date,
    DateTime,
    Time,
    Binary,
    Text,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }
    if lower == "boolean" || lower == "bool" {
        return TypeCategory::Boolean;
    }
    if lower.contains("int") || lower == "year" {
        return TypeCategory::Integer;
    }
    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }
    if lower == "date" {
        return TypeCategory::Date;
    }
    if lower == "datetime" || lower == "timestamp" {
        return TypeCategory::DateTime;
    }
    if lower == "time" {
        return TypeCategory::Time;
    }
    if lower.contains("blob") || lower.contains("binary") || lower == "bit" {
        return TypeCategory::Binary;
    }

    // varchar, text, char, enum, set, json, ...
    TypeCategory::Text
}

/// DECIMAL value kept in its exact server representation.
#[derive(Debug)]
struct RawDecimal(String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

/// Binary data as UTF-8 text when valid, base64 otherwise.
pub fn decode_binary_value(bytes: &[u8]) -> String {
    use base64::{Engine as _, engine::general_purpose::STANDARD};

    match std::str::from_utf8(bytes) {
        Ok(s) => s.to_string(),
        Err(_) => STANDARD.encode(bytes),
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

fn decode_row(row: &MySqlRow) -> Vec<Option<String>> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            let is_null = row.try_get_raw(idx).map(|v| v.is_null()).unwrap_or(true);
            if is_null {
                return None;
            }
            let type_name = column.type_info().name();
            decode_cell(row, idx, categorize_type(type_name)).or_else(|| {
                error!(column = %column.name(), type_name, "Failed to decode column value");
                None
            })
        })
        .collect()
}

fn decode_cell(row: &MySqlRow, idx: usize, category: TypeCategory) -> Option<String> {
    let decoded = match category {
        TypeCategory::Decimal => row.try_get::<RawDecimal, _>(idx).ok().map(|v| v.0),
        TypeCategory::Integer => row
            .try_get::<i64, _>(idx)
            .map(|v| v.to_string())
            .or_else(|_| row.try_get::<u64, _>(idx).map(|v| v.to_string()))
            .ok(),
        TypeCategory::Boolean => row
            .try_get::<bool, _>(idx)
            .ok()
            .map(|v| if v { "1" } else { "0" }.to_string()),
        TypeCategory::Float => row
            .try_get::<f64, _>(idx)
            .map(|v| v.to_string())
            .or_else(|_| row.try_get::<f32, _>(idx).map(|v| v.to_string()))
            .ok(),
        TypeCategory::Date => row
            .try_get::<chrono::NaiveDate, _>(idx)
            .ok()
            .map(|v| v.format(DATE_FORMAT).to_string()),
        TypeCategory::DateTime => row
            .try_get::<chrono::NaiveDateTime, _>(idx)
            .ok()
            .map(|v| v.format(DATE_TIME_FORMAT).to_string()),
        TypeCategory::Time => row
            .try_get::<chrono::NaiveTime, _>(idx)
            .ok()
            .map(|v| v.format("%H:%M:%S").to_string()),
        TypeCategory::Binary => row
            .try_get::<Vec<u8>, _>(idx)
            .ok()
            .map(|v| decode_binary_value(&v)),
        TypeCategory::Text => row.try_get::<String, _>(idx).ok(),
    };

    // Fall back to the raw bytes for anything the typed decoders reject
    decoded.or_else(|| {
        row.try_get_unchecked::<Vec<u8>, _>(idx)
            .ok()
            .map(|v| decode_binary_value(&v))
    })
}
