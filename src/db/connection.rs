//! Connection lifecycle and statement execution.
//!
//! A `Connection` owns exactly one native handle. It connects lazily on first
//! use (or eagerly with [`Connection::open`]), binds parameters, runs
//! statements, keeps the nested transaction accounting and reports driver
//! failures as `DbError::Query`. Classification of those failures is layered
//! on top by [`RetryingConnection`](crate::db::RetryingConnection).
//!
//! A connection is not synchronised. Calls on one instance must be sequential;
//! the `&mut self` receivers enforce that.

use crate::db::classifier::split_state_prefix;
use crate::db::driver::{Backend, DriverError, NativeConnection, StatementOutput};
use crate::db::observer::{QueryObserver, QueryStartEvent};
use crate::db::pagination::{FOUND_ROWS_QUERY, paginate};
use crate::db::params::{ParameterBinder, expand_named_placeholders};
use crate::db::result::QueryResult;
use crate::db::transaction::{Completion, TransactionAccountant};
use crate::error::{DbError, DbResult};
use crate::models::{Params, QueryParam};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Rows of one page, plus the total row count when it was requested.
#[derive(Debug)]
pub struct PagedResult {
    pub rows: QueryResult,
    pub total: Option<u64>,
}

/// Capability interface shared by every connection flavour.
#[async_trait]
pub trait DbConnection: Send {
    /// Open a fresh native handle, replacing any current one.
    async fn connect(&mut self) -> DbResult<()>;

    /// Release the native handle. Never fails.
    async fn disconnect(&mut self);

    /// Run a statement with named parameters, connecting first if needed.
    async fn execute(&mut self, query: &str, params: &Params) -> DbResult<QueryResult>;

    /// Open a transaction level and return the new depth.
    async fn begin_transaction(&mut self) -> DbResult<i64>;

    /// Close a transaction level.
    ///
    /// At the outermost level returns whether a commit happened. At an inner
    /// level returns the current poison status and touches nothing.
    async fn complete_transaction(&mut self) -> DbResult<bool>;

    /// Mark the open transaction as failed so it rolls back on completion.
    fn fail_transaction(&mut self);

    /// Run one page of a query.
    ///
    /// The query must not carry its own `LIMIT`/`OFFSET`. With `with_count`
    /// the first uppercase `SELECT` gets `SQL_CALC_FOUND_ROWS` and a second
    /// statement reads the total.
    async fn execute_paged(
        &mut self,
        query: &str,
        params: &Params,
        page: u64,
        per_page: u64,
        with_count: bool,
    ) -> DbResult<PagedResult> {
        let rows = self
            .execute(&paginate(query, page, per_page, with_count), params)
            .await?;

        let total = if with_count {
            let mut found = self.execute(FOUND_ROWS_QUERY, &Params::new()).await?;
            let total = found
                .fetch_column(0)
                .flatten()
                .map(|v| v.trim().parse::<u64>())
                .transpose()
                .map_err(|e| DbError::decode(format!("Invalid FOUND_ROWS() value: {e}")))?
                .unwrap_or(0);
            Some(total)
        } else {
            None
        };

        Ok(PagedResult { rows, total })
    }
}

/// Escape `_`, `%` and the escape character itself for a `LIKE ... ESCAPE`
/// pattern. Not a general purpose SQL escape.
pub fn escape_wildcards(value: &str, escape: char) -> String {
    let mut escaped = String::with_capacity(value.len() + 4);
    for c in value.chars() {
        if c == '_' || c == '%' || c == escape {
            escaped.push(escape);
        }
        escaped.push(c);
    }
    escaped
}

fn query_error(err: DriverError) -> DbError {
    let (message, code) = split_state_prefix(&err.message, err.code);
    DbError::query(message, code)
}

fn connection_error(err: DriverError) -> DbError {
    let (message, code) = split_state_prefix(&err.message, err.code);
    DbError::connection(message, code)
}

/// One native connection plus its transaction accounting.
pub struct Connection<B: Backend> {
    backend: B,
    handle: Option<B::Handle>,
    transactions: TransactionAccountant,
    binder: ParameterBinder,
    observer: Option<Arc<dyn QueryObserver>>,
}

impl<B: Backend> Connection<B> {
    /// Create a connection that opens its handle on first use.
    pub fn new(backend: B) -> Self {
        let binder = ParameterBinder::new(backend.options().param_prefix());
        Self {
            backend,
            handle: None,
            transactions: TransactionAccountant::new(),
            binder,
            observer: None,
        }
    }

    /// Create a connection and open its handle right away.
    pub async fn open(backend: B) -> DbResult<Self> {
        let mut connection = Self::new(backend);
        connection.connect().await?;
        Ok(connection)
    }

    /// Attach an observer for statement events.
    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn QueryObserver>>) {
        self.observer = observer;
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn connection_name(&self) -> &str {
        self.backend.options().connection_name()
    }

    /// Prefix prepended to every parameter name when binding.
    pub fn param_prefix(&self) -> &str {
        self.backend.options().param_prefix()
    }

    pub fn is_connected(&self) -> bool {
        self.handle.is_some()
    }

    pub fn transaction_depth(&self) -> i64 {
        self.transactions.depth()
    }

    pub fn is_transaction_failed(&self) -> bool {
        self.transactions.is_poisoned()
    }

    /// Open a fresh native handle and run the backend's session setup.
    ///
    /// A current handle is closed first. The transaction accounting is left
    /// alone: a transaction open on the old handle is gone on the server but
    /// still counted here.
    pub async fn connect(&mut self) -> DbResult<()> {
        if let Some(mut old) = self.handle.take() {
            debug!(connection = %self.connection_name(), "Replacing open handle");
            old.close().await;
        }

        let handle = match self.backend.open().await {
            Ok(handle) => handle,
            Err(e) => {
                self.forget_transactions();
                let err = connection_error(e);
                warn!(
                    backend = self.backend.backend_type(),
                    connection = %self.connection_name(),
                    error = %err,
                    "Failed to connect"
                );
                return Err(err);
            }
        };
        self.handle = Some(handle);

        for statement in self.backend.session_setup() {
            if let Err(e) = self.run_statement(&statement.sql, &statement.params).await {
                warn!(
                    connection = %self.connection_name(),
                    statement = %statement.sql,
                    error = %e,
                    "Session setup failed"
                );
                self.close_handle().await;
                return Err(e);
            }
        }

        info!(
            backend = self.backend.backend_type(),
            connection = %self.connection_name(),
            "Connected"
        );
        Ok(())
    }

    /// Close the native handle. Open transaction levels are dropped with it.
    pub async fn disconnect(&mut self) {
        if self.handle.is_some() {
            self.close_handle().await;
            info!(connection = %self.connection_name(), "Disconnected");
        }
    }

    /// Run a statement with named parameters, connecting first if needed.
    ///
    /// Any failure poisons the open transaction.
    pub async fn execute(&mut self, query: &str, params: &Params) -> DbResult<QueryResult> {
        self.ensure_connected().await?;
        self.run_statement(query, params).await
    }

    /// Open a transaction level. Only the outermost level issues a native BEGIN.
    pub async fn begin_transaction(&mut self) -> DbResult<i64> {
        self.ensure_connected().await?;
        let (depth, outermost) = self.transactions.begin();
        if outermost {
            if let Err(e) = self.handle_mut()?.begin().await {
                self.transactions.reset();
                return Err(query_error(e));
            }
        }
        debug!(connection = %self.connection_name(), depth, "Transaction level opened");
        Ok(depth)
    }

    /// Close a transaction level; see [`DbConnection::complete_transaction`].
    pub async fn complete_transaction(&mut self) -> DbResult<bool> {
        self.ensure_connected().await?;
        let completion = self.transactions.complete();
        debug!(
            connection = %self.connection_name(),
            depth = self.transactions.depth(),
            ?completion,
            "Transaction level closed"
        );
        match completion {
            Completion::Commit => {
                self.handle_mut()?.commit().await.map_err(query_error)?;
                Ok(true)
            }
            Completion::Rollback => {
                self.handle_mut()?.rollback().await.map_err(query_error)?;
                Ok(false)
            }
            Completion::Pending { poisoned } => Ok(poisoned),
        }
    }

    /// Poison the open transaction without a driver error.
    pub fn fail_transaction(&mut self) {
        self.transactions.fail();
    }

    /// Quote a value as an SQL literal, typed the way it would be bound.
    pub async fn quote(&mut self, value: impl Into<QueryParam>) -> DbResult<String> {
        let value = ParameterBinder::infer(&value.into());
        self.ensure_connected().await?;
        self.handle_mut()?.quote(&value).map_err(query_error)
    }

    /// Id generated by the last insert on this connection.
    pub async fn last_insert_id(&mut self, name: Option<&str>) -> DbResult<String> {
        self.ensure_connected().await?;
        self.handle_mut()?.last_insert_id(name).map_err(query_error)
    }

    /// See [`escape_wildcards`].
    pub fn escape_wildcards(&self, value: &str, escape: char) -> String {
        escape_wildcards(value, escape)
    }

    async fn ensure_connected(&mut self) -> DbResult<()> {
        if self.handle.is_none() {
            self.connect().await?;
        }
        Ok(())
    }

    fn handle_mut(&mut self) -> DbResult<&mut B::Handle> {
        self.handle
            .as_mut()
            .ok_or_else(|| DbError::connection("Connection is not open", 0))
    }

    async fn close_handle(&mut self) {
        if let Some(mut handle) = self.handle.take() {
            handle.close().await;
        }
        self.forget_transactions();
    }

    fn forget_transactions(&mut self) {
        if self.transactions.in_transaction() {
            warn!(
                connection = %self.connection_name(),
                depth = self.transactions.depth(),
                "Dropping open transaction levels with the handle"
            );
        }
        self.transactions.reset();
    }

    /// Execute on the current handle without connecting first.
    async fn run_statement(&mut self, query: &str, params: &Params) -> DbResult<QueryResult> {
        let start = self.observer.as_ref().map(|observer| {
            let event = QueryStartEvent::new(
                self.backend.backend_type(),
                self.backend.options().connection_name(),
                query,
                params.clone(),
            );
            observer.on_start(&event);
            event
        });

        let outcome = self.dispatch(query, params).await;

        if let (Some(observer), Some(start)) = (&self.observer, start) {
            let error = outcome.as_ref().err().map(ToString::to_string);
            observer.on_complete(&start.complete(error));
        }

        match outcome {
            Ok(output) => Ok(QueryResult::new(output)),
            Err(e) => {
                self.transactions.fail();
                debug!(
                    connection = %self.connection_name(),
                    code = e.code(),
                    error = %e,
                    "Statement failed"
                );
                Err(e)
            }
        }
    }

    async fn dispatch(&mut self, query: &str, params: &Params) -> DbResult<StatementOutput> {
        let bound = self.binder.bind(params);
        let (sql, values) =
            expand_named_placeholders(query, &bound).map_err(DbError::invalid_input)?;
        debug!(
            connection = %self.connection_name(),
            params = values.len(),
            "Executing: {}",
            query
        );
        self.handle_mut()?
            .execute(&sql, &values)
            .await
            .map_err(query_error)
    }
}

#[async_trait]
impl<B: Backend> DbConnection for Connection<B> {
    async fn connect(&mut self) -> DbResult<()> {
        Connection::connect(self).await
    }

    async fn disconnect(&mut self) {
        Connection::disconnect(self).await
    }

    async fn execute(&mut self, query: &str, params: &Params) -> DbResult<QueryResult> {
        Connection::execute(self, query, params).await
    }

    async fn begin_transaction(&mut self) -> DbResult<i64> {
        Connection::begin_transaction(self).await
    }

    async fn complete_transaction(&mut self) -> DbResult<bool> {
        Connection::complete_transaction(self).await
    }

    fn fail_transaction(&mut self) {
        Connection::fail_transaction(self)
    }
}
