//! Classified execution with a one-shot reconnect on lost sessions.

use crate::db::classifier::ErrorClassifier;
use crate::db::connection::{Connection, DbConnection};
use crate::db::driver::Backend;
use crate::db::observer::QueryObserver;
use crate::db::result::QueryResult;
use crate::error::{DbError, DbResult};
use crate::models::{Params, QueryParam};
use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;

/// A [`Connection`] whose driver failures are classified, and whose statements
/// are retried once after a reconnect when the server went away and the
/// backend allows it.
///
/// The retry reconnects in place. Transaction accounting is kept as is even
/// though the server already discarded the open transaction, so a statement
/// retried inside a transaction runs in autocommit mode.
pub struct RetryingConnection<B: Backend> {
    inner: Connection<B>,
    classifier: ErrorClassifier,
}

impl<B: Backend> RetryingConnection<B> {
    /// Create a lazily connecting retrying connection.
    pub fn new(backend: B) -> Self {
        Self::from_connection(Connection::new(backend))
    }

    pub fn from_connection(inner: Connection<B>) -> Self {
        Self {
            inner,
            classifier: ErrorClassifier::new(),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn QueryObserver>) -> Self {
        self.inner.set_observer(Some(observer));
        self
    }

    pub fn inner(&self) -> &Connection<B> {
        &self.inner
    }

    pub fn inner_mut(&mut self) -> &mut Connection<B> {
        &mut self.inner
    }

    pub fn into_inner(self) -> Connection<B> {
        self.inner
    }

    pub async fn connect(&mut self) -> DbResult<()> {
        self.inner.connect().await
    }

    pub async fn disconnect(&mut self) {
        self.inner.disconnect().await
    }

    pub fn is_connected(&self) -> bool {
        self.inner.is_connected()
    }

    /// Run a statement; see [`Connection::execute`].
    pub async fn execute(&mut self, query: &str, params: &Params) -> DbResult<QueryResult> {
        self.execute_classified(query, params, None).await
    }

    /// Run a statement, naming the entity reported by a duplicate entry error.
    pub async fn execute_for_entity(
        &mut self,
        query: &str,
        params: &Params,
        entity: &str,
    ) -> DbResult<QueryResult> {
        self.execute_classified(query, params, Some(entity)).await
    }

    pub async fn begin_transaction(&mut self) -> DbResult<i64> {
        self.inner
            .begin_transaction()
            .await
            .map_err(|e| self.classifier.classify_error(e, None))
    }

    pub async fn complete_transaction(&mut self) -> DbResult<bool> {
        self.inner
            .complete_transaction()
            .await
            .map_err(|e| self.classifier.classify_error(e, None))
    }

    pub fn fail_transaction(&mut self) {
        self.inner.fail_transaction()
    }

    pub fn transaction_depth(&self) -> i64 {
        self.inner.transaction_depth()
    }

    pub fn is_transaction_failed(&self) -> bool {
        self.inner.is_transaction_failed()
    }

    /// Quote a value. Failures are classified but never retried.
    pub async fn quote(&mut self, value: impl Into<QueryParam>) -> DbResult<String> {
        let value = value.into();
        self.inner
            .quote(value)
            .await
            .map_err(|e| self.classifier.classify_error(e, None))
    }

    /// Last generated id. Failures are classified but never retried.
    pub async fn last_insert_id(&mut self, name: Option<&str>) -> DbResult<String> {
        self.inner
            .last_insert_id(name)
            .await
            .map_err(|e| self.classifier.classify_error(e, None))
    }

    pub fn escape_wildcards(&self, value: &str, escape: char) -> String {
        self.inner.escape_wildcards(value, escape)
    }

    pub fn param_prefix(&self) -> &str {
        self.inner.param_prefix()
    }

    pub fn set_observer(&mut self, observer: Option<Arc<dyn QueryObserver>>) {
        self.inner.set_observer(observer);
    }

    async fn execute_classified(
        &mut self,
        query: &str,
        params: &Params,
        entity: Option<&str>,
    ) -> DbResult<QueryResult> {
        let err = match self.inner.execute(query, params).await {
            Ok(result) => return Ok(result),
            Err(e) => self.classifier.classify_error(e, entity),
        };

        if err != DbError::ServerGoneAway || !self.inner.backend().retry_on_transient_loss() {
            return Err(err);
        }

        warn!(
            connection = %self.inner.connection_name(),
            "MySQL server has gone away, reconnecting and retrying once"
        );
        let depth = self.inner.transaction_depth();
        if depth > 0 {
            warn!(
                connection = %self.inner.connection_name(),
                depth,
                "Open transaction was lost with the session; accounting is kept"
            );
        }

        self.inner.connect().await?;
        self.inner
            .execute(query, params)
            .await
            .map_err(|e| self.classifier.classify_error(e, entity))
    }
}

#[async_trait]
impl<B: Backend> DbConnection for RetryingConnection<B> {
    async fn connect(&mut self) -> DbResult<()> {
        RetryingConnection::connect(self).await
    }

    async fn disconnect(&mut self) {
        RetryingConnection::disconnect(self).await
    }

    async fn execute(&mut self, query: &str, params: &Params) -> DbResult<QueryResult> {
        RetryingConnection::execute(self, query, params).await
    }

    async fn begin_transaction(&mut self) -> DbResult<i64> {
        RetryingConnection::begin_transaction(self).await
    }

    async fn complete_transaction(&mut self) -> DbResult<bool> {
        RetryingConnection::complete_transaction(self).await
    }

    fn fail_transaction(&mut self) {
        RetryingConnection::fail_transaction(self)
    }
}
