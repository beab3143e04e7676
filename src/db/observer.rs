//! Statement instrumentation.
//!
//! A connection with an observer reports a start event before every statement
//! and a completion event after it, whether the statement succeeded or not.

use crate::models::Params;
use chrono::{DateTime, Utc};
use std::fmt;
use std::time::{Duration, Instant};
use tracing::{debug, warn};
use uuid::Uuid;

/// Emitted right before a statement reaches the driver.
#[derive(Debug, Clone)]
pub struct QueryStartEvent {
    pub id: Uuid,
    pub backend_type: &'static str,
    pub connection_name: String,
    pub query: String,
    pub params: Params,
    pub timestamp: DateTime<Utc>,
    started: Instant,
}

impl QueryStartEvent {
    pub fn new(
        backend_type: &'static str,
        connection_name: impl Into<String>,
        query: impl Into<String>,
        params: Params,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            backend_type,
            connection_name: connection_name.into(),
            query: query.into(),
            params,
            timestamp: Utc::now(),
            started: Instant::now(),
        }
    }

    /// Close the event with the statement outcome.
    pub fn complete(self, error: Option<String>) -> QueryCompleteEvent {
        QueryCompleteEvent {
            runtime: self.started.elapsed(),
            timestamp: Utc::now(),
            error,
            start: self,
        }
    }
}

/// Emitted once the statement returned, successfully or not.
#[derive(Debug, Clone)]
pub struct QueryCompleteEvent {
    pub start: QueryStartEvent,
    pub timestamp: DateTime<Utc>,
    pub runtime: Duration,
    pub error: Option<String>,
}

impl QueryCompleteEvent {
    pub fn is_successful(&self) -> bool {
        self.error.is_none()
    }
}

impl fmt::Display for QueryCompleteEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {} ({} ms)",
            self.start.connection_name,
            self.start.query,
            self.runtime.as_millis()
        )?;
        if let Some(error) = &self.error {
            write!(f, " failed: {error}")?;
        }
        Ok(())
    }
}

/// Receives statement lifecycle events.
pub trait QueryObserver: Send + Sync {
    fn on_start(&self, _event: &QueryStartEvent) {}

    fn on_complete(&self, event: &QueryCompleteEvent);
}

/// Forwards statement events to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingObserver;

impl QueryObserver for TracingObserver {
    fn on_start(&self, event: &QueryStartEvent) {
        debug!(
            id = %event.id,
            backend = event.backend_type,
            connection = %event.connection_name,
            params = event.params.len(),
            "Statement started: {}",
            event.query
        );
    }

    fn on_complete(&self, event: &QueryCompleteEvent) {
        let runtime_ms = event.runtime.as_millis() as u64;
        match &event.error {
            None => debug!(
                id = %event.start.id,
                connection = %event.start.connection_name,
                runtime_ms,
                "Statement completed"
            ),
            Some(error) => warn!(
                id = %event.start.id,
                connection = %event.start.connection_name,
                runtime_ms,
                error = %error,
                "Statement failed"
            ),
        }
    }
}
