//! Scripted in-memory backend for driving connections without a server.
//!
//! Every native call is recorded. Failures and result sets are scripted by
//! SQL substring.

#![allow(dead_code)]

use async_trait::async_trait;
use dbal::config::ConnectionOptions;
use dbal::db::{
    Backend, BoundValue, DriverError, GONE_AWAY_SENTINEL, NativeConnection, SetupStatement,
    StatementOutput,
};
use std::sync::{Arc, Mutex, MutexGuard};

/// A recorded native call.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open,
    Execute { sql: String, params: Vec<BoundValue> },
    Begin,
    Commit,
    Rollback,
    Close,
}

#[derive(Default)]
struct State {
    calls: Vec<Call>,
    open_failures: Vec<DriverError>,
    failures: Vec<(String, DriverError)>,
    responses: Vec<(String, StatementOutput)>,
}

#[derive(Clone)]
pub struct ScriptedBackend {
    state: Arc<Mutex<State>>,
    options: ConnectionOptions,
    retry: bool,
    setup: Vec<SetupStatement>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(State::default())),
            options: ConnectionOptions::new("test"),
            retry: false,
            setup: Vec::new(),
        }
    }

    pub fn with_retry(mut self, retry: bool) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_options(mut self, options: ConnectionOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_setup(mut self, statement: SetupStatement) -> Self {
        self.setup.push(statement);
        self
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    /// Make the next `open` fail.
    pub fn fail_open(&self, message: &str, code: i64) {
        self.state()
            .open_failures
            .push(DriverError::new(message, code));
    }

    /// Make the next statement containing `pattern` fail.
    pub fn fail_once(&self, pattern: &str, message: &str, code: i64) {
        self.state()
            .failures
            .push((pattern.to_string(), DriverError::new(message, code)));
    }

    /// Make the next statement containing `pattern` fail with a lost session.
    pub fn gone_away_once(&self, pattern: &str) {
        self.fail_once(pattern, GONE_AWAY_SENTINEL, 0);
    }

    /// Answer every statement containing `pattern` with `output`.
    pub fn respond(&self, pattern: &str, output: StatementOutput) {
        self.state().responses.push((pattern.to_string(), output));
    }

    /// Answer with a single-column result set.
    pub fn respond_column(&self, pattern: &str, column: &str, values: &[&str]) {
        self.respond(
            pattern,
            StatementOutput {
                columns: vec![column.to_string()],
                rows: values.iter().map(|v| vec![Some(v.to_string())]).collect(),
                rows_affected: 0,
            },
        );
    }

    pub fn calls(&self) -> Vec<Call> {
        self.state().calls.clone()
    }

    pub fn executed(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Execute { sql, .. } => Some(sql),
                _ => None,
            })
            .collect()
    }

    pub fn last_params(&self) -> Vec<BoundValue> {
        self.calls()
            .into_iter()
            .rev()
            .find_map(|c| match c {
                Call::Execute { params, .. } => Some(params),
                _ => None,
            })
            .unwrap_or_default()
    }

    pub fn count(&self, call: &Call) -> usize {
        self.calls().iter().filter(|c| *c == call).count()
    }

    pub fn opens(&self) -> usize {
        self.count(&Call::Open)
    }

    pub fn begins(&self) -> usize {
        self.count(&Call::Begin)
    }

    pub fn commits(&self) -> usize {
        self.count(&Call::Commit)
    }

    pub fn rollbacks(&self) -> usize {
        self.count(&Call::Rollback)
    }

    pub fn closes(&self) -> usize {
        self.count(&Call::Close)
    }
}

#[async_trait]
impl Backend for ScriptedBackend {
    type Handle = ScriptedHandle;

    fn backend_type(&self) -> &'static str {
        "scripted"
    }

    fn options(&self) -> &ConnectionOptions {
        &self.options
    }

    fn retry_on_transient_loss(&self) -> bool {
        self.retry
    }

    async fn open(&self) -> Result<ScriptedHandle, DriverError> {
        let mut state = self.state();
        state.calls.push(Call::Open);
        if !state.open_failures.is_empty() {
            return Err(state.open_failures.remove(0));
        }
        Ok(ScriptedHandle {
            state: Arc::clone(&self.state),
        })
    }

    fn session_setup(&self) -> Vec<SetupStatement> {
        self.setup.clone()
    }
}

pub struct ScriptedHandle {
    state: Arc<Mutex<State>>,
}

impl ScriptedHandle {
    fn record(&self, call: Call) {
        self.state.lock().unwrap().calls.push(call);
    }
}

#[async_trait]
impl NativeConnection for ScriptedHandle {
    async fn execute(
        &mut self,
        sql: &str,
        params: &[&BoundValue],
    ) -> Result<StatementOutput, DriverError> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(Call::Execute {
            sql: sql.to_string(),
            params: params.iter().map(|v| (*v).clone()).collect(),
        });

        if let Some(pos) = state.failures.iter().position(|(p, _)| sql.contains(p.as_str())) {
            return Err(state.failures.remove(pos).1);
        }

        Ok(state
            .responses
            .iter()
            .find(|(p, _)| sql.contains(p.as_str()))
            .map(|(_, output)| output.clone())
            .unwrap_or_default())
    }

    async fn begin(&mut self) -> Result<(), DriverError> {
        self.record(Call::Begin);
        Ok(())
    }

    async fn commit(&mut self) -> Result<(), DriverError> {
        self.record(Call::Commit);
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), DriverError> {
        self.record(Call::Rollback);
        Ok(())
    }

    fn quote(&self, value: &BoundValue) -> Result<String, DriverError> {
        Ok(match value {
            BoundValue::Null => "NULL".to_string(),
            BoundValue::Bool(v) => (*v as i64).to_string(),
            BoundValue::Int(v) => v.to_string(),
            BoundValue::Str(s) => format!("'{}'", s.replace('\'', "\\'")),
        })
    }

    fn last_insert_id(&self, _name: Option<&str>) -> Result<String, DriverError> {
        Ok("42".to_string())
    }

    async fn close(&mut self) {
        self.record(Call::Close);
    }
}
