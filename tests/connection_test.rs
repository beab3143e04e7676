//! Integration tests for the connection lifecycle and statement execution.

mod common;

use common::{Call, ScriptedBackend};
use dbal::config::ConnectionOptions;
use dbal::db::{
    BoundValue, Connection, QueryCompleteEvent, QueryObserver, QueryStartEvent, SetupStatement,
    StatementOutput,
};
use dbal::{DbError, Params, params};
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct RecordingObserver {
    events: Mutex<Vec<String>>,
}

impl QueryObserver for RecordingObserver {
    fn on_start(&self, event: &QueryStartEvent) {
        self.events.lock().unwrap().push(format!(
            "start {} {} {}",
            event.backend_type, event.connection_name, event.query
        ));
    }

    fn on_complete(&self, event: &QueryCompleteEvent) {
        let outcome = match &event.error {
            None => "ok".to_string(),
            Some(e) => format!("error {e}"),
        };
        self.events
            .lock()
            .unwrap()
            .push(format!("complete {} {}", event.start.query, outcome));
    }
}

#[tokio::test]
async fn test_execute_connects_lazily() {
    let backend = ScriptedBackend::new();
    let mut conn = Connection::new(backend.clone());
    assert_eq!(backend.opens(), 0);

    conn.execute("SELECT 1", &Params::new()).await.unwrap();
    conn.execute("SELECT 2", &Params::new()).await.unwrap();

    assert_eq!(backend.opens(), 1);
}

#[tokio::test]
async fn test_open_connects_eagerly() {
    let backend = ScriptedBackend::new();
    let conn = Connection::open(backend.clone()).await.unwrap();

    assert!(conn.is_connected());
    assert_eq!(backend.calls(), vec![Call::Open]);
}

#[tokio::test]
async fn test_connect_replaces_open_handle() {
    let backend = ScriptedBackend::new();
    let mut conn = Connection::open(backend.clone()).await.unwrap();

    conn.connect().await.unwrap();

    assert_eq!(backend.calls(), vec![Call::Open, Call::Close, Call::Open]);
}

#[tokio::test]
async fn test_session_setup_runs_after_open() {
    let backend = ScriptedBackend::new()
        .with_options(ConnectionOptions::new("write").with_param_prefix("p_"))
        .with_setup(SetupStatement::new("SET NAMES utf8mb4"))
        .with_setup(
            SetupStatement::new("SET time_zone = :p_tz")
                .with_params(params! { "tz" => "+00:00" }),
        );
    let mut conn = Connection::new(backend.clone());

    conn.connect().await.unwrap();

    assert_eq!(
        backend.calls(),
        vec![
            Call::Open,
            Call::Execute {
                sql: "SET NAMES utf8mb4".to_string(),
                params: vec![],
            },
            Call::Execute {
                sql: "SET time_zone = ?".to_string(),
                params: vec![BoundValue::Str("+00:00".to_string())],
            },
        ]
    );
}

#[tokio::test]
async fn test_session_setup_failure_closes_handle() {
    let backend = ScriptedBackend::new().with_setup(SetupStatement::new("SET NAMES bogus"));
    backend.fail_once("SET NAMES", "Unknown character set: 'bogus'", 1115);
    let mut conn = Connection::new(backend.clone());

    let err = conn.connect().await.unwrap_err();

    assert_eq!(err, DbError::query("Unknown character set: 'bogus'", 1115));
    assert!(!conn.is_connected());
    assert_eq!(backend.closes(), 1);
}

#[tokio::test]
async fn test_parameters_are_prefixed_and_typed() {
    let backend = ScriptedBackend::new()
        .with_options(ConnectionOptions::new("generic").with_param_prefix("p_"));
    let mut conn = Connection::new(backend.clone());
    assert_eq!(conn.param_prefix(), "p_");

    conn.execute(
        "UPDATE t SET a = :p_a, b = :p_b, c = :p_c, d = :p_d, e = :p_e WHERE id = :p_a",
        &params! {
            "a" => 10,
            "b" => true,
            "c" => None::<String>,
            "d" => 2.5,
            "e" => "text",
        },
    )
    .await
    .unwrap();

    assert_eq!(
        backend.executed(),
        vec!["UPDATE t SET a = ?, b = ?, c = ?, d = ?, e = ? WHERE id = ?"]
    );
    assert_eq!(
        backend.last_params(),
        vec![
            BoundValue::Int(10),
            BoundValue::Bool(true),
            BoundValue::Null,
            BoundValue::Str("2.5".to_string()),
            BoundValue::Str("text".to_string()),
            BoundValue::Int(10),
        ]
    );
}

#[tokio::test]
async fn test_missing_parameter_is_invalid_input() {
    let backend = ScriptedBackend::new();
    let mut conn = Connection::new(backend.clone());
    conn.begin_transaction().await.unwrap();

    let err = conn
        .execute("SELECT * FROM t WHERE id = :id", &Params::new())
        .await
        .unwrap_err();

    assert!(matches!(err, DbError::InvalidInput { .. }));
    assert!(backend.executed().is_empty());
    assert!(conn.is_transaction_failed());
}

#[tokio::test]
async fn test_rows_are_returned_through_cursor() {
    let backend = ScriptedBackend::new();
    backend.respond(
        "FROM customer",
        StatementOutput {
            columns: vec!["id".to_string(), "email".to_string()],
            rows: vec![
                vec![Some("1".to_string()), Some("a@example.com".to_string())],
                vec![Some("2".to_string()), None],
            ],
            rows_affected: 0,
        },
    );
    let mut conn = Connection::new(backend);

    let mut rows = conn
        .execute("SELECT id, email FROM customer", &Params::new())
        .await
        .unwrap();

    let first = rows.fetch().unwrap();
    assert_eq!(first.get("email"), Some("a@example.com"));
    let rest = rows.fetch_all();
    assert_eq!(rest.len(), 1);
    assert_eq!(rest[0].get("email"), None);
    assert!(rows.fetch().is_none());
}

#[tokio::test]
async fn test_affected_row_count() {
    let backend = ScriptedBackend::new();
    backend.respond(
        "DELETE",
        StatementOutput {
            rows_affected: 3,
            ..StatementOutput::default()
        },
    );
    let mut conn = Connection::new(backend);

    let result = conn
        .execute("DELETE FROM session WHERE expired = 1", &Params::new())
        .await
        .unwrap();

    assert_eq!(result.affected_row_count(), 3);
}

#[tokio::test]
async fn test_observer_sees_success_and_failure() {
    let backend = ScriptedBackend::new();
    backend.fail_once("broken", "syntax error", 1064);
    let observer = Arc::new(RecordingObserver::default());
    let mut conn = Connection::new(backend).with_observer(observer.clone());

    conn.execute("SELECT 1", &Params::new()).await.unwrap();
    let err = conn.execute("broken", &Params::new()).await.unwrap_err();

    // Observation does not change the error
    assert_eq!(err, DbError::query("syntax error", 1064));
    assert_eq!(
        *observer.events.lock().unwrap(),
        vec![
            "start scripted test SELECT 1".to_string(),
            "complete SELECT 1 ok".to_string(),
            "start scripted test broken".to_string(),
            "complete broken error Query failed: syntax error".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_escape_wildcards() {
    let conn = Connection::new(ScriptedBackend::new());
    assert_eq!(conn.escape_wildcards("test._.%", '\\'), "test.\\_.\\%");
}

#[tokio::test]
async fn test_quote_connects_and_types_value() {
    let backend = ScriptedBackend::new();
    let mut conn = Connection::new(backend.clone());

    assert_eq!(conn.quote(true).await.unwrap(), "1");
    assert_eq!(conn.quote(None::<i64>).await.unwrap(), "NULL");
    assert_eq!(conn.last_insert_id(Some("seq")).await.unwrap(), "42");
    assert_eq!(backend.opens(), 1);
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let backend = ScriptedBackend::new();
    let mut conn = Connection::open(backend.clone()).await.unwrap();

    conn.disconnect().await;
    conn.disconnect().await;

    assert!(!conn.is_connected());
    assert_eq!(backend.closes(), 1);
}
