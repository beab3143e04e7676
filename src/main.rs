//! dbal - Main entry point.
//!
//! Runs one parameterized statement against MySQL and prints each row as a
//! JSON object on stdout.

use clap::Parser;
use dbal::config::{Config, MySqlConfig};
use dbal::db::{DbConnection, MySqlConnection, QueryResult, TracingObserver};
use std::io::Write;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // Logs go to stderr; stdout carries the rows
    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_writer(std::io::stderr),
            )
            .init();
    }
}

fn print_rows(rows: QueryResult) -> std::io::Result<()> {
    let stdout = std::io::stdout();
    let mut out = stdout.lock();
    for row in rows {
        serde_json::to_writer(&mut out, &row.to_json_map())?;
        writeln!(out)?;
    }
    out.flush()
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    init_tracing(&config);

    let params = config.parse_params()?;
    let db_config = MySqlConfig::from_url(&config.url)?;

    info!(
        host = %db_config.access().host(),
        database = %db_config.database(),
        "Starting dbal v{}",
        env!("CARGO_PKG_VERSION")
    );

    let mut connection =
        MySqlConnection::from_config(db_config).with_observer(Arc::new(TracingObserver));

    let outcome = match config.page {
        Some(page) => {
            connection
                .execute_paged(&config.sql, &params, page, config.per_page, config.count)
                .await
        }
        None => DbConnection::execute(&mut connection, &config.sql, &params)
            .await
            .map(|rows| dbal::db::PagedResult { rows, total: None }),
    };

    let paged = match outcome {
        Ok(paged) => paged,
        Err(e) => {
            error!(code = e.code(), error = %e, "Statement failed");
            if let Some(hint) = e.suggestion() {
                eprintln!("Hint: {hint}");
            }
            connection.disconnect().await;
            return Err(e.into());
        }
    };

    let affected = paged.rows.affected_row_count();
    let has_columns = !paged.rows.columns().is_empty();
    print_rows(paged.rows)?;
    if !has_columns {
        eprintln!("Affected rows: {affected}");
    }
    if let Some(total) = paged.total {
        eprintln!("Total rows: {total}");
    }

    connection.disconnect().await;
    Ok(())
}
