//! Row cursor returned by statement execution.
//!
//! A `QueryResult` is forward-only and single-pass: every fetch consumes rows,
//! and once exhausted it yields nothing more. Running the statement again is
//! the only way to restart.

use crate::db::driver::StatementOutput;
use crate::error::{DbError, DbResult};
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use std::sync::Arc;

/// One fetched row. Cells are text; `None` is SQL NULL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<Option<String>>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<Option<String>>) -> Self {
        Self { columns, values }
    }

    /// Value of the named column. `None` for NULL or an unknown column.
    pub fn get(&self, column: &str) -> Option<&str> {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| self.get_index(idx))
    }

    pub fn get_index(&self, idx: usize) -> Option<&str> {
        self.values.get(idx).and_then(|v| v.as_deref())
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[Option<String>] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Row as a JSON object of string (or null) values, in column order.
    pub fn to_json_map(&self) -> serde_json::Map<String, JsonValue> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(column, value)| {
                let value = value.clone().map_or(JsonValue::Null, JsonValue::String);
                (column.clone(), value)
            })
            .collect()
    }

    /// Materialise the row into a caller type whose fields accept text.
    pub fn deserialize<T: DeserializeOwned>(&self) -> DbResult<T> {
        serde_json::from_value(JsonValue::Object(self.to_json_map()))
            .map_err(|e| DbError::decode(format!("Failed to materialize row: {e}")))
    }
}

/// Forward-only cursor over the rows of one statement.
#[derive(Debug)]
pub struct QueryResult {
    columns: Arc<[String]>,
    rows: std::vec::IntoIter<Vec<Option<String>>>,
    rows_affected: u64,
}

impl QueryResult {
    pub fn new(output: StatementOutput) -> Self {
        Self {
            columns: output.columns.into(),
            rows: output.rows.into_iter(),
            rows_affected: output.rows_affected,
        }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    /// Next row, or `None` at the end.
    pub fn fetch(&mut self) -> Option<Row> {
        self.rows
            .next()
            .map(|values| Row::new(Arc::clone(&self.columns), values))
    }

    /// All remaining rows.
    pub fn fetch_all(&mut self) -> Vec<Row> {
        self.by_ref().collect()
    }

    /// Column `idx` of the next row. The outer `None` means no row was left.
    pub fn fetch_column(&mut self, idx: usize) -> Option<Option<String>> {
        self.rows
            .next()
            .map(|mut values| values.get_mut(idx).and_then(Option::take))
    }

    /// Column `idx` of all remaining rows.
    pub fn fetch_column_all(&mut self, idx: usize) -> Vec<Option<String>> {
        std::iter::from_fn(|| self.fetch_column(idx)).collect()
    }

    /// Next row materialised into `T`.
    pub fn fetch_as<T: DeserializeOwned>(&mut self) -> DbResult<Option<T>> {
        self.fetch().map(|row| row.deserialize()).transpose()
    }

    /// All remaining rows materialised into `T`.
    pub fn fetch_all_as<T: DeserializeOwned>(&mut self) -> DbResult<Vec<T>> {
        self.by_ref().map(|row| row.deserialize()).collect()
    }

    /// Rows changed by an INSERT, UPDATE or DELETE.
    pub fn affected_row_count(&self) -> u64 {
        self.rows_affected
    }
}

impl Iterator for QueryResult {
    type Item = Row;

    fn next(&mut self) -> Option<Row> {
        self.fetch()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.rows.size_hint()
    }
}
