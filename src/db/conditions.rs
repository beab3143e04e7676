//! WHERE clause fragment builders.
//!
//! Builders append `field = :param` style fragments to a [`Conditions`] set
//! and register the matching values under names the connection will prefix
//! when binding. They never touch a connection themselves.

use crate::db::connection::DbConnection;
use crate::db::result::Row;
use crate::error::{DbError, DbResult};
use crate::models::{Params, QueryParam};

/// Accumulated condition fragments and the parameters they reference.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Conditions {
    fragments: Vec<String>,
    params: Params,
}

impl Conditions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fragments(&self) -> &[String] {
        &self.fragments
    }

    pub fn params(&self) -> &Params {
        &self.params
    }

    pub fn is_empty(&self) -> bool {
        self.fragments.is_empty()
    }

    /// Fragments joined with `AND`; empty when there are none.
    pub fn to_sql(&self) -> String {
        self.fragments.join(" AND ")
    }

    /// `WHERE ...` clause, or an empty string when there are no conditions.
    pub fn where_clause(&self) -> String {
        if self.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.to_sql())
        }
    }

    pub fn into_parts(self) -> (Vec<String>, Params) {
        (self.fragments, self.params)
    }
}

/// Whether a value counts as "not given" for an optional filter.
///
/// NULL, `false`, `0`, `0.0`, `""` and `"0"` are empty.
pub fn is_empty_value(value: &QueryParam) -> bool {
    match value {
        QueryParam::Null => true,
        QueryParam::Bool(v) => !v,
        QueryParam::Int(v) => *v == 0,
        QueryParam::Float(v) => *v == 0.0,
        QueryParam::String(s) => s.is_empty() || s == "0",
    }
}

/// Builds condition fragments whose placeholders carry the connection's
/// parameter prefix.
#[derive(Debug, Clone, Default)]
pub struct ConditionBuilder {
    prefix: String,
}

impl ConditionBuilder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Add `[alias.]field = :param` unless the value is empty.
    ///
    /// With `only_null_is_empty` only NULL skips the condition, so `0` and
    /// `""` can be filtered on. Booleans are bound as `1`/`0`.
    pub fn equality(
        &self,
        conditions: &mut Conditions,
        field: &str,
        value: impl Into<QueryParam>,
        alias: Option<&str>,
        only_null_is_empty: bool,
    ) {
        let value = value.into();
        let skip = if only_null_is_empty {
            value.is_null()
        } else {
            is_empty_value(&value)
        };
        if skip {
            return;
        }
        let value = match value {
            QueryParam::Bool(v) => QueryParam::Int(i64::from(v)),
            other => other,
        };

        let name = param_name(field, alias, None);
        conditions.fragments.push(format!(
            "{} = :{}{}",
            prefixed_field(field, alias),
            self.prefix,
            name
        ));
        conditions.params.insert(name, value);
    }

    /// Add `[alias.]field [NOT] IN (:p_0, :p_1, ...)` unless the list is empty.
    pub fn in_list<I, V>(
        &self,
        conditions: &mut Conditions,
        field: &str,
        values: I,
        alias: Option<&str>,
        negated: bool,
    ) where
        I: IntoIterator<Item = V>,
        V: Into<QueryParam>,
    {
        let mut placeholders = Vec::new();
        for (index, value) in values.into_iter().enumerate() {
            let name = param_name(field, alias, Some(index));
            placeholders.push(format!(":{}{}", self.prefix, name));
            conditions.params.insert(name, value);
        }
        if placeholders.is_empty() {
            return;
        }

        let operator = if negated { "NOT IN" } else { "IN" };
        conditions.fragments.push(format!(
            "{} {} ({})",
            prefixed_field(field, alias),
            operator,
            placeholders.join(", ")
        ));
    }
}

fn prefixed_field(field: &str, alias: Option<&str>) -> String {
    match alias {
        Some(alias) if !alias.is_empty() => format!("{alias}.{field}"),
        _ => field.to_string(),
    }
}

fn param_name(field: &str, alias: Option<&str>, index: Option<usize>) -> String {
    let mut parts = Vec::with_capacity(3);
    if let Some(alias) = alias.filter(|a| !a.is_empty()) {
        parts.push(alias.to_string());
    }
    parts.push(field.to_string());
    if let Some(index) = index {
        parts.push(index.to_string());
    }
    parts.join("_")
}

/// Deduplicate ids and register them as `id_<n>` parameters.
///
/// Returns the placeholders, in first-seen order, and the parameters to bind.
pub fn id_list_params(ids: &[i64]) -> (Vec<String>, Params) {
    let mut seen = Vec::with_capacity(ids.len());
    for id in ids {
        if !seen.contains(id) {
            seen.push(*id);
        }
    }

    let mut placeholders = Vec::with_capacity(seen.len());
    let mut params = Params::new();
    for (index, id) in seen.into_iter().enumerate() {
        let name = format!("id_{index}");
        placeholders.push(format!(":{name}"));
        params.insert(name, id);
    }
    (placeholders, params)
}

/// Build the query that loads `fields` of the rows with the given ids, in id order.
pub fn list_by_ids_query(table: &str, fields: &[&str], placeholders: &[String], id_field: &str) -> String {
    let columns: Vec<String> = fields.iter().map(|f| format!("`{f}`")).collect();
    let list = placeholders.join(",");
    format!(
        "SELECT {} FROM `{table}` WHERE `{id_field}` IN ({list}) ORDER BY FIELD(`{id_field}`, {list})",
        columns.join(", ")
    )
}

/// Load `fields` of the rows with the given ids, ordered like `ids`.
///
/// Placeholders are not prefixed, so use this on a connection without a
/// parameter prefix.
pub async fn list_by_ids<C: DbConnection + ?Sized>(
    connection: &mut C,
    table: &str,
    fields: &[&str],
    ids: &[i64],
    id_field: &str,
) -> DbResult<Vec<Row>> {
    if fields.is_empty() {
        return Err(DbError::invalid_input("No fields given"));
    }
    if ids.is_empty() {
        return Ok(Vec::new());
    }

    let (placeholders, params) = id_list_params(ids);
    let query = list_by_ids_query(table, fields, &placeholders, id_field);
    Ok(connection.execute(&query, &params).await?.fetch_all())
}
