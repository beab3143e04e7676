//! Parameter binding utilities.
//!
//! Values are normalised before they reach the driver: integers, booleans and
//! NULL keep their native type, everything else (floats included) is sent as
//! text. Named `:placeholders` are rewritten to the positional markers the
//! MySQL protocol expects.

use crate::models::{Params, QueryParam};
use sqlx::MySql;
use sqlx::mysql::MySqlArguments;

/// Storage type a value is bound with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamType {
    Int,
    Bool,
    Null,
    Str,
}

/// A normalised value ready for binding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BoundValue {
    Null,
    Bool(bool),
    Int(i64),
    Str(String),
}

impl BoundValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Null => ParamType::Null,
            Self::Bool(_) => ParamType::Bool,
            Self::Int(_) => ParamType::Int,
            Self::Str(_) => ParamType::Str,
        }
    }
}

/// A bound value under its full placeholder name (prefix included, no `:`).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundParam {
    pub name: String,
    pub value: BoundValue,
}

/// Normalises caller parameters and applies the connection's name prefix.
#[derive(Debug, Clone, Default)]
pub struct ParameterBinder {
    prefix: String,
}

impl ParameterBinder {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Infer the storage type of a value and normalise it.
    pub fn infer(value: &QueryParam) -> BoundValue {
        match value {
            QueryParam::Int(v) => BoundValue::Int(*v),
            QueryParam::Bool(v) => BoundValue::Bool(*v),
            QueryParam::Null => BoundValue::Null,
            other => BoundValue::Str(other.to_string()),
        }
    }

    pub fn bind(&self, params: &Params) -> Vec<BoundParam> {
        params
            .iter()
            .map(|(name, value)| BoundParam {
                name: format!("{}{}", self.prefix, name),
                value: Self::infer(value),
            })
            .collect()
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum ScanState {
    Code,
    Quoted(char),
    LineComment,
    BlockComment,
}

fn is_name_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Rewrite `:name` placeholders to `?` and return the values in marker order.
///
/// Quoted strings, backticked identifiers and comments are copied verbatim.
/// `::` and `:=` are not placeholders. A placeholder may appear several times;
/// its value is repeated for each occurrence.
pub fn expand_named_placeholders<'a>(
    sql: &str,
    params: &'a [BoundParam],
) -> Result<(String, Vec<&'a BoundValue>), String> {
    let chars: Vec<char> = sql.chars().collect();
    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    let mut state = ScanState::Code;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let next = chars.get(i + 1).copied();

        match state {
            ScanState::Quoted(quote) => {
                out.push(c);
                if c == '\\' && quote != '`' {
                    if let Some(escaped) = next {
                        out.push(escaped);
                        i += 1;
                    }
                } else if c == quote {
                    state = ScanState::Code;
                }
            }
            ScanState::LineComment => {
                out.push(c);
                if c == '\n' {
                    state = ScanState::Code;
                }
            }
            ScanState::BlockComment => {
                out.push(c);
                if c == '*' && next == Some('/') {
                    out.push('/');
                    i += 1;
                    state = ScanState::Code;
                }
            }
            ScanState::Code => match c {
                '\'' | '"' | '`' => {
                    out.push(c);
                    state = ScanState::Quoted(c);
                }
                '#' => {
                    out.push(c);
                    state = ScanState::LineComment;
                }
                '-' if next == Some('-') => {
                    out.push_str("--");
                    i += 1;
                    state = ScanState::LineComment;
                }
                '/' if next == Some('*') => {
                    out.push_str("/*");
                    i += 1;
                    state = ScanState::BlockComment;
                }
                ':' if next == Some(':') => {
                    out.push_str("::");
                    i += 1;
                }
                ':' if next.is_some_and(is_name_char) => {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_name_char(chars[end]) {
                        end += 1;
                    }
                    let name: String = chars[start..end].iter().collect();
                    let param = params
                        .iter()
                        .find(|p| p.name == name)
                        .ok_or_else(|| format!("No value bound for placeholder :{name}"))?;
                    values.push(&param.value);
                    out.push('?');
                    i = end;
                    continue;
                }
                _ => out.push(c),
            },
        }
        i += 1;
    }

    Ok((out, values))
}

/// Bind a value to a MySQL query.
pub(crate) fn bind_mysql_param<'q>(
    query: sqlx::query::Query<'q, MySql, MySqlArguments>,
    value: &'q BoundValue,
) -> sqlx::query::Query<'q, MySql, MySqlArguments> {
    match value {
        BoundValue::Null => query.bind(None::<String>),
        BoundValue::Bool(v) => query.bind(*v),
        BoundValue::Int(v) => query.bind(*v),
        BoundValue::Str(v) => query.bind(v.as_str()),
    }
}
