//! Statement parameter models.
//!
//! `QueryParam` is what callers hand in; `Params` is the ordered set of named
//! values bound to one statement.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Date-time format understood by MySQL `DATETIME` columns.
pub const DATE_TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Date format understood by MySQL `DATE` columns.
pub const DATE_FORMAT: &str = "%Y-%m-%d";

/// A parameter value for parameterized queries.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParam {
    /// NULL value
    Null,
    /// Boolean value
    Bool(bool),
    /// Integer value (stored as i64 for maximum range)
    Int(i64),
    /// Floating point value, transmitted as text
    Float(f64),
    /// String value
    String(String),
}

impl QueryParam {
    /// Build a text parameter from anything printable (enum-like values, decimals).
    pub fn text(value: impl fmt::Display) -> Self {
        Self::String(value.to_string())
    }

    /// Parse a command-line literal: `null`, `true`/`false`, integers, otherwise text.
    pub fn parse_literal(raw: &str) -> Self {
        match raw {
            "null" | "NULL" => Self::Null,
            "true" => Self::Bool(true),
            "false" => Self::Bool(false),
            _ => raw
                .parse::<i64>()
                .map(Self::Int)
                .unwrap_or_else(|_| Self::String(raw.to_string())),
        }
    }

    /// Check if this parameter is null.
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Get the type name of this parameter for debugging.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
        }
    }
}

impl fmt::Display for QueryParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => Ok(()),
            Self::Bool(v) => write!(f, "{}", u8::from(*v)),
            Self::Int(v) => write!(f, "{v}"),
            Self::Float(v) => write!(f, "{v}"),
            Self::String(v) => f.write_str(v),
        }
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),+) => {
        $(
            impl From<$ty> for QueryParam {
                fn from(value: $ty) -> Self {
                    Self::Int(i64::from(value))
                }
            }
        )+
    };
}

impl_from_int!(i8, i16, i32, i64, u8, u16, u32);

impl From<bool> for QueryParam {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f32> for QueryParam {
    fn from(value: f32) -> Self {
        Self::Float(f64::from(value))
    }
}

impl From<f64> for QueryParam {
    fn from(value: f64) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for QueryParam {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for QueryParam {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

impl From<NaiveDateTime> for QueryParam {
    fn from(value: NaiveDateTime) -> Self {
        Self::String(value.format(DATE_TIME_FORMAT).to_string())
    }
}

impl From<NaiveDate> for QueryParam {
    fn from(value: NaiveDate) -> Self {
        Self::String(value.format(DATE_FORMAT).to_string())
    }
}

impl<Tz: TimeZone> From<DateTime<Tz>> for QueryParam
where
    Tz::Offset: fmt::Display,
{
    fn from(value: DateTime<Tz>) -> Self {
        Self::String(value.format(DATE_TIME_FORMAT).to_string())
    }
}

impl<T: Into<QueryParam>> From<Option<T>> for QueryParam {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Null, Into::into)
    }
}

/// Format a date-time for a `DATETIME` column. `None` stays `None`.
pub fn format_date_time(value: Option<NaiveDateTime>) -> Option<String> {
    value.map(|v| v.format(DATE_TIME_FORMAT).to_string())
}

/// Format a date for a `DATE` column. `None` stays `None`.
pub fn format_date(value: Option<NaiveDate>) -> Option<String> {
    value.map(|v| v.format(DATE_FORMAT).to_string())
}

/// Ordered named parameters for one statement.
///
/// Names are given without the `:` marker and without the connection's
/// parameter prefix.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, QueryParam)>,
}

impl Params {
    /// Create an empty parameter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a parameter.
    pub fn with(mut self, name: impl Into<String>, value: impl Into<QueryParam>) -> Self {
        self.insert(name, value);
        self
    }

    /// Set a parameter, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<QueryParam>) {
        let name = name.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == name) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((name, value)),
        }
    }

    pub fn get(&self, name: &str) -> Option<&QueryParam> {
        self.entries
            .iter()
            .find(|(existing, _)| existing == name)
            .map(|(_, value)| value)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &QueryParam)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<K: Into<String>, V: Into<QueryParam>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Self::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}
