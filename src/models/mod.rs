//! Data models shared by the connection layer.

pub mod query;

pub use query::{
    DATE_FORMAT, DATE_TIME_FORMAT, Params, QueryParam, format_date, format_date_time,
};
