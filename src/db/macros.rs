//! Parameter construction macros.

/// Build a [`Params`](crate::models::Params) set from `name => value` pairs.
///
/// Values go through `Into<QueryParam>`, so integers, booleans, floats,
/// strings, chrono dates and `Option`s of those all work.
///
/// # Example
///
/// ```
/// use dbal::params;
///
/// let params = params! { "id" => 5, "status" => "ACTIVE", "deleted_at" => None::<String> };
/// assert_eq!(params.len(), 3);
/// ```
#[macro_export]
macro_rules! params {
    () => {
        $crate::models::Params::new()
    };
    ($($name:expr => $value:expr),+ $(,)?) => {
        $crate::models::Params::new()$(.with($name, $value))+
    };
}

pub use params;
