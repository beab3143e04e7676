//! MySQL error classification.
//!
//! Maps a raw driver failure (message text + numeric code) onto the semantic
//! kinds callers act on. Classification is total: anything that cannot be
//! classified confidently comes back as `ClassifiedError::General` carrying
//! the original message and code.

use crate::error::{CODE_DUPLICATE_ENTRY, DbError};
use regex::Regex;
use std::sync::LazyLock;

/// Exact message the driver reports when the server dropped the session.
pub const GONE_AWAY_SENTINEL: &str =
    "SQLSTATE[HY000]: General error: 2006 MySQL server has gone away";

/// General or unclassified driver error.
pub const CODE_GENERAL: i64 = 0;

/// SQLSTATE used by `SIGNAL` for application defined errors.
pub const CODE_USER_DEFINED: i64 = 45000;

/// A user defined error may re-dispatch into exactly one other code.
const MAX_REDISPATCH: usize = 1;

static STATE_PREFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"SQLSTATE\[(\d+)\]: (.+)$").expect("state prefix pattern is valid")
});

static EMBEDDED_ERROR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\[(?P<code>\d+)\]\s-\s(?P<message>.+)$").expect("embedded error pattern is valid")
});

/// Split a `SQLSTATE[<n>]: <rest>` message into `(<rest>, <n>)`.
///
/// Messages without a numeric state (e.g. `SQLSTATE[HY000]`) are returned
/// unchanged together with the given code.
pub fn split_state_prefix(message: &str, code: i64) -> (String, i64) {
    if message.contains("SQLSTATE[") {
        if let Some(caps) = STATE_PREFIX.captures(message) {
            if let Ok(state) = caps[1].parse::<i64>() {
                return (caps[2].to_string(), state);
            }
        }
    }
    (message.to_string(), code)
}

/// Semantic category of a driver failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClassifiedError {
    /// Not classified; carries the effective message and code unchanged.
    General { message: String, code: i64 },
    /// Duplicate key, optionally naming the entity.
    DuplicateEntry { entity: Option<String> },
    /// The server has gone away; a reconnect may recover.
    TransientConnectivityLoss,
    /// Application defined `SIGNAL` error that could not be re-dispatched.
    UserDefined { code: i64, message: String },
}

impl From<ClassifiedError> for DbError {
    fn from(classified: ClassifiedError) -> Self {
        match classified {
            ClassifiedError::General { message, code } => DbError::query(message, code),
            ClassifiedError::DuplicateEntry { entity } => DbError::duplicate_entry(entity),
            ClassifiedError::TransientConnectivityLoss => DbError::ServerGoneAway,
            ClassifiedError::UserDefined { code, message } => DbError::user_defined(code, message),
        }
    }
}

/// Classifier for MySQL driver errors.
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorClassifier;

impl ErrorClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Classify a raw driver error.
    ///
    /// A `SQLSTATE[<n>]: <rest>` prefix is parsed first; see
    /// [`classify_effective`](Self::classify_effective) for the rest.
    pub fn classify(&self, message: &str, code: i64, entity: Option<&str>) -> ClassifiedError {
        let (message, code) = split_state_prefix(message, code);
        self.classify_effective(message, code, entity)
    }

    /// Classify an error whose state prefix was already parsed.
    ///
    /// `entity` names the row kind used in duplicate entry messages. A user
    /// defined error of the form `... [<code>] - <message>` is re-dispatched
    /// on `<code>` with `<message>` as the entity; an embedded 45000 is
    /// terminal. An embedded code 0 is a plain general error and never counts
    /// as a lost session.
    pub fn classify_effective(
        &self,
        message: String,
        code: i64,
        entity: Option<&str>,
    ) -> ClassifiedError {
        let mut message = message;
        let mut code = code;
        let mut entity = entity.map(str::to_string);
        let mut redispatched = false;

        for _ in 0..=MAX_REDISPATCH {
            match code {
                CODE_GENERAL => {
                    // Non-sentinel general errors are returned unchanged; see DESIGN.md.
                    return if !redispatched && message == GONE_AWAY_SENTINEL {
                        ClassifiedError::TransientConnectivityLoss
                    } else {
                        ClassifiedError::General { message, code }
                    };
                }
                CODE_DUPLICATE_ENTRY => return ClassifiedError::DuplicateEntry { entity },
                CODE_USER_DEFINED => match parse_embedded(&message) {
                    Some((embedded_code, embedded_message)) if embedded_code != CODE_USER_DEFINED => {
                        code = embedded_code;
                        entity = Some(embedded_message.clone());
                        message = embedded_message;
                        redispatched = true;
                    }
                    _ => return ClassifiedError::UserDefined { code, message },
                },
                _ => return ClassifiedError::General { message, code },
            }
        }

        ClassifiedError::General { message, code }
    }

    /// Classify an error raised by the connection layer.
    ///
    /// Only `DbError::Query` carries a driver failure. Its message and code
    /// are already the effective ones, so the state prefix is not parsed
    /// again. Every other error is returned as is.
    pub fn classify_error(&self, err: DbError, entity: Option<&str>) -> DbError {
        match err {
            DbError::Query { message, code } => {
                self.classify_effective(message, code, entity).into()
            }
            other => other,
        }
    }
}

fn parse_embedded(message: &str) -> Option<(i64, String)> {
    let caps = EMBEDDED_ERROR.captures(message)?;
    let code = caps["code"].parse::<i64>().ok()?;
    Some((code, caps["message"].to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn classify(message: &str, code: i64) -> ClassifiedError {
        ErrorClassifier::new().classify(message, code, None)
    }

    #[test]
    fn test_split_state_prefix_numeric() {
        assert_eq!(
            split_state_prefix("SQLSTATE[123]: Test error", 0),
            ("Test error".to_string(), 123)
        );
    }

    #[test]
    fn test_split_state_prefix_non_numeric_state() {
        assert_eq!(
            split_state_prefix(GONE_AWAY_SENTINEL, 0),
            (GONE_AWAY_SENTINEL.to_string(), 0)
        );
    }

    #[test]
    fn test_split_state_prefix_without_prefix() {
        assert_eq!(
            split_state_prefix("Table 'shop.x' doesn't exist", 1146),
            ("Table 'shop.x' doesn't exist".to_string(), 1146)
        );
    }

    #[test]
    fn test_split_state_prefix_overflowing_state() {
        let message = "SQLSTATE[99999999999999999999999]: boom";
        assert_eq!(split_state_prefix(message, 7), (message.to_string(), 7));
    }

    #[test]
    fn test_server_gone_away() {
        assert_eq!(
            classify(GONE_AWAY_SENTINEL, 0),
            ClassifiedError::TransientConnectivityLoss
        );
    }

    #[test]
    fn test_gone_away_requires_exact_text() {
        let message = "SQLSTATE[HY000]: General error: 2006 MySQL server has gone away!";
        assert_eq!(
            classify(message, 0),
            ClassifiedError::General {
                message: message.to_string(),
                code: 0
            }
        );
    }

    #[test]
    fn test_unknown_general_error_is_returned_unchanged() {
        assert_eq!(
            classify("Unknown", 0),
            ClassifiedError::General {
                message: "Unknown".to_string(),
                code: 0
            }
        );
    }

    #[test]
    fn test_duplicate_entry() {
        assert_eq!(
            classify("Duplicate entry 'a' for key 'PRIMARY'", 1062),
            ClassifiedError::DuplicateEntry { entity: None }
        );
    }

    #[test]
    fn test_duplicate_entry_with_entity() {
        let classified = ErrorClassifier::new().classify("", 1062, Some("Customer"));
        assert_eq!(
            classified,
            ClassifiedError::DuplicateEntry {
                entity: Some("Customer".to_string())
            }
        );
        assert_eq!(DbError::from(classified).to_string(), "Customer already exists");
    }

    #[test]
    fn test_unhandled_code_is_returned_unchanged() {
        assert_eq!(
            classify("", 1000),
            ClassifiedError::General {
                message: String::new(),
                code: 1000
            }
        );
    }

    #[test]
    fn test_user_defined_wrapping_duplicate() {
        let classified = classify("Error [1062] - Customer", 45000);
        assert_eq!(
            classified,
            ClassifiedError::DuplicateEntry {
                entity: Some("Customer".to_string())
            }
        );
        let err = DbError::from(classified);
        assert_eq!(err.to_string(), "Customer already exists");
        assert_eq!(err.code(), 1062);
    }

    #[test]
    fn test_user_defined_wrapping_user_defined_is_terminal() {
        assert_eq!(
            classify("Error [45000] - X", 45000),
            ClassifiedError::UserDefined {
                code: 45000,
                message: "Error [45000] - X".to_string()
            }
        );
    }

    #[test]
    fn test_unprocessable_user_defined() {
        assert_eq!(
            classify("Unprocessable", 45000),
            ClassifiedError::UserDefined {
                code: 45000,
                message: "Unprocessable".to_string()
            }
        );
    }

    #[test]
    fn test_user_defined_wrapping_other_code() {
        assert_eq!(
            classify("Error [1452] - Invoice", 45000),
            ClassifiedError::General {
                message: "Invoice".to_string(),
                code: 1452
            }
        );
    }

    #[test]
    fn test_user_defined_with_state_prefix() {
        assert_eq!(
            classify("SQLSTATE[45000]: Error [1062] - Customer", 0),
            ClassifiedError::DuplicateEntry {
                entity: Some("Customer".to_string())
            }
        );
    }

    #[test]
    fn test_user_defined_overflowing_embedded_code() {
        let message = "Error [184467440737095516160] - X";
        assert_eq!(
            classify(message, 45000),
            ClassifiedError::UserDefined {
                code: 45000,
                message: message.to_string()
            }
        );
    }

    #[test]
    fn test_classify_error_passes_non_query_errors() {
        let classifier = ErrorClassifier::new();
        let err = DbError::connection("refused", 2002);
        assert_eq!(classifier.classify_error(err.clone(), None), err);
    }

    #[test]
    fn test_classify_error_does_not_parse_state_twice() {
        let classifier = ErrorClassifier::new();
        let (message, code) =
            split_state_prefix("SQLSTATE[45000]: Rejected SQLSTATE[1062]: Customer", 0);
        assert_eq!(code, 45000);

        let err = classifier.classify_error(DbError::query(message, code), None);
        assert_eq!(
            err,
            DbError::user_defined(45000, "Rejected SQLSTATE[1062]: Customer")
        );
    }

    #[test]
    fn test_user_defined_embedding_general_code_is_not_gone_away() {
        let message = format!("Error [0] - {GONE_AWAY_SENTINEL}");
        assert_eq!(
            classify(&message, 45000),
            ClassifiedError::General {
                message: GONE_AWAY_SENTINEL.to_string(),
                code: 0
            }
        );
    }

    #[test]
    fn test_classify_error_query() {
        let classifier = ErrorClassifier::new();
        let err = DbError::query(GONE_AWAY_SENTINEL, 0);
        assert_eq!(classifier.classify_error(err, None), DbError::ServerGoneAway);
    }
}
