//! Read-Only Validation Gate
//!
//! Every statement or cache-store command passes through this module before it
//! can reach a live connection.
//!
//! # Validators
//! - [`validate_query`] - SQL whitelist on the leading verb plus a keyword blacklist
//! - [`validate_cache_command`] - Redis-style verb whitelist with per-command subcommand lists
//!
//! Both are pure functions: no I/O, no engine access, no shared state.
//! They return a [`ValidationResult`] value instead of an error so callers can
//! report rejections without treating them as failures of the tool itself.
//!
//! # Limitations
//! The SQL check is a lexical heuristic, not a parser. A keyword inside a quoted
//! string literal (`SELECT 'please delete me'`) is rejected.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SherlockError};

pub mod cache_command;
pub mod sql;

pub use cache_command::validate_cache_command;
pub use sql::validate_query;

/// Outcome of a validation check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,

    /// Reason for rejection (present iff `valid` is false)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ValidationResult {
    #[must_use]
    pub const fn ok() -> Self {
        Self { valid: true, error: None }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self { valid: false, error: Some(reason.into()) }
    }

    /// Convert into a `Result` for callers that want `?` propagation
    pub fn into_result(self) -> Result<()> {
        if self.valid {
            Ok(())
        } else {
            Err(SherlockError::validation(self.error.unwrap_or_else(|| "Rejected".to_string())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ok_has_no_error() {
        let result = ValidationResult::ok();
        assert!(result.valid);
        assert!(result.error.is_none());
        assert!(result.into_result().is_ok());
    }

    #[test]
    fn test_rejected_into_result() {
        let err = ValidationResult::rejected("nope").into_result().unwrap_err();
        assert_eq!(err.error_code(), "VALIDATION_FAILED");
        assert_eq!(err.message(), "nope");
    }

    #[test]
    fn test_serialization_omits_error_when_valid() {
        let json = serde_json::to_string(&ValidationResult::ok()).unwrap();
        assert_eq!(json, r#"{"valid":true}"#);
    }
}
