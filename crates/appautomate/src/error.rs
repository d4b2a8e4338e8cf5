//! Error type shared by every App Automate action.

/// Reason substituted when a failed response carries no readable `error` field.
pub const GENERIC_FAILURE_REASON: &str = "Internal server error";

/// The two ways an action can fail.
///
/// Every failure is terminal: nothing is retried and nothing is partially
/// recovered, so callers only need to surface the message.
#[derive(Debug, thiserror::Error)]
pub enum AutomateError {
    /// An input was missing or rejected before any network activity.
    #[error("{0}")]
    Validation(String),

    /// The BrowserStack call failed in transport or returned a non-success status.
    #[error("{action} failed!!! Reason : {reason}")]
    Request {
        /// Human label of the action, e.g. "App upload".
        action: String,
        /// HTTP status when a response was received.
        status: Option<u16>,
        /// Reason extracted from the response, or the transport error text.
        reason: String,
    },
}

impl AutomateError {
    pub fn validation(message: impl Into<String>) -> Self {
        AutomateError::Validation(message.into())
    }

    pub fn request(action: &str, status: Option<u16>, reason: impl Into<String>) -> Self {
        AutomateError::Request {
            action: action.to_string(),
            status,
            reason: reason.into(),
        }
    }

    /// Returns the reason string without the action prefix.
    pub fn reason(&self) -> &str {
        match self {
            AutomateError::Validation(message) => message,
            AutomateError::Request { reason, .. } => reason,
        }
    }

    pub fn is_validation(&self) -> bool {
        matches!(self, AutomateError::Validation(_))
    }
}

pub type Result<T> = std::result::Result<T, AutomateError>;

/// Rejects an empty or whitespace-only required input.
pub(crate) fn require_non_empty<'a>(value: &'a str, field: &str) -> Result<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(AutomateError::validation(format!("No {field} given.")));
    }
    Ok(trimmed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_error_renders_action_and_reason() {
        let err = AutomateError::request("App upload", Some(500), "bad app");
        assert_eq!(err.to_string(), "App upload failed!!! Reason : bad app");
        assert_eq!(err.reason(), "bad app");
        assert!(!err.is_validation());
    }

    #[test]
    fn require_non_empty_names_the_field() {
        let err = require_non_empty("  ", "xctest_build_id").unwrap_err();
        assert!(err.is_validation());
        assert_eq!(err.to_string(), "No xctest_build_id given.");
        assert_eq!(require_non_empty(" abc ", "x").unwrap(), "abc");
    }
}
