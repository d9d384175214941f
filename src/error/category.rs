//! Error category classification for unified error handling.
//!
//! Categories drive retry decisions and decide how an error is surfaced:
//! through the HTTP response for caller mistakes, or through session status
//! for failures that happen after the response was sent.

use std::fmt;

/// High-level categorization of errors for handling decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Handshake transport problems (connect failures, dropped links).
    /// Transient, retried through reconnect.
    Network,

    /// The linked account rejected or revoked the handshake.
    Auth,

    /// The remote side throttled the request.
    RateLimit,

    /// Caller input is invalid or conflicts with durable state.
    User,

    /// Filesystem or other OS-level failures.
    System,
}

impl ErrorCategory {
    /// Returns true if errors in this category are generally transient
    /// and the operation can be retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ErrorCategory::Network)
    }

    /// Returns a short label for the category suitable for logging.
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "network",
            ErrorCategory::Auth => "auth",
            ErrorCategory::RateLimit => "rate_limit",
            ErrorCategory::User => "user",
            ErrorCategory::System => "system",
        }
    }

    /// Returns suggested recovery actions for this category.
    pub fn recovery_hint(&self) -> &'static str {
        match self {
            ErrorCategory::Network => "The link will be retried automatically",
            ErrorCategory::Auth => "Start a new link session from the phone",
            ErrorCategory::RateLimit => "Wait a few minutes before requesting another code",
            ErrorCategory::User => "Check the request and try again",
            ErrorCategory::System => "Check file permissions and available disk space",
        }
    }
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_retryable() {
        assert!(ErrorCategory::Network.is_retryable());
        assert!(!ErrorCategory::Auth.is_retryable());
        assert!(!ErrorCategory::RateLimit.is_retryable());
        assert!(!ErrorCategory::User.is_retryable());
        assert!(!ErrorCategory::System.is_retryable());
    }

    #[test]
    fn test_category_display() {
        assert_eq!(format!("{}", ErrorCategory::Network), "network");
        assert_eq!(format!("{}", ErrorCategory::RateLimit), "rate_limit");
    }

    #[test]
    fn test_category_recovery_hint() {
        assert!(ErrorCategory::RateLimit.recovery_hint().contains("Wait"));
        assert!(ErrorCategory::System.recovery_hint().contains("disk"));
    }
}
