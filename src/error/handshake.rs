//! Errors reported by the handshake capability.

use thiserror::Error;

/// Handshake connection errors.
#[derive(Debug, Clone, Error)]
pub enum HandshakeError {
    /// Could not open the connection.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// The connection went away while a request was in flight.
    #[error("Disconnected from handshake bridge")]
    Disconnected,

    /// The remote side throttled the request.
    #[error("Rate limited: {0}")]
    RateLimited(String),

    /// A request was rejected.
    #[error("Request failed ({}): {message}", status.map(|s| s.to_string()).unwrap_or_else(|| "no status".to_string()))]
    RequestFailed { status: Option<u16>, message: String },

    /// The connection or request timed out.
    #[error("Timed out: {0}")]
    Timeout(String),

    /// The bridge sent something we could not understand.
    #[error("Protocol error: {0}")]
    Protocol(String),
}

impl HandshakeError {
    /// Build an error from a failed request, classifying rate limits.
    ///
    /// Some bridges only report the status inside the message text, so a
    /// `429` anywhere in the message counts as a rate limit too.
    pub fn from_rejection(status: Option<u16>, message: impl Into<String>) -> Self {
        let message = message.into();
        if status == Some(429) || message.contains("429") {
            HandshakeError::RateLimited(message)
        } else {
            HandshakeError::RequestFailed { status, message }
        }
    }

    pub fn is_rate_limited(&self) -> bool {
        matches!(self, HandshakeError::RateLimited(_))
    }

    /// Check if a reconnect may fix this error.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            HandshakeError::ConnectionFailed(_)
                | HandshakeError::Disconnected
                | HandshakeError::Timeout(_)
        )
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            HandshakeError::ConnectionFailed(_) => "HS_CONNECT",
            HandshakeError::Disconnected => "HS_DISCONNECTED",
            HandshakeError::RateLimited(_) => "HS_RATE_LIMITED",
            HandshakeError::RequestFailed { .. } => "HS_REQUEST",
            HandshakeError::Timeout(_) => "HS_TIMEOUT",
            HandshakeError::Protocol(_) => "HS_PROTOCOL",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejection_with_429_status_is_rate_limited() {
        let err = HandshakeError::from_rejection(Some(429), "too many");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_rejection_with_429_in_message_is_rate_limited() {
        let err = HandshakeError::from_rejection(None, "Request failed with status 429");
        assert!(err.is_rate_limited());
    }

    #[test]
    fn test_rejection_other_status() {
        let err = HandshakeError::from_rejection(Some(400), "bad number");
        assert!(!err.is_rate_limited());
        assert_eq!(err.to_string(), "Request failed (400): bad number");
    }

    #[test]
    fn test_retryable() {
        assert!(HandshakeError::Disconnected.is_retryable());
        assert!(HandshakeError::Timeout("60s".to_string()).is_retryable());
        assert!(!HandshakeError::RateLimited("x".to_string()).is_retryable());
        assert!(!HandshakeError::Protocol("x".to_string()).is_retryable());
    }
}
