//! Unified error type for the linking service.

use thiserror::Error;

use super::category::ErrorCategory;
use super::handshake::HandshakeError;
use super::store::StoreError;

/// Unified error type for the linking service.
///
/// Only `AlreadyLinked` and `InvalidInput` ever reach an HTTP caller; the
/// others happen after the create response was sent and surface through
/// session status and logs.
#[derive(Debug, Error)]
pub enum LinkerError {
    /// The identifier already carries a linked marker.
    #[error("This ID is already linked to a phone.")]
    AlreadyLinked { unique_id: String },

    /// The request is malformed.
    #[error("{0}")]
    InvalidInput(String),

    /// Pairing was requested without a usable phone number.
    #[error("Pairing requested for {unique_id} without a valid phone number")]
    InvalidPhone { unique_id: String },

    /// The pairing-code request was throttled.
    #[error("Pairing code request for {unique_id} was rate limited")]
    RateLimited { unique_id: String },

    /// The handshake failed in a way a reconnect may fix.
    #[error("Handshake error: {0}")]
    Handshake(#[from] HandshakeError),

    /// The account logged the device out.
    #[error("Session for {unique_id} was logged out")]
    LoggedOut { unique_id: String },

    /// A credential slot could not be read or written.
    #[error("Credential store error: {0}")]
    Store(#[from] StoreError),
}

impl LinkerError {
    /// Get the category of this error.
    pub fn category(&self) -> ErrorCategory {
        match self {
            LinkerError::AlreadyLinked { .. }
            | LinkerError::InvalidInput(_)
            | LinkerError::InvalidPhone { .. } => ErrorCategory::User,
            LinkerError::RateLimited { .. } => ErrorCategory::RateLimit,
            LinkerError::Handshake(err) if err.is_rate_limited() => ErrorCategory::RateLimit,
            LinkerError::Handshake(_) => ErrorCategory::Network,
            LinkerError::LoggedOut { .. } => ErrorCategory::Auth,
            LinkerError::Store(StoreError::InvalidIdentifier(_)) => ErrorCategory::User,
            LinkerError::Store(_) => ErrorCategory::System,
        }
    }

    /// Check if this error is retried automatically.
    pub fn is_retryable(&self) -> bool {
        match self {
            LinkerError::Handshake(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            LinkerError::AlreadyLinked { .. } => "ALREADY_LINKED",
            LinkerError::InvalidInput(_) => "INVALID_INPUT",
            LinkerError::InvalidPhone { .. } => "INVALID_PHONE",
            LinkerError::RateLimited { .. } => "RATE_LIMITED",
            LinkerError::Handshake(err) => err.error_code(),
            LinkerError::LoggedOut { .. } => "LOGGED_OUT",
            LinkerError::Store(err) => err.error_code(),
        }
    }

    /// Check if this error was caused by the caller rather than the service.
    pub fn is_client_error(&self) -> bool {
        self.category() == ErrorCategory::User
    }
}
