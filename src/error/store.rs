//! Credential store errors.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while reading or writing a credential slot.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Filesystem operation failed.
    #[error("I/O error during {operation} on {}: {source}", path.display())]
    Io {
        operation: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Slot contents could not be (de)serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The identifier cannot name a credential slot.
    #[error("Invalid identifier: {0:?}")]
    InvalidIdentifier(String),

    /// Injected failure from a test double.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// The blocking filesystem task panicked or was cancelled.
    #[error("Store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl StoreError {
    pub(crate) fn io(operation: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            operation,
            path: path.into(),
            source,
        }
    }

    /// Get a short error code for logging.
    pub fn error_code(&self) -> &'static str {
        match self {
            StoreError::Io { .. } => "STORE_IO",
            StoreError::Serialization(_) => "STORE_SERDE",
            StoreError::InvalidIdentifier(_) => "STORE_BAD_ID",
            StoreError::Unavailable(_) => "STORE_UNAVAILABLE",
            StoreError::Task(_) => "STORE_TASK",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_display_includes_path() {
        let err = StoreError::io(
            "write",
            "/tmp/sessions/abc/creds.json",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        let msg = err.to_string();
        assert!(msg.contains("write"));
        assert!(msg.contains("creds.json"));
        assert!(msg.contains("denied"));
        assert_eq!(err.error_code(), "STORE_IO");
    }

    #[test]
    fn test_serde_error_conversion() {
        let json_err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err: StoreError = json_err.into();
        assert!(matches!(err, StoreError::Serialization(_)));
    }

    #[tokio::test]
    async fn test_panicked_task_converts() {
        let join_err = tokio::task::spawn_blocking(|| panic!("boom")).await.unwrap_err();
        let err: StoreError = join_err.into();
        assert_eq!(err.error_code(), "STORE_TASK");
        assert!(err.to_string().starts_with("Store task failed"));
    }
}
