//! QR rendering trait abstraction.

use thiserror::Error;

/// QR rendering errors.
#[derive(Debug, Clone, Error)]
pub enum QrError {
    /// The payload does not fit in a QR code.
    #[error("QR encoding failed: {0}")]
    Encode(String),
    /// The rendered image could not be written.
    #[error("QR image encoding failed: {0}")]
    Image(String),
}

/// Turns a QR payload into an image the caller can display.
pub trait QrRenderer: Send + Sync {
    /// Render the payload as a base64-encoded PNG (no data URI prefix).
    fn render(&self, payload: &str) -> Result<String, QrError>;
}
