//! Stub QR renderer for testing.

use std::sync::{Arc, Mutex};

use crate::traits::{QrError, QrRenderer};

/// Returns `png:<payload>` instead of an image so tests can see which
/// payload was rendered.
#[derive(Debug, Clone, Default)]
pub struct StubQrRenderer {
    should_fail: Arc<Mutex<bool>>,
}

impl StubQrRenderer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_should_fail(&self, should_fail: bool) {
        *self.should_fail.lock().unwrap() = should_fail;
    }
}

impl QrRenderer for StubQrRenderer {
    fn render(&self, payload: &str) -> Result<String, QrError> {
        if *self.should_fail.lock().unwrap() {
            return Err(QrError::Encode("Mock render failure".to_string()));
        }
        Ok(format!("png:{}", payload))
    }
}
