//! PNG QR renderer backed by the `qrcode` and `image` crates.

use std::io::Cursor;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use image::{ImageFormat, Luma};
use qrcode::QrCode;

use crate::traits::{QrError, QrRenderer};

/// Smallest edge of the rendered image, in pixels.
const MIN_DIMENSION: u32 = 256;

/// Renders QR payloads as base64 PNG images.
#[derive(Debug, Clone, Copy, Default)]
pub struct PngQrRenderer;

impl PngQrRenderer {
    pub fn new() -> Self {
        Self
    }
}

impl QrRenderer for PngQrRenderer {
    fn render(&self, payload: &str) -> Result<String, QrError> {
        let code = QrCode::new(payload.as_bytes()).map_err(|e| QrError::Encode(e.to_string()))?;
        let image = code
            .render::<Luma<u8>>()
            .min_dimensions(MIN_DIMENSION, MIN_DIMENSION)
            .build();

        let mut png = Cursor::new(Vec::new());
        image
            .write_to(&mut png, ImageFormat::Png)
            .map_err(|e| QrError::Image(e.to_string()))?;

        Ok(STANDARD.encode(png.into_inner()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const PNG_SIGNATURE: [u8; 8] = [0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];

    #[test]
    fn test_renders_png() {
        let encoded = PngQrRenderer::new()
            .render("2@abc,def,ghi,jkl")
            .unwrap();
        let bytes = STANDARD.decode(encoded).unwrap();
        assert_eq!(&bytes[..8], &PNG_SIGNATURE);

        let decoded = image::load_from_memory(&bytes).unwrap();
        assert!(decoded.width() >= MIN_DIMENSION);
        assert!(decoded.height() >= MIN_DIMENSION);
    }

    #[test]
    fn test_oversized_payload_fails() {
        let payload = "x".repeat(8_000);
        assert!(matches!(
            PngQrRenderer::new().render(&payload),
            Err(QrError::Encode(_))
        ));
    }
}
