//! Concrete implementations of trait abstractions.
//!
//! # Adapters
//!
//! - [`BridgeConnector`] - handshake through an external bridge over WebSocket
//! - [`FileCredentialStore`] - credential slots as JSON files
//! - [`PngQrRenderer`] - QR payloads as base64 PNG images
//!
//! # Mock Implementations
//!
//! The [`mock`] submodule provides test doubles for all adapters:
//! - [`mock::MockConnector`] - handshake with event injection
//! - [`mock::InMemoryStore`] - in-memory credential slots
//! - [`mock::StubQrRenderer`] - readable QR stand-in

pub mod bridge;
pub mod file_store;
pub mod mock;
pub mod png_qr;

pub use bridge::{BridgeConnection, BridgeConnector};
pub use file_store::FileCredentialStore;
pub use mock::{InMemoryStore, MockConnection, MockConnector, StubQrRenderer};
pub use png_qr::PngQrRenderer;
