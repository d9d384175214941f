//! Mock implementations for testing.
//!
//! This module provides mock implementations of all trait abstractions,
//! enabling tests without a live handshake service or file system access.
//!
//! # Available Mocks
//!
//! - [`MockConnector`] / [`MockConnection`] - handshake with event injection
//! - [`InMemoryStore`] - in-memory credential slots
//! - [`StubQrRenderer`] - renders QR payloads as readable strings

pub mod handshake;
pub mod qr;
pub mod store;

pub use handshake::{MockConnection, MockConnector};
pub use qr::StubQrRenderer;
pub use store::InMemoryStore;
