//! Trait abstractions for dependency injection and testability.
//!
//! # Traits
//!
//! - [`CredentialStore`] - durable per-identifier credential slots
//! - [`HandshakeConnector`] / [`HandshakeConnection`] - the external
//!   device-pairing capability
//! - [`QrRenderer`] - QR payload to image

pub mod handshake;
pub mod qr;
pub mod store;

pub use handshake::{
    BrowserIdentity, ConnectionPhase, ConnectionUpdate, DisconnectReason, HandshakeConfig,
    HandshakeConnection, HandshakeConnector, HandshakeEvent, OpenedConnection, ProtocolVersion,
    FALLBACK_VERSION,
};
pub use qr::{QrError, QrRenderer};
pub use store::CredentialStore;
