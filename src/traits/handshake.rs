//! Handshake capability trait abstraction.
//!
//! The device-pairing protocol is an external capability. This module
//! describes the boundary the session manager needs from it: open a
//! connection with some authentication state, receive connection and
//! credential events, request a pairing code, send one text message.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use crate::domain::{AccountInfo, AuthState, CredentialUpdate};
use crate::error::HandshakeError;

/// Protocol version used when negotiation fails.
pub const FALLBACK_VERSION: ProtocolVersion = ProtocolVersion([2, 3000, 1015901307]);

/// Protocol version triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProtocolVersion(pub [u32; 3]);

impl Default for ProtocolVersion {
    fn default() -> Self {
        FALLBACK_VERSION
    }
}

/// Client identity announced to the remote side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BrowserIdentity {
    pub platform: String,
    pub browser: String,
    pub version: String,
}

impl BrowserIdentity {
    /// Desktop Chrome on macOS, the most widely accepted identity.
    pub fn macos_chrome() -> Self {
        Self {
            platform: "Mac OS".to_string(),
            browser: "Chrome".to_string(),
            version: "14.4.1".to_string(),
        }
    }
}

/// Options for opening a handshake connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandshakeConfig {
    pub version: ProtocolVersion,
    pub browser: BrowserIdentity,
    pub sync_full_history: bool,
    pub mark_online_on_connect: bool,
    pub connect_timeout_ms: u64,
    /// `None` disables the per-query timeout.
    pub default_query_timeout_ms: Option<u64>,
}

impl HandshakeConfig {
    pub fn new(version: ProtocolVersion) -> Self {
        Self {
            version,
            browser: BrowserIdentity::macos_chrome(),
            sync_full_history: false,
            mark_online_on_connect: true,
            connect_timeout_ms: 60_000,
            default_query_timeout_ms: None,
        }
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}

/// Connection phase reported by the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionPhase {
    Connecting,
    Open,
    Close,
}

/// Why a connection closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The account removed this device. Permanent.
    LoggedOut,
    ConnectionClosed,
    /// Lost or timed out.
    ConnectionLost,
    /// Another client took over the connection.
    ConnectionReplaced,
    BadSession,
    /// The remote side asks for a fresh connection, typically right after
    /// pairing.
    RestartRequired,
    Unavailable,
    Other(u16),
    Unknown,
}

impl DisconnectReason {
    pub fn from_status_code(code: Option<u16>) -> Self {
        match code {
            Some(401) => DisconnectReason::LoggedOut,
            Some(428) => DisconnectReason::ConnectionClosed,
            Some(408) => DisconnectReason::ConnectionLost,
            Some(440) => DisconnectReason::ConnectionReplaced,
            Some(500) => DisconnectReason::BadSession,
            Some(515) => DisconnectReason::RestartRequired,
            Some(503) => DisconnectReason::Unavailable,
            Some(other) => DisconnectReason::Other(other),
            None => DisconnectReason::Unknown,
        }
    }

    pub fn status_code(&self) -> Option<u16> {
        match self {
            DisconnectReason::LoggedOut => Some(401),
            DisconnectReason::ConnectionClosed => Some(428),
            DisconnectReason::ConnectionLost => Some(408),
            DisconnectReason::ConnectionReplaced => Some(440),
            DisconnectReason::BadSession => Some(500),
            DisconnectReason::RestartRequired => Some(515),
            DisconnectReason::Unavailable => Some(503),
            DisconnectReason::Other(code) => Some(*code),
            DisconnectReason::Unknown => None,
        }
    }

    /// Only a logout ends the session for good; anything else is retried.
    pub fn is_logged_out(&self) -> bool {
        matches!(self, DisconnectReason::LoggedOut)
    }
}

/// A change in connection state, possibly carrying a new QR payload.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionUpdate {
    pub connection: Option<ConnectionPhase>,
    pub qr: Option<String>,
    /// Set when `connection` is `Close`.
    pub disconnect: Option<DisconnectReason>,
}

impl ConnectionUpdate {
    pub fn phase(phase: ConnectionPhase) -> Self {
        Self {
            connection: Some(phase),
            ..Self::default()
        }
    }

    pub fn qr(payload: impl Into<String>) -> Self {
        Self {
            qr: Some(payload.into()),
            ..Self::default()
        }
    }

    pub fn closed(reason: DisconnectReason) -> Self {
        Self {
            connection: Some(ConnectionPhase::Close),
            qr: None,
            disconnect: Some(reason),
        }
    }
}

/// Events emitted by an open handshake connection.
#[derive(Debug, Clone, PartialEq)]
pub enum HandshakeEvent {
    Connection(ConnectionUpdate),
    Credentials(CredentialUpdate),
}

/// A freshly opened connection and its event stream.
///
/// The receiver exists before any event is produced, so nothing emitted by
/// the connection can be missed. Dropping it unsubscribes.
pub struct OpenedConnection {
    pub connection: Arc<dyn HandshakeConnection>,
    pub events: mpsc::Receiver<HandshakeEvent>,
}

/// Trait for a live handshake connection.
#[async_trait]
pub trait HandshakeConnection: Send + Sync {
    /// Whether the credentials behind this connection are registered.
    fn is_registered(&self) -> bool;

    /// The account this connection authenticated as, once known.
    fn account(&self) -> Option<AccountInfo>;

    /// Ask for a pairing code for a digits-only phone number.
    async fn request_pairing_code(&self, phone_number: &str) -> Result<String, HandshakeError>;

    /// Send a plain text message.
    async fn send_text(&self, to: &str, text: &str) -> Result<(), HandshakeError>;

    /// Close the connection. No events are delivered afterwards.
    fn shutdown(&self);
}

/// Trait for opening handshake connections.
#[async_trait]
pub trait HandshakeConnector: Send + Sync {
    /// Ask the remote side for the current protocol version.
    async fn negotiate_version(&self) -> Result<ProtocolVersion, HandshakeError>;

    /// Open a connection using the given authentication state.
    async fn connect(
        &self,
        config: HandshakeConfig,
        auth: AuthState,
    ) -> Result<OpenedConnection, HandshakeError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnect_reason_codes() {
        assert!(DisconnectReason::from_status_code(Some(401)).is_logged_out());
        assert_eq!(
            DisconnectReason::from_status_code(Some(515)),
            DisconnectReason::RestartRequired
        );
        assert_eq!(
            DisconnectReason::from_status_code(Some(418)),
            DisconnectReason::Other(418)
        );
        assert_eq!(DisconnectReason::from_status_code(None), DisconnectReason::Unknown);
        assert!(!DisconnectReason::Unknown.is_logged_out());
        assert!(!DisconnectReason::ConnectionReplaced.is_logged_out());
    }

    #[test]
    fn test_status_code_round_trip() {
        for code in [401u16, 408, 428, 440, 500, 503, 515, 999] {
            let reason = DisconnectReason::from_status_code(Some(code));
            assert_eq!(reason.status_code(), Some(code));
        }
    }

    #[test]
    fn test_default_handshake_config() {
        let config = HandshakeConfig::new(ProtocolVersion([2, 3000, 1]));
        assert!(!config.sync_full_history);
        assert!(config.mark_online_on_connect);
        assert_eq!(config.connect_timeout(), Duration::from_secs(60));
        assert_eq!(config.default_query_timeout_ms, None);
        assert_eq!(config.browser.platform, "Mac OS");
        assert_eq!(config.browser.browser, "Chrome");
    }

    #[test]
    fn test_version_serializes_as_array() {
        let json = serde_json::to_string(&ProtocolVersion([2, 3000, 7])).unwrap();
        assert_eq!(json, "[2,3000,7]");
    }
}
