//! Lifecycle events.
//!
//! Every notable step a session takes is published on a broadcast channel
//! so observers (tests, the `/api/events` stream) can follow along. Sending
//! never fails for lack of subscribers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::domain::SessionStatus;

/// Type alias for the lifecycle event sender.
pub type LifecycleEventSender = broadcast::Sender<LifecycleEvent>;

/// Create a lifecycle event channel with the specified capacity.
pub fn create_event_channel(
    capacity: usize,
) -> (LifecycleEventSender, broadcast::Receiver<LifecycleEvent>) {
    broadcast::channel(capacity)
}

/// One step in a session's life.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub unique_id: String,
    pub event: LifecycleEventKind,
}

impl LifecycleEvent {
    pub fn new(
        session_id: impl Into<String>,
        unique_id: impl Into<String>,
        event: LifecycleEventKind,
    ) -> Self {
        Self {
            timestamp: Utc::now(),
            session_id: session_id.into(),
            unique_id: unique_id.into(),
            event,
        }
    }
}

/// Why a session record went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemovalReason {
    /// Cleanup after a successful link
    Linked,
    /// A newer session took the identifier
    Superseded,
    /// Idle past its TTL
    Expired,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum LifecycleEventKind {
    StatusChanged {
        from: SessionStatus,
        to: SessionStatus,
    },
    QrIssued,
    PairingRequested {
        phone_number: String,
    },
    PairingCodeIssued,
    CredentialsPersisted,
    MarkerWritten {
        wa_number: Option<String>,
    },
    ConfirmationSent {
        to: String,
    },
    ReconnectScheduled {
        attempt: u32,
        delay_ms: u64,
    },
    /// The identifier's running handshake was replaced by this session.
    ConnectionReplaced {
        previous_session_id: String,
    },
    SessionRemoved {
        reason: RemovalReason,
    },
    Error {
        code: String,
        message: String,
    },
}
