//! Link session records and their state transitions.
//!
//! A [`Session`] is plain data owned by the session manager. Every mutation
//! goes through one of the transition methods below so that the QR/pairing
//! invariants hold no matter which event arrives in which order:
//!
//! - at most one of `qr` and `pairing_code` is set
//! - neither is set once the session is `connected` or has failed
//! - a pairing code is requested at most once

use std::fmt;
use std::str::FromStr;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// How the account holder proves possession of the phone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LinkMethod {
    /// Scan a QR code from the phone.
    #[default]
    Qr,
    /// Type a pairing code on the phone.
    Pairing,
}

impl LinkMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            LinkMethod::Qr => "qr",
            LinkMethod::Pairing => "pairing",
        }
    }
}

impl fmt::Display for LinkMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LinkMethod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "qr" => Ok(LinkMethod::Qr),
            "pairing" => Ok(LinkMethod::Pairing),
            other => Err(format!("Unknown link method: {}", other)),
        }
    }
}

/// Externally visible session status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Initializing,
    Qr,
    PairingCode,
    RateLimited,
    ErrorInvalidPhone,
    Finalizing,
    Connected,
    AuthFailed,
    /// The handshake could never be started, or reconnects ran out.
    LaunchFailed,
    /// Credentials or the marker could not be written.
    StorageFailed,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SessionStatus::Initializing => "initializing",
            SessionStatus::Qr => "qr",
            SessionStatus::PairingCode => "pairing_code",
            SessionStatus::RateLimited => "rate_limited",
            SessionStatus::ErrorInvalidPhone => "error_invalid_phone",
            SessionStatus::Finalizing => "finalizing",
            SessionStatus::Connected => "connected",
            SessionStatus::AuthFailed => "auth_failed",
            SessionStatus::LaunchFailed => "launch_failed",
            SessionStatus::StorageFailed => "storage_failed",
        }
    }

    /// Terminal failure statuses end the session's connection.
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            SessionStatus::RateLimited
                | SessionStatus::ErrorInvalidPhone
                | SessionStatus::AuthFailed
                | SessionStatus::LaunchFailed
                | SessionStatus::StorageFailed
        )
    }

    /// Whether the handshake has succeeded and the session is wrapping up.
    pub fn is_linking(&self) -> bool {
        matches!(self, SessionStatus::Finalizing | SessionStatus::Connected)
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Progress of the one pairing-code request a session may make.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PairingState {
    /// No request pending.
    #[default]
    Idle,
    /// Waiting for the handshake to settle; nothing sent yet.
    Settling,
    /// The request has been issued.
    Requested,
}

/// One link attempt.
#[derive(Debug, Clone)]
pub struct Session {
    pub session_id: String,
    pub unique_id: String,
    pub method: LinkMethod,
    /// Normalized digits-only phone number.
    pub phone_number: Option<String>,
    pub status: SessionStatus,
    /// Latest QR code as a base64 PNG.
    pub qr: Option<String>,
    pub pairing_code: Option<String>,
    pub pairing: PairingState,
    /// Registry generation of the driver that owns this session.
    pub generation: u64,
    pub created_at: Instant,
}

impl Session {
    pub fn new(
        session_id: impl Into<String>,
        unique_id: impl Into<String>,
        method: LinkMethod,
        phone_number: Option<String>,
        generation: u64,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            unique_id: unique_id.into(),
            method,
            phone_number,
            status: SessionStatus::Initializing,
            qr: None,
            pairing_code: None,
            pairing: PairingState::Idle,
            generation,
            created_at: Instant::now(),
        }
    }

    /// Whether a pairing-code request has been started for this session.
    pub fn pairing_requested(&self) -> bool {
        self.pairing != PairingState::Idle
    }

    fn accepts_codes(&self) -> bool {
        !self.status.is_linking() && !self.status.is_failure()
    }

    /// Store a freshly rendered QR code.
    ///
    /// Ignored for pairing sessions and once the session has moved past the
    /// code-display phase.
    pub fn set_qr(&mut self, qr_png: String) -> bool {
        if self.method != LinkMethod::Qr || !self.accepts_codes() {
            return false;
        }
        self.qr = Some(qr_png);
        self.status = SessionStatus::Qr;
        true
    }

    /// Claim the session's single pairing request.
    ///
    /// Returns true exactly once per session (unless a disconnect interrupts
    /// the settle wait, see [`Session::interrupt_pairing`]).
    pub fn begin_pairing(&mut self) -> bool {
        if self.method != LinkMethod::Pairing
            || self.pairing_code.is_some()
            || self.pairing != PairingState::Idle
            || !self.accepts_codes()
        {
            return false;
        }
        self.pairing = PairingState::Settling;
        true
    }

    /// Record that the pairing request has been sent.
    pub fn mark_pairing_requested(&mut self) {
        self.pairing = PairingState::Requested;
    }

    /// Roll back a pairing request that never left the settle wait.
    pub fn interrupt_pairing(&mut self) -> bool {
        if self.pairing == PairingState::Settling {
            self.pairing = PairingState::Idle;
            true
        } else {
            false
        }
    }

    pub fn set_pairing_code(&mut self, code: String) -> bool {
        if self.method != LinkMethod::Pairing || !self.accepts_codes() {
            return false;
        }
        self.pairing_code = Some(code);
        self.status = SessionStatus::PairingCode;
        true
    }

    /// The handshake opened. The last code stays visible until the
    /// session is connected.
    ///
    /// Returns true while the session is still waiting to connect, including
    /// when an earlier connection already got this far.
    pub fn mark_finalizing(&mut self) -> bool {
        if self.status.is_failure() || self.status == SessionStatus::Connected {
            return false;
        }
        self.status = SessionStatus::Finalizing;
        true
    }

    pub fn mark_connected(&mut self) {
        self.qr = None;
        self.pairing_code = None;
        self.status = SessionStatus::Connected;
    }

    /// Move into a terminal failure status, dropping any displayed code.
    pub fn fail(&mut self, status: SessionStatus) {
        debug_assert!(status.is_failure());
        self.qr = None;
        self.pairing_code = None;
        self.status = status;
    }
}
