//! Translates handshake events into session transitions and store writes.
//!
//! One [`EventAdapter`] exists per live connection. Work that has to wait
//! (the pairing settle delay, the post-open settle delay) runs as sub-tasks
//! in a `JoinSet` owned by the adapter, so dropping the adapter or calling
//! [`EventAdapter::abort_tasks`] cancels every pending timer of that
//! connection.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use super::context::SessionContext;
use super::events::LifecycleEventKind;
use crate::domain::{CredentialUpdate, LinkMethod, LinkedMarker, PairingState, SessionStatus};
use crate::error::LinkerError;
use crate::traits::{
    ConnectionPhase, ConnectionUpdate, DisconnectReason, HandshakeConnection, HandshakeEvent,
};

/// Upper bound for delivering the confirmation notice.
const CONFIRMATION_TIMEOUT: Duration = Duration::from_secs(30);

/// Text of the notice sent to the freshly linked account.
pub fn confirmation_text(unique_id: &str) -> String {
    format!(
        "🚀 *MATDEV Linker Active*\n\nYour ID: `{}` is now successfully connected.",
        unique_id
    )
}

/// What the driver should do after an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Step {
    Continue,
    /// The session reached a terminal failure; tear the connection down.
    Terminal,
    Closed(DisconnectReason),
}

/// Result of a sub-task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TaskOutcome {
    Done,
    /// Marker written, status `connected`, confirmation attempted.
    Linked,
    Terminal,
}

pub(crate) struct EventAdapter {
    ctx: SessionContext,
    connection: Arc<dyn HandshakeConnection>,
    tasks: JoinSet<TaskOutcome>,
    finalize_started: bool,
}

impl EventAdapter {
    pub fn new(ctx: SessionContext, connection: Arc<dyn HandshakeConnection>) -> Self {
        Self {
            ctx,
            connection,
            tasks: JoinSet::new(),
            finalize_started: false,
        }
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty()
    }

    /// Wait for the next sub-task to finish.
    pub async fn next_outcome(&mut self) -> Option<TaskOutcome> {
        match self.tasks.join_next().await? {
            Ok(outcome) => Some(outcome),
            Err(e) => {
                if e.is_panic() {
                    error!(session_id = %self.ctx.session_id, "Session sub-task panicked");
                }
                Some(TaskOutcome::Done)
            }
        }
    }

    /// Cancel pending settle waits. A pairing request that had not left its
    /// settle wait may be issued again on the next connection.
    pub async fn abort_tasks(&mut self) {
        self.tasks.abort_all();
        self.ctx.update(|s| s.interrupt_pairing()).await;
    }

    pub async fn handle(&mut self, event: HandshakeEvent) -> Step {
        match event {
            HandshakeEvent::Credentials(update) => self.on_credentials(update).await,
            HandshakeEvent::Connection(update) => self.on_connection_update(update).await,
        }
    }

    async fn on_credentials(&mut self, update: CredentialUpdate) -> Step {
        if update.is_empty() {
            return Step::Continue;
        }

        match self.ctx.shared.store.persist(&self.ctx.unique_id, &update).await {
            Ok(()) => {
                debug!(unique_id = %self.ctx.unique_id, "Credentials persisted");
                self.ctx.publish(LifecycleEventKind::CredentialsPersisted);
                Step::Continue
            }
            Err(e) => {
                error!(
                    session_id = %self.ctx.session_id,
                    unique_id = %self.ctx.unique_id,
                    "Failed to persist credentials: {}",
                    e
                );
                self.ctx.report(&LinkerError::from(e));
                self.ctx.fail(SessionStatus::StorageFailed).await;
                Step::Terminal
            }
        }
    }

    async fn on_connection_update(&mut self, update: ConnectionUpdate) -> Step {
        let Some(session) = self.ctx.snapshot().await else {
            return Step::Continue;
        };

        if let Some(payload) = &update.qr {
            if session.method == LinkMethod::Qr {
                self.issue_qr(payload).await;
            }
        }

        if session.method == LinkMethod::Pairing
            && !self.connection.is_registered()
            && session.pairing_code.is_none()
            && !session.pairing_requested()
        {
            let Some(phone) = session.phone_number.clone() else {
                let err = LinkerError::InvalidPhone {
                    unique_id: self.ctx.unique_id.clone(),
                };
                warn!("{}", err);
                self.ctx.report(&err);
                self.ctx.fail(SessionStatus::ErrorInvalidPhone).await;
                return Step::Terminal;
            };

            let triggered =
                update.qr.is_some() || update.connection == Some(ConnectionPhase::Connecting);
            if triggered && self.ctx.update(|s| s.begin_pairing()).await == Some(true) {
                let ctx = self.ctx.clone();
                let connection = self.connection.clone();
                self.tasks.spawn(request_pairing_code(ctx, connection, phone));
            }
        }

        match update.connection {
            Some(ConnectionPhase::Open) => {
                info!(unique_id = %self.ctx.unique_id, "Handshake complete, stabilizing");
                if self.ctx.update(|s| s.mark_finalizing()).await == Some(true)
                    && !self.finalize_started
                {
                    self.finalize_started = true;
                    let ctx = self.ctx.clone();
                    let connection = self.connection.clone();
                    self.tasks.spawn(finalize(ctx, connection));
                }
                Step::Continue
            }
            Some(ConnectionPhase::Close) => {
                Step::Closed(update.disconnect.unwrap_or(DisconnectReason::Unknown))
            }
            _ => Step::Continue,
        }
    }

    async fn issue_qr(&self, payload: &str) {
        match self.ctx.shared.renderer.render(payload) {
            Ok(png) => {
                if self.ctx.update(|s| s.set_qr(png)).await == Some(true) {
                    info!(unique_id = %self.ctx.unique_id, "New QR issued");
                    self.ctx.publish(LifecycleEventKind::QrIssued);
                }
            }
            Err(e) => {
                error!(unique_id = %self.ctx.unique_id, "Failed to render QR: {}", e);
                self.ctx.publish(LifecycleEventKind::Error {
                    code: "QR_RENDER".to_string(),
                    message: e.to_string(),
                });
            }
        }
    }
}

/// Wait for the handshake to settle, then ask for a pairing code.
async fn request_pairing_code(
    ctx: SessionContext,
    connection: Arc<dyn HandshakeConnection>,
    phone_number: String,
) -> TaskOutcome {
    tokio::time::sleep(ctx.timings().pairing_settle).await;

    let proceed = ctx
        .update(|s| {
            let open = !s.status.is_linking() && !s.status.is_failure();
            if open && s.pairing == PairingState::Settling {
                s.mark_pairing_requested();
                true
            } else {
                false
            }
        })
        .await;
    if proceed != Some(true) {
        return TaskOutcome::Done;
    }

    info!(unique_id = %ctx.unique_id, "Requesting pairing code for {}", phone_number);
    ctx.publish(LifecycleEventKind::PairingRequested {
        phone_number: phone_number.clone(),
    });

    match connection.request_pairing_code(&phone_number).await {
        Ok(code) => {
            if ctx.update(|s| s.set_pairing_code(code)).await == Some(true) {
                info!(unique_id = %ctx.unique_id, "Pairing code issued");
                ctx.publish(LifecycleEventKind::PairingCodeIssued);
            }
            TaskOutcome::Done
        }
        Err(e) if e.is_rate_limited() => {
            let err = LinkerError::RateLimited {
                unique_id: ctx.unique_id.clone(),
            };
            warn!("{}: {}", err, e);
            ctx.report(&err);
            ctx.fail(SessionStatus::RateLimited).await;
            TaskOutcome::Terminal
        }
        Err(e) => {
            error!(unique_id = %ctx.unique_id, "Pairing code request failed: {}", e);
            ctx.report(&LinkerError::from(e));
            TaskOutcome::Done
        }
    }
}

/// Let the phone finish syncing, then record the link and notify the
/// account.
async fn finalize(ctx: SessionContext, connection: Arc<dyn HandshakeConnection>) -> TaskOutcome {
    tokio::time::sleep(ctx.timings().open_settle).await;

    let account = connection.account();
    let marker = LinkedMarker::new(account.as_ref(), Utc::now().timestamp_millis());

    if let Err(e) = ctx
        .shared
        .store
        .write_linked_marker(&ctx.unique_id, &marker)
        .await
    {
        error!(unique_id = %ctx.unique_id, "Failed to write linked marker: {}", e);
        ctx.report(&LinkerError::from(e));
        ctx.fail(SessionStatus::StorageFailed).await;
        return TaskOutcome::Terminal;
    }
    ctx.publish(LifecycleEventKind::MarkerWritten {
        wa_number: marker.wa_number.clone(),
    });

    ctx.update(|s| s.mark_connected()).await;

    let Some(account) = account else {
        warn!(unique_id = %ctx.unique_id, "Linked without account info, skipping confirmation");
        return TaskOutcome::Linked;
    };

    let to = account.chat_address();
    let text = confirmation_text(&ctx.unique_id);
    match tokio::time::timeout(CONFIRMATION_TIMEOUT, connection.send_text(&to, &text)).await {
        Ok(Ok(())) => {
            info!(unique_id = %ctx.unique_id, "Confirmation sent to {}", to);
            ctx.publish(LifecycleEventKind::ConfirmationSent { to });
        }
        Ok(Err(e)) => {
            warn!(unique_id = %ctx.unique_id, "Failed to send confirmation: {}", e);
            ctx.report(&LinkerError::from(e));
        }
        Err(_) => {
            warn!(unique_id = %ctx.unique_id, "Confirmation timed out");
        }
    }

    TaskOutcome::Linked
}
