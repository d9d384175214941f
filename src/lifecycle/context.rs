//! State shared by the manager and its session drivers.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;
use tracing::{debug, info};

use super::events::{LifecycleEvent, LifecycleEventKind, LifecycleEventSender, RemovalReason};
use super::registry::ConnectionRegistry;
use crate::config::SessionTimings;
use crate::domain::{Session, SessionStatus};
use crate::error::LinkerError;
use crate::traits::{CredentialStore, HandshakeConnection, HandshakeConnector, QrRenderer};

pub(crate) struct Shared {
    pub store: Arc<dyn CredentialStore>,
    pub connector: Arc<dyn HandshakeConnector>,
    pub renderer: Arc<dyn QrRenderer>,
    pub timings: SessionTimings,
    pub sessions: RwLock<HashMap<String, Session>>,
    pub registry: ConnectionRegistry,
    pub events: LifecycleEventSender,
}

impl Shared {
    pub fn publish(&self, session_id: &str, unique_id: &str, kind: LifecycleEventKind) {
        let _ = self
            .events
            .send(LifecycleEvent::new(session_id, unique_id, kind));
    }

    /// Remove a session record if it still belongs to `generation`.
    pub async fn remove_session(
        &self,
        session_id: &str,
        generation: u64,
        reason: RemovalReason,
    ) -> bool {
        let removed = {
            let mut sessions = self.sessions.write().await;
            match sessions.get(session_id) {
                Some(session) if session.generation == generation => sessions.remove(session_id),
                _ => None,
            }
        };

        match removed {
            Some(session) => {
                info!(
                    session_id = %session.session_id,
                    unique_id = %session.unique_id,
                    ?reason,
                    "Session removed"
                );
                self.publish(
                    &session.session_id,
                    &session.unique_id,
                    LifecycleEventKind::SessionRemoved { reason },
                );
                true
            }
            None => false,
        }
    }
}

/// What a driver knows about the session it runs: a key into the session
/// map and the registry generation it was started with.
#[derive(Clone)]
pub(crate) struct SessionContext {
    pub shared: Arc<Shared>,
    pub session_id: String,
    pub unique_id: String,
    pub generation: u64,
}

impl SessionContext {
    pub fn timings(&self) -> &SessionTimings {
        &self.shared.timings
    }

    pub fn publish(&self, kind: LifecycleEventKind) {
        self.shared.publish(&self.session_id, &self.unique_id, kind);
    }

    /// Publish an error event.
    pub fn report(&self, err: &LinkerError) {
        let category = err.category();
        debug!(
            session_id = %self.session_id,
            %category,
            retryable = err.is_retryable(),
            "{}",
            category.recovery_hint()
        );
        self.publish(LifecycleEventKind::Error {
            code: err.error_code().to_string(),
            message: err.to_string(),
        });
    }

    /// Apply a transition to the session, if it still exists and belongs to
    /// this driver. Status changes are logged and published.
    pub async fn update<R>(&self, transition: impl FnOnce(&mut Session) -> R) -> Option<R> {
        let (result, from, to) = {
            let mut sessions = self.shared.sessions.write().await;
            let session = sessions
                .get_mut(&self.session_id)
                .filter(|s| s.generation == self.generation)?;
            let from = session.status;
            let result = transition(session);
            (result, from, session.status)
        };

        if from != to {
            info!(
                session_id = %self.session_id,
                unique_id = %self.unique_id,
                "Status {} -> {}",
                from,
                to
            );
            self.publish(LifecycleEventKind::StatusChanged { from, to });
        }
        Some(result)
    }

    pub async fn snapshot(&self) -> Option<Session> {
        self.shared
            .sessions
            .read()
            .await
            .get(&self.session_id)
            .filter(|s| s.generation == self.generation)
            .cloned()
    }

    pub async fn fail(&self, status: SessionStatus) {
        self.update(|s| s.fail(status)).await;
    }

    /// Give up the registry entry and close the connection. The session
    /// record stays pollable.
    pub async fn teardown(&self, connection: &Arc<dyn HandshakeConnection>) {
        // Dropping our own entry detaches the driver handle instead of
        // aborting the task we are running in.
        drop(
            self.shared
                .registry
                .release(&self.unique_id, self.generation)
                .await,
        );
        connection.shutdown();
    }

    /// Final cleanup after a successful link.
    pub async fn cleanup(&self, connection: &Arc<dyn HandshakeConnection>) {
        self.teardown(connection).await;
        self.shared
            .remove_session(&self.session_id, self.generation, RemovalReason::Linked)
            .await;
    }
}
