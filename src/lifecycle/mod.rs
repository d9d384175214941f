//! Session lifecycle manager.
//!
//! [`SessionManager`] owns the session records and the identifier-keyed
//! registry of running handshakes. Creating a session stores a record in
//! `initializing`, spawns a driver task for it and returns immediately; the
//! driver moves the record through its statuses while callers poll.
//!
//! ```text
//! create ──► initializing ──► qr / pairing_code ──► finalizing ──► connected
//!                 │                   │                                │
//!                 └──► launch_failed  └──► rate_limited, auth_failed,  └──► removed after
//!                                          error_invalid_phone,             cleanup delay
//!                                          storage_failed
//! ```

mod adapter;
mod context;
mod driver;
pub mod events;
mod reaper;
mod registry;

pub use adapter::confirmation_text;
pub use events::{
    create_event_channel, LifecycleEvent, LifecycleEventKind, LifecycleEventSender, RemovalReason,
};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use tokio::sync::{broadcast, RwLock};
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

use crate::config::SessionTimings;
use crate::domain::{
    generate_identifier, normalize_phone, validate_identifier, LinkMethod, Session, SessionStatus,
};
use crate::error::{LinkerError, LinkerResult};
use crate::traits::{CredentialStore, HandshakeConnector, QrRenderer};
use context::{SessionContext, Shared};
use registry::ConnectionRegistry;

/// Capacity of the lifecycle event channel.
const EVENT_CAPACITY: usize = 256;

/// Parameters of a new link attempt.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRequest {
    /// Identifier to link; generated when absent.
    pub unique_id: Option<String>,
    pub method: LinkMethod,
    /// Phone number as typed by the user.
    pub phone_number: Option<String>,
}

impl SessionRequest {
    pub fn qr() -> Self {
        Self::default()
    }

    pub fn pairing(phone_number: impl Into<String>) -> Self {
        Self {
            unique_id: None,
            method: LinkMethod::Pairing,
            phone_number: Some(phone_number.into()),
        }
    }

    pub fn with_unique_id(mut self, unique_id: impl Into<String>) -> Self {
        self.unique_id = Some(unique_id.into());
        self
    }
}

/// Identifiers of a created session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatedSession {
    pub session_id: String,
    pub unique_id: String,
}

pub struct SessionManager {
    shared: Arc<Shared>,
    reaper: Mutex<Option<JoinHandle<()>>>,
}

impl SessionManager {
    pub fn new(
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn HandshakeConnector>,
        renderer: Arc<dyn QrRenderer>,
        timings: SessionTimings,
    ) -> Self {
        let (events, _) = create_event_channel(EVENT_CAPACITY);
        Self::with_events(store, connector, renderer, timings, events)
    }

    /// Like [`SessionManager::new`], publishing lifecycle events on an
    /// existing channel.
    pub fn with_events(
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn HandshakeConnector>,
        renderer: Arc<dyn QrRenderer>,
        timings: SessionTimings,
        events: LifecycleEventSender,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                store,
                connector,
                renderer,
                timings,
                sessions: RwLock::new(HashMap::new()),
                registry: ConnectionRegistry::new(),
                events,
            }),
            reaper: Mutex::new(None),
        }
    }

    pub fn timings(&self) -> &SessionTimings {
        &self.shared.timings
    }

    /// Start a link attempt.
    ///
    /// Fails with [`LinkerError::AlreadyLinked`] when the identifier's slot
    /// carries a linked marker, and with [`LinkerError::InvalidInput`] for an
    /// identifier that cannot name a slot. Everything after that happens in
    /// the background and is reported through the session status.
    pub async fn create_session(&self, request: SessionRequest) -> LinkerResult<CreatedSession> {
        let unique_id = match request.unique_id.filter(|id| !id.is_empty()) {
            Some(id) => id,
            None => generate_identifier(),
        };

        if self.shared.store.is_linked(&unique_id).await {
            return Err(LinkerError::AlreadyLinked { unique_id });
        }
        validate_identifier(&unique_id).map_err(|e| LinkerError::InvalidInput(e.to_string()))?;

        let session_id = Uuid::new_v4().to_string();
        let phone_number = request.phone_number.as_deref().and_then(normalize_phone);
        let generation = self.shared.registry.next_generation();

        self.shared.sessions.write().await.insert(
            session_id.clone(),
            Session::new(
                session_id.clone(),
                unique_id.clone(),
                request.method,
                phone_number,
                generation,
            ),
        );

        info!(
            session_id = %session_id,
            unique_id = %unique_id,
            method = %request.method,
            "Session created"
        );

        let ctx = SessionContext {
            shared: self.shared.clone(),
            session_id: session_id.clone(),
            unique_id: unique_id.clone(),
            generation,
        };
        let previous = self
            .shared
            .registry
            .install(&unique_id, generation, &session_id, move || {
                tokio::spawn(driver::run(ctx))
            })
            .await;

        if let Some(previous) = previous {
            info!(
                unique_id = %unique_id,
                previous_session_id = %previous.session_id,
                "Replacing running handshake"
            );
            let (previous_session_id, previous_generation) =
                (previous.session_id.clone(), previous.generation);
            previous.stop();
            self.shared.publish(
                &session_id,
                &unique_id,
                LifecycleEventKind::ConnectionReplaced {
                    previous_session_id: previous_session_id.clone(),
                },
            );
            self.shared
                .remove_session(
                    &previous_session_id,
                    previous_generation,
                    RemovalReason::Superseded,
                )
                .await;
        }

        Ok(CreatedSession {
            session_id,
            unique_id,
        })
    }

    /// Current status, or `None` for an unknown session.
    pub async fn status(&self, session_id: &str) -> Option<SessionStatus> {
        self.with_session(session_id, |s| s.status).await
    }

    pub async fn qr(&self, session_id: &str) -> Option<String> {
        self.with_session(session_id, |s| s.qr.clone()).await.flatten()
    }

    pub async fn pairing_code(&self, session_id: &str) -> Option<String> {
        self.with_session(session_id, |s| s.pairing_code.clone())
            .await
            .flatten()
    }

    pub async fn unique_id(&self, session_id: &str) -> Option<String> {
        self.with_session(session_id, |s| s.unique_id.clone()).await
    }

    /// A copy of the whole session record.
    pub async fn snapshot(&self, session_id: &str) -> Option<Session> {
        self.with_session(session_id, Session::clone).await
    }

    pub async fn identifier_linked(&self, unique_id: &str) -> bool {
        self.shared.store.is_linked(unique_id).await
    }

    pub fn generate_identifier(&self) -> String {
        generate_identifier()
    }

    /// Location of a linked slot, for bots that load the credentials.
    pub async fn linked_slot(&self, unique_id: &str) -> Option<PathBuf> {
        let path = self.shared.store.slot_path(unique_id)?;
        if path.is_dir() && self.shared.store.is_linked(unique_id).await {
            Some(path)
        } else {
            None
        }
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.shared.events.subscribe()
    }

    pub fn event_sender(&self) -> LifecycleEventSender {
        self.shared.events.clone()
    }

    /// Start the periodic idle-session reaper. Calling it again restarts it.
    pub fn spawn_reaper(&self) {
        let handle = tokio::spawn(reaper::run(self.shared.clone()));
        if let Ok(mut reaper) = self.reaper.lock() {
            if let Some(old) = reaper.replace(handle) {
                old.abort();
            }
        }
    }

    /// Evict idle sessions now. Returns how many were removed.
    pub async fn evict_idle(&self) -> usize {
        reaper::evict_idle(&self.shared).await
    }

    /// Number of identifiers with a running handshake.
    pub async fn active_handshakes(&self) -> usize {
        self.shared.registry.len().await
    }

    pub async fn session_count(&self) -> usize {
        self.shared.sessions.read().await.len()
    }

    /// Stop the reaper and every running handshake.
    pub async fn shutdown(&self) {
        if let Ok(mut reaper) = self.reaper.lock() {
            if let Some(handle) = reaper.take() {
                handle.abort();
            }
        }

        let entries = self.shared.registry.drain().await;
        info!("Stopping {} running handshake(s)", entries.len());
        for entry in entries {
            entry.stop();
        }
    }

    async fn with_session<R>(&self, session_id: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        self.shared.sessions.read().await.get(session_id).map(f)
    }
}

impl Drop for SessionManager {
    fn drop(&mut self) {
        if let Ok(mut reaper) = self.reaper.lock() {
            if let Some(handle) = reaper.take() {
                handle.abort();
            }
        }
    }
}
