//! Common test utilities and fixtures for integration tests.
//!
//! Builds a [`SessionManager`] on top of the mock connector, store and QR
//! renderer with millisecond timings, plus helpers for waiting on session
//! state and lifecycle events.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::sync::broadcast;

use matdev_linker::adapters::mock::{InMemoryStore, MockConnection, MockConnector, StubQrRenderer};
use matdev_linker::config::SessionTimings;
use matdev_linker::domain::{CredentialUpdate, SessionStatus};
use matdev_linker::lifecycle::{LifecycleEvent, LifecycleEventKind, SessionManager};

/// Upper bound for anything a test waits on.
pub const WAIT: Duration = Duration::from_secs(3);

/// Account id the mock device registers as.
pub const ACCOUNT_ID: &str = "15551234567:7@s.whatsapp.net";

/// Millisecond-scale timings so lifecycle tests run quickly.
pub fn fast_timings() -> SessionTimings {
    SessionTimings::default()
        .with_pairing_settle(Duration::from_millis(20))
        .with_open_settle(Duration::from_millis(20))
        .with_reconnect_delay(Duration::from_millis(20))
        .with_cleanup_delay(Duration::from_millis(150))
        .with_session_ttl(Duration::from_secs(60))
        .with_reap_interval(Duration::from_secs(3600))
}

/// A manager wired to mocks the test can drive.
pub struct Harness {
    pub manager: Arc<SessionManager>,
    pub connector: MockConnector,
    pub store: InMemoryStore,
    pub renderer: StubQrRenderer,
}

impl Harness {
    pub fn new() -> Self {
        Self::build(InMemoryStore::new(), fast_timings())
    }

    pub fn with_timings(timings: SessionTimings) -> Self {
        Self::build(InMemoryStore::new(), timings)
    }

    pub fn with_store(store: InMemoryStore) -> Self {
        Self::build(store, fast_timings())
    }

    pub fn build(store: InMemoryStore, timings: SessionTimings) -> Self {
        let connector = MockConnector::new();
        let renderer = StubQrRenderer::new();
        let manager = Arc::new(SessionManager::new(
            Arc::new(store.clone()),
            Arc::new(connector.clone()),
            Arc::new(renderer.clone()),
            timings,
        ));
        Self {
            manager,
            connector,
            store,
            renderer,
        }
    }

    /// The `count`-th connection the manager opened.
    pub async fn connection(&self, count: usize) -> Arc<MockConnection> {
        self.connector
            .wait_for_connection(count, WAIT)
            .await
            .unwrap_or_else(|| panic!("connection #{} was never opened", count))
    }

    /// Wait until the session reaches `status`.
    pub async fn expect_status(&self, session_id: &str, status: SessionStatus) {
        assert!(
            wait_for_status(&self.manager, session_id, Some(status)).await,
            "session {} never reached {:?} (last: {:?})",
            session_id,
            status,
            self.manager.status(session_id).await
        );
    }

    /// Wait until the session record is gone.
    pub async fn expect_removed(&self, session_id: &str) {
        assert!(
            wait_for_status(&self.manager, session_id, None).await,
            "session {} was never removed (status: {:?})",
            session_id,
            self.manager.status(session_id).await
        );
    }
}

/// Poll until the session's status equals `expected` (`None` meaning the
/// session is gone). Returns false on timeout.
pub async fn wait_for_status(
    manager: &SessionManager,
    session_id: &str,
    expected: Option<SessionStatus>,
) -> bool {
    let poll = async {
        loop {
            if manager.status(session_id).await == expected {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, poll).await.is_ok()
}

/// Poll until `check` holds. Returns false on timeout.
pub async fn eventually<F>(mut check: F) -> bool
where
    F: FnMut() -> bool,
{
    let poll = async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(WAIT, poll).await.is_ok()
}

/// Receive events until one matches `predicate`, returning everything seen
/// up to and including it.
pub async fn collect_until<F>(
    rx: &mut broadcast::Receiver<LifecycleEvent>,
    mut predicate: F,
) -> Vec<LifecycleEvent>
where
    F: FnMut(&LifecycleEventKind) -> bool,
{
    let mut seen = Vec::new();
    let collect = async {
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = predicate(&event.event);
                    seen.push(event);
                    if done {
                        return;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return,
            }
        }
    };
    let _ = tokio::time::timeout(WAIT, collect).await;
    seen
}

/// The credential update a device produces when pairing succeeds.
pub fn registration_update() -> CredentialUpdate {
    CredentialUpdate::creds(json!({
        "registered": true,
        "me": { "id": ACCOUNT_ID, "name": "Test Device" }
    }))
    .with_key("pre-key-1", Some(json!({ "public": "AAEC" })))
}

/// Assert that nothing matching `predicate` shows up within `window`.
pub async fn assert_no_event<F>(
    rx: &mut broadcast::Receiver<LifecycleEvent>,
    window: Duration,
    mut predicate: F,
) where
    F: FnMut(&LifecycleEventKind) -> bool,
{
    let watch = async {
        loop {
            match rx.recv().await {
                Ok(event) if predicate(&event.event) => return Some(event),
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    };
    if let Ok(Some(event)) = tokio::time::timeout(window, watch).await {
        panic!("unexpected event: {:?}", event);
    }
}
