//! Identifier-keyed registry of running handshakes.
//!
//! Each entry pairs the driver task for an identifier with the connection
//! it currently holds. Entries carry a generation so a stale driver can
//! never detach or replace the entry of its successor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;

use crate::traits::HandshakeConnection;

/// A running handshake for one identifier.
pub(crate) struct ActiveHandshake {
    pub generation: u64,
    pub session_id: String,
    pub driver: JoinHandle<()>,
    pub connection: Option<Arc<dyn HandshakeConnection>>,
}

impl ActiveHandshake {
    /// Abort the driver (with its timers and sub-tasks) and close the
    /// connection.
    pub fn stop(self) {
        self.driver.abort();
        if let Some(connection) = self.connection {
            connection.shutdown();
        }
    }
}

#[derive(Default)]
pub(crate) struct ConnectionRegistry {
    entries: Mutex<HashMap<String, ActiveHandshake>>,
    next_generation: AtomicU64,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_generation(&self) -> u64 {
        self.next_generation.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Spawn a driver for `unique_id` and make it the identifier's entry.
    ///
    /// The spawn and the insert happen under the registry lock, so two
    /// concurrent installs for one identifier are serialized and the driver
    /// cannot observe the registry before its own entry exists. Returns the
    /// entry that was replaced; the caller stops it.
    pub async fn install(
        &self,
        unique_id: &str,
        generation: u64,
        session_id: &str,
        spawn: impl FnOnce() -> JoinHandle<()>,
    ) -> Option<ActiveHandshake> {
        let mut entries = self.entries.lock().await;
        let previous = entries.remove(unique_id);
        let driver = spawn();
        entries.insert(
            unique_id.to_string(),
            ActiveHandshake {
                generation,
                session_id: session_id.to_string(),
                driver,
                connection: None,
            },
        );
        previous
    }

    /// Record the connection a driver just opened. Returns false when the
    /// driver has been superseded.
    pub async fn attach(
        &self,
        unique_id: &str,
        generation: u64,
        connection: Arc<dyn HandshakeConnection>,
    ) -> bool {
        let mut entries = self.entries.lock().await;
        match entries.get_mut(unique_id) {
            Some(entry) if entry.generation == generation => {
                entry.connection = Some(connection);
                true
            }
            _ => false,
        }
    }

    /// Forget the connection of a closed handshake while the driver keeps
    /// running (waiting to reconnect).
    pub async fn detach(&self, unique_id: &str, generation: u64) {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(unique_id) {
            if entry.generation == generation {
                entry.connection = None;
            }
        }
    }

    /// Remove the entry if it still belongs to `generation`.
    ///
    /// A driver releasing its own entry must drop the returned value rather
    /// than stop it.
    pub async fn release(&self, unique_id: &str, generation: u64) -> Option<ActiveHandshake> {
        let mut entries = self.entries.lock().await;
        match entries.get(unique_id) {
            Some(entry) if entry.generation == generation => entries.remove(unique_id),
            _ => None,
        }
    }

    pub async fn is_current(&self, unique_id: &str, generation: u64) -> bool {
        self.entries
            .lock()
            .await
            .get(unique_id)
            .is_some_and(|entry| entry.generation == generation)
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn drain(&self) -> Vec<ActiveHandshake> {
        self.entries.lock().await.drain().map(|(_, entry)| entry).collect()
    }
}
