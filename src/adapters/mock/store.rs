//! In-memory credential store for testing.
//!
//! Keeps every slot in a map, counts persisted updates and can be told to
//! fail writes, so session behavior can be checked without a filesystem.

use async_trait::async_trait;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use crate::domain::{AuthState, CredentialUpdate, LinkedMarker};
use crate::error::StoreError;
use crate::traits::CredentialStore;

#[derive(Debug, Clone, Default)]
struct Slot {
    auth: AuthState,
    marker: Option<LinkedMarker>,
}

/// In-memory credential store for testing.
///
/// # Example
///
/// ```ignore
/// use matdev_linker::adapters::mock::InMemoryStore;
/// use matdev_linker::traits::CredentialStore;
///
/// let store = InMemoryStore::new();
/// store.mark_linked("matdev-aaaa1111");
/// assert!(store.is_linked("matdev-aaaa1111").await);
///
/// store.set_persist_should_fail(true);
/// assert!(store.persist("matdev-aaaa1111", &update).await.is_err());
/// ```
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    slots: Arc<Mutex<HashMap<String, Slot>>>,
    persist_count: Arc<Mutex<usize>>,
    erased: Arc<Mutex<Vec<String>>>,
    persist_should_fail: Arc<Mutex<bool>>,
    marker_should_fail: Arc<Mutex<bool>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a slot with existing authentication state.
    pub fn with_auth_state(unique_id: &str, auth: AuthState) -> Self {
        let store = Self::new();
        store.slots.lock().unwrap().insert(
            unique_id.to_string(),
            Slot { auth, marker: None },
        );
        store
    }

    /// Give the slot a linked marker.
    pub fn mark_linked(&self, unique_id: &str) {
        let mut slots = self.slots.lock().unwrap();
        let slot = slots.entry(unique_id.to_string()).or_default();
        slot.marker = Some(LinkedMarker::new(None, 0));
    }

    pub fn set_persist_should_fail(&self, should_fail: bool) {
        *self.persist_should_fail.lock().unwrap() = should_fail;
    }

    pub fn set_marker_should_fail(&self, should_fail: bool) {
        *self.marker_should_fail.lock().unwrap() = should_fail;
    }

    /// Number of successful `persist` calls.
    pub fn persist_count(&self) -> usize {
        *self.persist_count.lock().unwrap()
    }

    pub fn marker(&self, unique_id: &str) -> Option<LinkedMarker> {
        self.slots
            .lock()
            .unwrap()
            .get(unique_id)
            .and_then(|slot| slot.marker.clone())
    }

    pub fn auth_state(&self, unique_id: &str) -> Option<AuthState> {
        self.slots
            .lock()
            .unwrap()
            .get(unique_id)
            .map(|slot| slot.auth.clone())
    }

    pub fn has_slot(&self, unique_id: &str) -> bool {
        self.slots.lock().unwrap().contains_key(unique_id)
    }

    /// Identifiers erased so far, in order.
    pub fn erased(&self) -> Vec<String> {
        self.erased.lock().unwrap().clone()
    }
}

#[async_trait]
impl CredentialStore for InMemoryStore {
    async fn load(&self, unique_id: &str) -> Result<AuthState, StoreError> {
        let mut slots = self.slots.lock().unwrap();
        Ok(slots.entry(unique_id.to_string()).or_default().auth.clone())
    }

    async fn persist(&self, unique_id: &str, update: &CredentialUpdate) -> Result<(), StoreError> {
        if *self.persist_should_fail.lock().unwrap() {
            return Err(StoreError::Unavailable("Mock persist failure".to_string()));
        }

        self.slots
            .lock()
            .unwrap()
            .entry(unique_id.to_string())
            .or_default()
            .auth
            .apply(update);
        *self.persist_count.lock().unwrap() += 1;
        Ok(())
    }

    async fn is_linked(&self, unique_id: &str) -> bool {
        self.marker(unique_id).is_some()
    }

    async fn write_linked_marker(
        &self,
        unique_id: &str,
        marker: &LinkedMarker,
    ) -> Result<(), StoreError> {
        if *self.marker_should_fail.lock().unwrap() {
            return Err(StoreError::Unavailable("Mock marker failure".to_string()));
        }

        self.slots
            .lock()
            .unwrap()
            .entry(unique_id.to_string())
            .or_default()
            .marker = Some(marker.clone());
        Ok(())
    }

    async fn erase(&self, unique_id: &str) -> Result<(), StoreError> {
        self.slots.lock().unwrap().remove(unique_id);
        self.erased.lock().unwrap().push(unique_id.to_string());
        Ok(())
    }

    fn slot_path(&self, _unique_id: &str) -> Option<PathBuf> {
        None
    }
}
