//! Credential store trait abstraction.
//!
//! Provides a trait-based abstraction over durable per-identifier credential
//! slots, enabling dependency injection and in-memory doubles in tests.

use std::path::PathBuf;

use async_trait::async_trait;

use crate::domain::{AuthState, CredentialUpdate, LinkedMarker};
use crate::error::StoreError;

/// Trait for per-identifier credential slots.
///
/// Implementations must apply `persist` calls in the order they are made;
/// the session driver awaits each one before handling the next handshake
/// event, so an `Ok` return means the update is durable.
///
/// # Example
///
/// ```ignore
/// use matdev_linker::traits::CredentialStore;
///
/// async fn link<S: CredentialStore>(store: &S, id: &str) -> Result<(), StoreError> {
///     if store.is_linked(id).await {
///         return Ok(());
///     }
///     let auth = store.load(id).await?;
///     // ... hand `auth` to the handshake ...
///     Ok(())
/// }
/// ```
#[async_trait]
pub trait CredentialStore: Send + Sync {
    /// Load the slot's authentication state, creating a fresh one if the
    /// slot does not exist yet.
    async fn load(&self, unique_id: &str) -> Result<AuthState, StoreError>;

    /// Durably apply one credential update.
    async fn persist(&self, unique_id: &str, update: &CredentialUpdate) -> Result<(), StoreError>;

    /// Whether the slot carries a linked marker.
    async fn is_linked(&self, unique_id: &str) -> bool;

    /// Write the linked marker.
    async fn write_linked_marker(
        &self,
        unique_id: &str,
        marker: &LinkedMarker,
    ) -> Result<(), StoreError>;

    /// Remove everything stored for the identifier.
    async fn erase(&self, unique_id: &str) -> Result<(), StoreError>;

    /// Location of the slot, for external integrations.
    ///
    /// Returns `None` for stores that are not backed by a filesystem or when
    /// the identifier is invalid.
    fn slot_path(&self, unique_id: &str) -> Option<PathBuf>;
}
