//! Domain objects for the linking service.
//!
//! - [`Session`] - one link attempt and its state transitions
//! - [`AuthState`] / [`CredentialUpdate`] - authentication material
//! - [`LinkedMarker`] - the durable "this identifier is linked" record
//! - identifier generation and phone normalization

pub mod credentials;
pub mod identifier;
pub mod session;

pub use credentials::{AccountInfo, AuthState, CredentialUpdate, LinkedMarker};
pub use identifier::{generate_identifier, normalize_phone, validate_identifier, IDENTIFIER_PREFIX};
pub use session::{LinkMethod, PairingState, Session, SessionStatus};
