//! Error handling for the linking service.
//!
//! - **Error Categories**: high-level classification for handling decisions
//! - **Domain-specific Errors**: credential store and handshake errors
//! - **Unified Error Type**: `LinkerError` consolidates them
//! - **Result Type Alias**: `LinkerResult<T>`
//!
//! | Error | Category | Surfaced through |
//! |-------|----------|------------------|
//! | `AlreadyLinked` | User | HTTP 400 |
//! | `InvalidInput` | User | HTTP 400 |
//! | `InvalidPhone` | User | status `error_invalid_phone` |
//! | `RateLimited` | RateLimit | status `rate_limited` |
//! | `Handshake` | Network | reconnect |
//! | `LoggedOut` | Auth | status `auth_failed` |
//! | `Store` | System | status `storage_failed` |

mod category;
mod handshake;
mod linker_error;
mod store;

pub use category::ErrorCategory;
pub use handshake::HandshakeError;
pub use linker_error::LinkerError;
pub use store::StoreError;

/// Type alias for Results using `LinkerError`.
pub type LinkerResult<T> = Result<T, LinkerError>;
