//! MATDEV Linker - links messaging accounts to user-chosen identifiers
//!
//! This library exposes modules for use in integration tests.

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod lifecycle;
pub mod server;
pub mod traits;
