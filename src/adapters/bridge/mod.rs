//! Handshake bridge client.
//!
//! The device-pairing protocol itself runs in a separate bridge process.
//! This module talks to it over one WebSocket per connection, exchanging
//! JSON frames tagged by `type`.

pub mod client;
pub mod messages;

pub use client::{BridgeConnection, BridgeConnector};
pub use messages::{BridgeCommand, BridgeMessage, VersionResponse};
