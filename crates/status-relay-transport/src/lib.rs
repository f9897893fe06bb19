//! Transport layer for session status updates.
//!
//! Provides:
//! - Wire protocol (JSON, `type`-tagged)
//! - `StatusReceiver` - Client-side frame re-assembly
//! - WebSocket endpoint (feature: websocket)
//! - Reconnecting status client (feature: client)

pub mod protocol;
pub mod receiver;

#[cfg(feature = "websocket")]
pub mod websocket;

#[cfg(feature = "client")]
pub mod client;

pub use protocol::{ClientMessage, ServerMessage};
pub use receiver::{StatusReceiver, StatusUpdate};
