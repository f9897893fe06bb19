//! Live connection registry for status routing.
//!
//! Provides:
//! - `ClientConnection` - Outgoing status channel of one live connection
//! - `SessionRegistry` - Session identifier to connection map, used by the
//!   relay loop as its `ConnectionRegistry`

pub mod connection;
pub mod registry;

pub use connection::ClientConnection;
pub use registry::{RegistryError, SessionRegistry};
