//! Core traits for resolving and delivering to live connections.

use async_trait::async_trait;
use thiserror::Error;

/// Session identifier.
///
/// Opaque string chosen by the connection layer; no format is enforced.
pub type SessionId = String;

/// Delivery error.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DeliveryError {
    #[error("Status message carries no session")]
    NoSession,
    #[error("No live connection for session: {0}")]
    Unresolved(SessionId),
    #[error("Send to session {session_id} failed: {reason}")]
    SendFailed { session_id: SessionId, reason: String },
}

/// Trait for the registry of live connections.
///
/// The relay loop resolves each message's session to a connection and
/// sends the text through it. Implementations own the wire format.
#[async_trait]
pub trait ConnectionRegistry: Send + Sync {
    /// Handle to a live connection.
    type Connection: Send + Sync;

    /// Look up the live connection registered for a session.
    async fn resolve(&self, session_id: &str) -> Option<Self::Connection>;

    /// Send one status text over a resolved connection.
    async fn send(&self, connection: &Self::Connection, text: &str) -> Result<(), DeliveryError>;
}
