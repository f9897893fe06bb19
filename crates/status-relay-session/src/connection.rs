//! Outgoing side of one live client connection.

use std::time::{Duration, Instant};

use status_relay_core::{DeliveryError, SessionId};
use tokio::sync::mpsc;
use uuid::Uuid;

/// A live client connection, as seen by the registry.
///
/// Holds the sending half of the channel drained by the connection's
/// socket writer. Once the writer goes away the connection is closed.
#[derive(Debug)]
pub struct ClientConnection {
    /// Unique connection ID.
    pub id: Uuid,
    /// Session this connection serves.
    pub session_id: SessionId,
    tx: mpsc::UnboundedSender<String>,
    connected_at: Instant,
}

impl ClientConnection {
    /// Create a connection and the receiver its writer task drains.
    #[must_use]
    pub fn channel(session_id: impl Into<SessionId>) -> (Self, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Self {
            id: Uuid::new_v4(),
            session_id: session_id.into(),
            tx,
            connected_at: Instant::now(),
        };
        (connection, rx)
    }

    /// Queue a status text for the writer.
    ///
    /// # Errors
    /// Returns error if the writer has gone away.
    pub fn send(&self, text: &str) -> Result<(), DeliveryError> {
        self.tx
            .send(text.to_owned())
            .map_err(|_| DeliveryError::SendFailed {
                session_id: self.session_id.clone(),
                reason: format!("connection {} closed", self.id),
            })
    }

    /// Whether the writer is still draining.
    #[must_use]
    pub fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }

    /// Connection age.
    #[must_use]
    pub fn age(&self) -> Duration {
        self.connected_at.elapsed()
    }
}
