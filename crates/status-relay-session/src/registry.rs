//! Session registry: one live connection per session identifier.

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;
use status_relay_core::{ConnectionRegistry, DeliveryError, SessionId};
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::ClientConnection;

/// Registry error.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Session already has a live connection: {0}")]
    SessionInUse(SessionId),
}

/// Maps session identifiers to live connections.
///
/// A session has at most one live connection. Registering a second one
/// under the same identifier is rejected instead of silently replacing the
/// first, so status routing is never ambiguous.
#[derive(Default)]
pub struct SessionRegistry {
    connections: RwLock<HashMap<SessionId, Arc<ClientConnection>>>,
}

impl SessionRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a connection under its session identifier.
    ///
    /// A closed connection left behind under the same identifier is replaced.
    ///
    /// # Errors
    /// Returns error if a live connection already serves the session.
    pub async fn register(&self, connection: Arc<ClientConnection>) -> Result<(), RegistryError> {
        let mut conns = self.connections.write().await;
        if let Some(existing) = conns.get(&connection.session_id) {
            if existing.is_open() {
                return Err(RegistryError::SessionInUse(connection.session_id.clone()));
            }
            tracing::debug!(
                session_id = %connection.session_id,
                stale = %existing.id,
                "Replacing closed connection"
            );
        }
        tracing::info!(session_id = %connection.session_id, conn_id = %connection.id, "Connection registered");
        conns.insert(connection.session_id.clone(), connection);
        Ok(())
    }

    /// Remove the session's entry if it still belongs to `connection_id`.
    ///
    /// Returns true if an entry was removed.
    pub async fn unregister(&self, session_id: &str, connection_id: Uuid) -> bool {
        let mut conns = self.connections.write().await;
        if conns.get(session_id).is_some_and(|c| c.id == connection_id) {
            conns.remove(session_id);
            tracing::info!(session_id, conn_id = %connection_id, "Connection unregistered");
            true
        } else {
            false
        }
    }

    /// Connection registered for a session, open or not.
    pub async fn get(&self, session_id: &str) -> Option<Arc<ClientConnection>> {
        self.connections.read().await.get(session_id).cloned()
    }

    /// Number of registered connections.
    pub async fn len(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Whether no connection is registered.
    pub async fn is_empty(&self) -> bool {
        self.connections.read().await.is_empty()
    }

    /// Identifiers of all registered sessions.
    pub async fn session_ids(&self) -> Vec<SessionId> {
        self.connections.read().await.keys().cloned().collect()
    }
}

#[async_trait]
impl ConnectionRegistry for SessionRegistry {
    type Connection = Arc<ClientConnection>;

    async fn resolve(&self, session_id: &str) -> Option<Arc<ClientConnection>> {
        self.get(session_id).await.filter(|c| c.is_open())
    }

    async fn send(&self, connection: &Arc<ClientConnection>, text: &str) -> Result<(), DeliveryError> {
        connection.send(text)
    }
}
