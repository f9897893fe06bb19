//! Relay loop: drains the status channel into live connections.

use std::sync::Arc;

use futures::StreamExt;
use tokio::task::JoinHandle;

use crate::{ConnectionRegistry, DeliveryError, QueuedStatus, RelayStream, StatusMessenger};

/// Attempt delivery of one dequeued message.
///
/// # Errors
/// Returns error if the message has no session, the session has no live
/// connection, or the registry fails to send.
pub async fn deliver<R>(registry: &R, item: &QueuedStatus) -> Result<(), DeliveryError>
where
    R: ConnectionRegistry + ?Sized,
{
    let session_id = item.session_id().ok_or(DeliveryError::NoSession)?;
    let connection = registry
        .resolve(session_id)
        .await
        .ok_or_else(|| DeliveryError::Unresolved(session_id.to_owned()))?;
    registry.send(&connection, item.text()).await
}

/// Drain `stream`, delivering every message through `registry`.
///
/// Failures are logged and the message discarded; the loop always moves on
/// to the next item. Returns only when the stream ends.
pub async fn relay<R>(mut stream: RelayStream, registry: &R)
where
    R: ConnectionRegistry + ?Sized,
{
    tracing::info!("Status relay started");

    while let Some(item) = stream.next().await {
        match deliver(registry, &item).await {
            Ok(()) => {
                tracing::debug!(session_id = ?item.session_id(), text = %item.text(), "Status delivered");
            }
            Err(e @ (DeliveryError::NoSession | DeliveryError::Unresolved(_))) => {
                tracing::warn!(session_id = ?item.session_id(), text = %item.text(), "Status dropped: {e}");
            }
            Err(e @ DeliveryError::SendFailed { .. }) => {
                tracing::error!(session_id = ?item.session_id(), text = %item.text(), "Status dropped: {e}");
            }
        }
        item.ack();
    }

    tracing::info!("Status relay stopped");
}

/// Spawn the relay loop for `messenger` on the current runtime.
///
/// Aborting the returned handle stops draining; queued messages stay in the
/// channel for the next consumer.
pub fn spawn_relay<R>(messenger: &StatusMessenger, registry: Arc<R>) -> JoinHandle<()>
where
    R: ConnectionRegistry + ?Sized + 'static,
{
    let stream = messenger.consume();
    tokio::spawn(async move { relay(stream, registry.as_ref()).await })
}
