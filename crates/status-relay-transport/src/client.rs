//! Reconnecting status client.

use std::time::Duration;

use futures::StreamExt;
use tokio::sync::mpsc;
use tokio_tungstenite::{connect_async, tungstenite::Message};

use crate::receiver::StatusReceiver;

/// Delay between reconnect attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(2);

/// What the display layer is told.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientEvent {
    /// The connection is up.
    Connected,
    /// A status update arrived.
    Status(String),
    /// The connection was lost; a retry follows after the delay.
    Reconnecting,
}

/// WebSocket client that follows one session's status updates.
///
/// Reconnects after a fixed delay, indefinitely, until the event receiver
/// is dropped.
#[derive(Debug, Clone)]
pub struct StatusClient {
    url: String,
    retry_delay: Duration,
}

impl StatusClient {
    /// Create a client for a full endpoint URL, e.g. `ws://host/ws/{session}`.
    #[must_use]
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Override the reconnect delay.
    #[must_use]
    pub const fn with_retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    /// Endpoint URL.
    #[must_use]
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Run until `events` is closed.
    pub async fn run(self, events: mpsc::UnboundedSender<ClientEvent>) {
        let mut receiver = StatusReceiver::new();
        loop {
            match connect_async(self.url.as_str()).await {
                Ok((stream, _)) => {
                    tracing::info!(url = %self.url, "Status client connected");
                    if events.send(ClientEvent::Connected).is_err() {
                        return;
                    }
                    if !Self::pump(stream, &mut receiver, &events).await {
                        return;
                    }
                }
                Err(e) => {
                    tracing::warn!(url = %self.url, "Status client connect failed: {e}");
                }
            }

            receiver.reset();
            if events.send(ClientEvent::Reconnecting).is_err() {
                return;
            }
            tokio::time::sleep(self.retry_delay).await;
        }
    }

    /// Forward updates until the connection ends. Returns false once the
    /// event receiver is gone.
    async fn pump<S>(
        mut stream: S,
        receiver: &mut StatusReceiver,
        events: &mpsc::UnboundedSender<ClientEvent>,
    ) -> bool
    where
        S: futures::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>> + Unpin,
    {
        while let Some(msg) = stream.next().await {
            let updates = match msg {
                Ok(Message::Text(text)) => receiver.push_frame(text.as_str().as_bytes()),
                Ok(Message::Binary(data)) => receiver.push_frame(&data),
                Ok(Message::Close(_)) => break,
                Ok(_) => continue,
                Err(e) => {
                    tracing::warn!("Status client connection lost: {e}");
                    break;
                }
            };
            for update in updates {
                if events.send(ClientEvent::Status(update.text)).is_err() {
                    return false;
                }
            }
        }
        true
    }
}
