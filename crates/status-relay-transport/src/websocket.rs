//! WebSocket endpoint delivering session status updates.
//!
//! Each connection names its session in the path (`/ws/{session_id}`). The
//! connection is registered with the [`SessionRegistry`] for the relay loop
//! to find, and every incoming client message is handled inside
//! [`SessionContext::scope`] so that application code can call
//! `emit` without passing the session along.

use std::sync::Arc;

use async_trait::async_trait;
use axum::{
    Router,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{Message, WebSocket},
    },
    response::IntoResponse,
    routing::get,
};
use futures::{SinkExt, StreamExt, stream::SplitStream};
use status_relay_core::{SessionContext, SessionId};
use status_relay_session::{ClientConnection, SessionRegistry};
use tokio::sync::mpsc;
use tower_http::trace::TraceLayer;

use crate::protocol::{ClientMessage, ServerMessage};

/// Sends replies to the connection a prompt came from.
///
/// Cheap to clone; a clone may outlive the handler call, e.g. inside a
/// spawned task. Replies to a closed connection are dropped.
#[derive(Debug, Clone)]
pub struct Replier {
    tx: mpsc::UnboundedSender<ServerMessage>,
}

impl Replier {
    /// Wrap the sending half of a connection's reply channel.
    #[must_use]
    pub const fn new(tx: mpsc::UnboundedSender<ServerMessage>) -> Self {
        Self { tx }
    }

    /// Send any server message.
    pub fn send(&self, msg: ServerMessage) {
        if self.tx.send(msg).is_err() {
            tracing::debug!(session_id = ?SessionContext::current(), "Reply dropped, connection closed");
        }
    }

    /// Send a reply text.
    pub fn message(&self, text: impl Into<String>) {
        self.send(ServerMessage::AgentMessage {
            message: text.into(),
        });
    }

    /// Signal that the reply to the last prompt is complete.
    pub fn turn_complete(&self) {
        self.send(ServerMessage::TurnComplete);
    }

    /// Signal that the last prompt was abandoned.
    pub fn interrupted(&self) {
        self.send(ServerMessage::Interrupted);
    }
}

/// Application hook for incoming client requests.
///
/// Called inside the session scope of the connection. Long-running work
/// should be spawned (see `status_relay_core::spawn_in_session`) so the
/// connection keeps reading.
#[async_trait]
pub trait ClientHandler: Send + Sync {
    /// Handle a prompt sent by the client. Answers go through `replier`.
    async fn on_prompt(&self, text: String, replier: Replier);
}

/// Handler that ignores every prompt.
#[derive(Debug, Default, Clone)]
pub struct NoopHandler;

#[async_trait]
impl ClientHandler for NoopHandler {
    async fn on_prompt(&self, _text: String, _replier: Replier) {}
}

/// WebSocket handler state.
#[derive(Clone)]
pub struct WsState {
    /// Live connection registry shared with the relay loop.
    pub registry: Arc<SessionRegistry>,
    /// Application request handler.
    pub handler: Arc<dyn ClientHandler>,
}

impl WsState {
    /// Create new WebSocket state.
    #[must_use]
    pub fn new(registry: Arc<SessionRegistry>, handler: Arc<dyn ClientHandler>) -> Self {
        Self { registry, handler }
    }
}

/// WebSocket upgrade handler.
///
/// Use this as an Axum route handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(session_id): Path<SessionId>,
    State(state): State<WsState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, session_id, state))
}

async fn handle_socket(socket: WebSocket, session_id: SessionId, state: WsState) {
    let (mut sender, mut receiver) = socket.split();

    let (connection, mut status_rx) = ClientConnection::channel(session_id.clone());
    let connection = Arc::new(connection);
    if let Err(e) = state.registry.register(Arc::clone(&connection)).await {
        tracing::warn!(%session_id, "Rejecting connection: {e}");
        if let Ok(json) = serde_json::to_string(&ServerMessage::Error { message: e.to_string() }) {
            let _ = sender.send(Message::Text(json.into())).await;
        }
        let _ = sender.send(Message::Close(None)).await;
        return;
    }

    // Replies produced by this connection (pong, errors)
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<ServerMessage>();
    let replier = Replier::new(reply_tx);

    // Spawn task to forward status texts and replies to the WebSocket
    let writer_session = session_id.clone();
    let send_task = tokio::spawn(async move {
        loop {
            let msg = tokio::select! {
                Some(text) = status_rx.recv() => ServerMessage::status(text),
                Some(reply) = reply_rx.recv() => reply,
                else => break,
            };
            let json = match serde_json::to_string(&msg) {
                Ok(j) => j,
                Err(e) => {
                    tracing::error!("Failed to serialize message: {e}");
                    continue;
                }
            };
            if sender.send(Message::Text(json.into())).await.is_err() {
                tracing::debug!(session_id = %writer_session, "WebSocket writer closed");
                break;
            }
        }
    });

    SessionContext::scope(
        session_id.clone(),
        read_loop(&mut receiver, &replier, state.handler.as_ref()),
    )
    .await;

    // Cleanup
    state.registry.unregister(&session_id, connection.id).await;
    send_task.abort();
    tracing::info!(%session_id, conn_id = %connection.id, "WebSocket disconnected");
}

async fn read_loop(
    receiver: &mut SplitStream<WebSocket>,
    replier: &Replier,
    handler: &dyn ClientHandler,
) {
    while let Some(msg) = receiver.next().await {
        let text = match msg {
            Ok(Message::Text(t)) => t.as_str().to_owned(),
            Ok(Message::Binary(data)) => match String::from_utf8(data.to_vec()) {
                Ok(s) => s,
                Err(_) => continue,
            },
            Ok(Message::Close(_)) => break,
            Ok(_) => continue,
            Err(e) => {
                tracing::error!(session_id = ?SessionContext::current(), "WebSocket error: {e}");
                break;
            }
        };

        let client_msg: ClientMessage = match serde_json::from_str(&text) {
            Ok(m) => m,
            Err(e) => {
                tracing::warn!(session_id = ?SessionContext::current(), "Invalid client message: {e}");
                replier.send(ServerMessage::Error {
                    message: format!("Invalid message: {e}"),
                });
                continue;
            }
        };

        match client_msg {
            ClientMessage::Ping => replier.send(ServerMessage::Pong),
            ClientMessage::Prompt { text } => handler.on_prompt(text, replier.clone()).await,
        }
    }
}

/// Create the status WebSocket router.
///
/// # Example
/// ```ignore
/// let app = Router::new()
///     .merge(create_status_router(WsState::new(registry, handler)));
/// ```
#[must_use]
pub fn create_status_router(state: WsState) -> Router {
    Router::new()
        .route("/ws/{session_id}", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
