//! Status relay demo server.
//!
//! Run with: cargo run -p status-relay-web-demo
//!
//! Then open http://localhost:8000 in your browser.

mod config;
mod work;

use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};
use std::time::Duration;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::Html,
    routing::{get, post},
};
use serde_json::{Value, json};
use status_relay_core::{
    EventPublisher, LogPublishClient, SessionContext, SessionId, StatusMessenger, spawn_relay,
};
use status_relay_session::SessionRegistry;
use status_relay_transport::websocket::{WsState, create_status_router};
use tower_http::cors::CorsLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::DemoConfig;
use crate::work::DemoAgent;

/// Application state shared across handlers.
#[derive(Clone)]
struct AppState {
    messenger: StatusMessenger,
    step_delay: Duration,
    busy: Arc<AtomicBool>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = DemoConfig::from_env()?;

    let messenger = StatusMessenger::new();
    messenger.initialize();
    let registry = Arc::new(SessionRegistry::new());
    let relay = spawn_relay(&messenger, Arc::clone(&registry));

    let publisher = EventPublisher::from_current(config.publisher.clone(), Arc::new(LogPublishClient));
    let app = build_router(&config, messenger, publisher, registry);

    // Start server
    let addr = config.addr();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("Server listening on http://{addr}");
    axum::serve(listener, app).await?;

    relay.abort();
    Ok(())
}

fn build_router(
    config: &DemoConfig,
    messenger: StatusMessenger,
    publisher: EventPublisher,
    registry: Arc<SessionRegistry>,
) -> Router {
    let agent = DemoAgent::new(messenger.clone(), publisher, config.step_delay);
    let state = AppState {
        messenger,
        step_delay: config.step_delay,
        busy: Arc::new(AtomicBool::new(false)),
    };

    Router::new()
        .route("/", get(index_handler))
        .route("/simulate/{session_id}", post(simulate_handler))
        .with_state(state)
        .merge(create_status_router(WsState::new(registry, Arc::new(agent))))
        .layer(CorsLayer::permissive())
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

/// Clears the busy flag when the job ends, even by panic.
struct BusyGuard(Arc<AtomicBool>);

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Start the simulated job for a session. One job at a time.
async fn simulate_handler(
    Path(session_id): Path<SessionId>,
    State(state): State<AppState>,
) -> (StatusCode, Json<Value>) {
    if state.busy.swap(true, Ordering::AcqRel) {
        return (
            StatusCode::CONFLICT,
            Json(json!({ "detail": "Work is already in progress." })),
        );
    }
    let busy = BusyGuard(state.busy);

    state
        .messenger
        .emit_to(session_id.as_str(), "Received request to start work.");

    let messenger = state.messenger;
    let step_delay = state.step_delay;
    tokio::task::spawn_blocking(move || {
        let _busy = busy;
        let _session = SessionContext::bind(session_id);
        work::simulated_work(&messenger, step_delay);
    });

    (
        StatusCode::ACCEPTED,
        Json(json!({ "message": "Simulated work started in background." })),
    )
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html>
<head>
    <title>Status Relay</title>
    <style>
        body { margin: 0; padding: 20px; background: #1e1e1e; color: #d4d4d4; font-family: monospace; }
        h1 { margin: 0 0 10px 0; font-size: 18px; }
        #state { margin-bottom: 10px; color: #888; }
        #state.connected { color: #6a9955; }
        #state.reconnecting { color: #ce9178; }
        #log { height: 60vh; overflow-y: auto; background: #252526; padding: 10px; }
        .entry { padding: 2px 0; }
        .entry.agent { color: #9cdcfe; }
        .entry.turn { color: #888; font-style: italic; }
        form { margin-top: 10px; display: flex; gap: 8px; }
        input { flex: 1; background: #3c3c3c; color: #d4d4d4; border: none; padding: 6px; }
        button { background: #0e639c; color: white; border: none; padding: 6px 12px; cursor: pointer; }
    </style>
</head>
<body>
    <h1>Status Relay</h1>
    <div id="state">connecting</div>
    <div id="log"></div>
    <form id="prompt">
        <input id="text" placeholder="Ask something..." autocomplete="off">
        <button type="submit">Send</button>
        <button type="button" id="simulate">Simulate work</button>
    </form>
    <script>
        const sessionId = crypto.randomUUID();
        const MAX_BUFFERED = 1024 * 1024;
        const stateEl = document.getElementById('state');
        const logEl = document.getElementById('log');
        let ws = null;
        let buffer = '';

        function setState(name) {
            stateEl.textContent = name + ' (session ' + sessionId + ')';
            stateEl.className = name;
        }

        function show(text, kind) {
            const div = document.createElement('div');
            div.className = kind ? 'entry ' + kind : 'entry';
            div.textContent = text;
            logEl.appendChild(div);
            logEl.scrollTop = logEl.scrollHeight;
        }

        function onFrame(data) {
            buffer += data;
            let msg;
            try {
                msg = JSON.parse(buffer);
            } catch (e) {
                // An object still arriving stays buffered, anything else resyncs
                if (!buffer.trimStart().startsWith('{') || buffer.length > MAX_BUFFERED) {
                    buffer = '';
                }
                return;
            }
            buffer = '';
            if (!msg) {
                return;
            }
            switch (msg.type) {
                case 'status': show(msg.data); break;
                case 'agent_message': show(msg.message, 'agent'); break;
                case 'agent_turn_complete': show('(turn complete)', 'turn'); break;
                case 'agent_interrupted': show('(interrupted)', 'turn'); break;
            }
        }

        function connect() {
            const protocol = location.protocol === 'https:' ? 'wss:' : 'ws:';
            ws = new WebSocket(protocol + '//' + location.host + '/ws/' + sessionId);
            ws.onopen = () => setState('connected');
            ws.onmessage = (event) => onFrame(event.data);
            ws.onclose = () => {
                ws = null;
                buffer = '';
                setState('reconnecting');
                setTimeout(connect, 2000);
            };
        }

        document.getElementById('prompt').addEventListener('submit', (event) => {
            event.preventDefault();
            const input = document.getElementById('text');
            if (ws && ws.readyState === WebSocket.OPEN && input.value) {
                ws.send(JSON.stringify({ type: 'prompt', text: input.value }));
                input.value = '';
            }
        });

        document.getElementById('simulate').addEventListener('click', async () => {
            const res = await fetch('/simulate/' + sessionId, { method: 'POST' });
            const body = await res.json();
            show(body.message || body.detail);
        });

        setState('connecting');
        connect();
    </script>
</body>
</html>
"#;
