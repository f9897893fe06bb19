//! Wire protocol for client-server communication.

use serde::{Deserialize, Serialize};

/// Message from client to server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Free-form request for the application handler.
    Prompt { text: String },
    /// Ping for keepalive.
    Ping,
}

/// Message from server to client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Session status text.
    Status { data: String },
    /// Reply text from the application handling the client's prompt.
    AgentMessage { message: String },
    /// The handler finished its reply to the last prompt.
    #[serde(rename = "agent_turn_complete")]
    TurnComplete,
    /// The handler gave up on the last prompt.
    #[serde(rename = "agent_interrupted")]
    Interrupted,
    /// Error message.
    Error { message: String },
    /// Pong response.
    Pong,
}

impl ServerMessage {
    /// Create a status message.
    #[must_use]
    pub fn status(text: impl Into<String>) -> Self {
        Self::Status { data: text.into() }
    }

    /// Status text, if this is a status message.
    #[must_use]
    pub fn status_text(&self) -> Option<&str> {
        if let Self::Status { data } = self {
            Some(data)
        } else {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&ServerMessage::status("hello")).unwrap();
        assert_eq!(json, r#"{"type":"status","data":"hello"}"#);
    }

    #[test]
    fn test_agent_reply_wire_format() {
        let json = serde_json::to_string(&ServerMessage::AgentMessage {
            message: "done".into(),
        })
        .unwrap();
        assert_eq!(json, r#"{"type":"agent_message","message":"done"}"#);

        let json = serde_json::to_string(&ServerMessage::TurnComplete).unwrap();
        assert_eq!(json, r#"{"type":"agent_turn_complete"}"#);

        let json = serde_json::to_string(&ServerMessage::Interrupted).unwrap();
        assert_eq!(json, r#"{"type":"agent_interrupted"}"#);
    }

    #[test]
    fn test_status_text() {
        assert_eq!(ServerMessage::status("x").status_text(), Some("x"));
        assert_eq!(ServerMessage::Pong.status_text(), None);
    }

    #[test]
    fn test_client_message_parsing() {
        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"prompt","text":"go"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Prompt { text: "go".into() });

        let parsed: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(parsed, ClientMessage::Ping);
    }
}
