//! Optional structured-event submission to an external pub/sub service.
//!
//! The publisher only guarantees submission. Acknowledgement and retries
//! belong to the [`PublishClient`] implementation.

use std::{fmt, sync::Arc};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::{runtime::Handle, task::JoinHandle};

use crate::{SessionContext, SessionId};

/// Environment variable enabling the publisher.
pub const ENV_ENABLED: &str = "STATUS_RELAY_PUBSUB_ENABLED";
/// Environment variable naming the destination project.
pub const ENV_PROJECT: &str = "GOOGLE_CLOUD_PROJECT";
/// Environment variable naming the destination topic.
pub const ENV_TOPIC: &str = "STATUS_RELAY_PUBSUB_TOPIC";

/// Destination topic identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Topic {
    pub project_id: String,
    pub topic_id: String,
}

impl Topic {
    /// Create a topic identity.
    #[must_use]
    pub fn new(project_id: impl Into<String>, topic_id: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            topic_id: topic_id.into(),
        }
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "projects/{}/topics/{}", self.project_id, self.topic_id)
    }
}

/// Publisher configuration, read once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum PublisherConfig {
    /// Publishing is off; `publish` logs and returns.
    #[default]
    Disabled,
    /// Publish to the given topic.
    Enabled(Topic),
}

impl PublisherConfig {
    /// Read the configuration from the process environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    ///
    /// Enabled without a project or topic falls back to `Disabled`.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let enabled = lookup(ENV_ENABLED).is_some_and(|v| {
            matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on")
        });
        if !enabled {
            return Self::Disabled;
        }

        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        match (non_empty(ENV_PROJECT), non_empty(ENV_TOPIC)) {
            (Some(project_id), Some(topic_id)) => Self::Enabled(Topic::new(project_id, topic_id)),
            (project, topic) => {
                tracing::warn!(
                    project = ?project,
                    topic = ?topic,
                    "Event publisher enabled but destination incomplete, disabling"
                );
                Self::Disabled
            }
        }
    }

    /// Destination topic when enabled.
    #[must_use]
    pub const fn topic(&self) -> Option<&Topic> {
        match self {
            Self::Disabled => None,
            Self::Enabled(topic) => Some(topic),
        }
    }
}

/// Structured event submitted to the publish boundary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Session bound when the event was published.
    pub session_id: Option<SessionId>,
    /// Application-defined event type.
    pub event_type: String,
    /// UTC timestamp, RFC 3339.
    pub timestamp: String,
    /// Event payload.
    pub data: Value,
}

impl EventEnvelope {
    /// Build an envelope stamped with the current time.
    #[must_use]
    pub fn new(session_id: Option<SessionId>, event_type: impl Into<String>, data: Value) -> Self {
        Self {
            session_id,
            event_type: event_type.into(),
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true),
            data,
        }
    }

    /// JSON-UTF8 encoding submitted to the publish client.
    ///
    /// # Errors
    /// Returns error if the payload cannot be serialized.
    pub fn to_json_bytes(&self) -> Result<Vec<u8>, PublishError> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Publish error.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("Failed to encode event: {0}")]
    Encode(#[from] serde_json::Error),
    #[error("Publish service unavailable")]
    ServiceUnavailable,
    #[error("Publish rejected: {0}")]
    Rejected(String),
}

/// Trait for external publish clients.
///
/// Implement this to bridge to your pub/sub service.
#[async_trait]
pub trait PublishClient: Send + Sync {
    /// Submit an encoded event, returning the service's message id.
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<String, PublishError>;
}

/// Development client that writes every event to the log.
#[derive(Debug, Default, Clone)]
pub struct LogPublishClient;

#[async_trait]
impl PublishClient for LogPublishClient {
    async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<String, PublishError> {
        let message_id = uuid::Uuid::new_v4().to_string();
        tracing::info!(
            %topic,
            %message_id,
            payload = %String::from_utf8_lossy(&payload),
            "Event published"
        );
        Ok(message_id)
    }
}

struct Enabled {
    topic: Topic,
    client: Arc<dyn PublishClient>,
    handle: Handle,
}

/// Event publisher.
///
/// `publish` is callable from any thread: the submission is scheduled onto
/// the runtime captured at construction.
#[derive(Clone, Default)]
pub struct EventPublisher {
    enabled: Option<Arc<Enabled>>,
}

impl EventPublisher {
    /// A publisher that never submits.
    #[must_use]
    pub fn disabled() -> Self {
        Self::default()
    }

    /// Create a publisher submitting through `client` on `handle`.
    #[must_use]
    pub fn new(config: PublisherConfig, client: Arc<dyn PublishClient>, handle: Handle) -> Self {
        match config {
            PublisherConfig::Disabled => {
                tracing::info!("Event publisher disabled");
                Self::disabled()
            }
            PublisherConfig::Enabled(topic) => {
                tracing::info!(%topic, "Event publisher enabled");
                Self {
                    enabled: Some(Arc::new(Enabled {
                        topic,
                        client,
                        handle,
                    })),
                }
            }
        }
    }

    /// Create a publisher bound to the runtime of the calling task.
    ///
    /// Outside a tokio runtime the publisher is disabled.
    #[must_use]
    pub fn from_current(config: PublisherConfig, client: Arc<dyn PublishClient>) -> Self {
        match Handle::try_current() {
            Ok(handle) => Self::new(config, client, handle),
            Err(e) => {
                tracing::warn!("No tokio runtime for event publisher, disabling: {e}");
                Self::disabled()
            }
        }
    }

    /// Whether events are submitted.
    #[must_use]
    pub fn is_enabled(&self) -> bool {
        self.enabled.is_some()
    }

    /// Submit an event tagged with the current session.
    ///
    /// Never blocks. Returns the submission task, or `None` when disabled
    /// or the event could not be encoded.
    pub fn publish(&self, data: Value, event_type: &str) -> Option<JoinHandle<()>> {
        let envelope = EventEnvelope::new(SessionContext::current(), event_type, data);

        let Some(enabled) = self.enabled.as_ref() else {
            tracing::debug!(
                session_id = ?envelope.session_id,
                event_type,
                "Event publisher disabled, event skipped"
            );
            return None;
        };

        let payload = match envelope.to_json_bytes() {
            Ok(payload) => payload,
            Err(e) => {
                tracing::error!(session_id = ?envelope.session_id, event_type, "{e}");
                return None;
            }
        };

        let enabled = Arc::clone(enabled);
        let handle = enabled.handle.clone();
        let session_id = envelope.session_id;
        let event_type = envelope.event_type;
        Some(handle.spawn(async move {
            match enabled.client.publish(&enabled.topic, payload).await {
                Ok(message_id) => {
                    tracing::debug!(?session_id, %event_type, %message_id, "Event submitted");
                }
                Err(e) => {
                    tracing::error!(?session_id, %event_type, "Event submission failed: {e}");
                }
            }
        }))
    }
}

impl fmt::Debug for EventPublisher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventPublisher")
            .field("topic", &self.enabled.as_ref().map(|e| &e.topic))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use serde_json::json;
    use tokio::sync::mpsc;

    use super::*;

    struct ChannelClient(mpsc::UnboundedSender<(Topic, Vec<u8>)>);

    #[async_trait]
    impl PublishClient for ChannelClient {
        async fn publish(&self, topic: &Topic, payload: Vec<u8>) -> Result<String, PublishError> {
            let _ = self.0.send((topic.clone(), payload));
            Ok("msg-1".into())
        }
    }

    struct FailingClient;

    #[async_trait]
    impl PublishClient for FailingClient {
        async fn publish(&self, _topic: &Topic, _payload: Vec<u8>) -> Result<String, PublishError> {
            Err(PublishError::ServiceUnavailable)
        }
    }

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_owned(), (*v).to_owned()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn test_config_defaults_to_disabled() {
        assert_eq!(PublisherConfig::from_lookup(lookup(&[])), PublisherConfig::Disabled);
        assert_eq!(PublisherConfig::default(), PublisherConfig::Disabled);
    }

    #[test]
    fn test_config_enabled() {
        let config = PublisherConfig::from_lookup(lookup(&[
            (ENV_ENABLED, "True"),
            (ENV_PROJECT, "proj"),
            (ENV_TOPIC, "status"),
        ]));
        assert_eq!(config, PublisherConfig::Enabled(Topic::new("proj", "status")));
        assert_eq!(config.topic().unwrap().to_string(), "projects/proj/topics/status");
    }

    #[test]
    fn test_config_enabled_without_topic_is_disabled() {
        let config = PublisherConfig::from_lookup(lookup(&[(ENV_ENABLED, "1"), (ENV_PROJECT, "proj")]));
        assert_eq!(config, PublisherConfig::Disabled);
    }

    #[test]
    fn test_envelope_fields() {
        let envelope = EventEnvelope::new(Some("s1".into()), "tool_call", json!({"k": 1}));
        let value: Value = serde_json::from_slice(&envelope.to_json_bytes().unwrap()).unwrap();

        assert_eq!(value["session_id"], "s1");
        assert_eq!(value["event_type"], "tool_call");
        assert_eq!(value["data"], json!({"k": 1}));
        let timestamp = value["timestamp"].as_str().unwrap();
        assert!(timestamp.ends_with('Z'));
        assert!(chrono::DateTime::parse_from_rfc3339(timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_disabled_publish_is_noop() {
        let publisher = EventPublisher::from_current(PublisherConfig::Disabled, Arc::new(LogPublishClient));
        assert!(!publisher.is_enabled());
        assert!(publisher.publish(json!({}), "ignored").is_none());
    }

    #[tokio::test]
    async fn test_publish_carries_session() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let publisher = EventPublisher::from_current(
            PublisherConfig::Enabled(Topic::new("proj", "status")),
            Arc::new(ChannelClient(tx)),
        );

        let handle = SessionContext::scope("s1", async {
            publisher.publish(json!({"step": 2}), "progress")
        })
        .await
        .unwrap();
        handle.await.unwrap();

        let (topic, payload) = rx.recv().await.unwrap();
        let envelope: EventEnvelope = serde_json::from_slice(&payload).unwrap();
        assert_eq!(topic, Topic::new("proj", "status"));
        assert_eq!(envelope.session_id.as_deref(), Some("s1"));
        assert_eq!(envelope.event_type, "progress");
        assert_eq!(envelope.data, json!({"step": 2}));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_publish_from_foreign_thread() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let publisher = EventPublisher::from_current(
            PublisherConfig::Enabled(Topic::new("proj", "status")),
            Arc::new(ChannelClient(tx)),
        );

        let worker = publisher.clone();
        std::thread::spawn(move || {
            let _guard = SessionContext::bind("worker");
            worker.publish(json!(null), "sync_step")
        })
        .join()
        .unwrap()
        .unwrap()
        .await
        .unwrap();

        let (_, payload) = rx.recv().await.unwrap();
        let envelope: EventEnvelope = serde_json::from_slice(&payload).unwrap();
        assert_eq!(envelope.session_id.as_deref(), Some("worker"));
    }

    #[tokio::test]
    async fn test_submission_failure_is_contained() {
        let publisher = EventPublisher::from_current(
            PublisherConfig::Enabled(Topic::new("proj", "status")),
            Arc::new(FailingClient),
        );
        publisher.publish(json!({}), "doomed").unwrap().await.unwrap();
    }
}
