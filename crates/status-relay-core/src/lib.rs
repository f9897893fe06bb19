//! Core building blocks for relaying session-scoped status text.
//!
//! This crate provides:
//! - `SessionContext` - Ambient session binding for the current unit of work
//! - `StatusMessenger` - Buffering channel plus the producer API (`emit`)
//! - `relay` - The consumer loop that hands each message to a registry
//! - `EventPublisher` - Optional structured-event submission boundary
//! - `ConnectionRegistry` trait

pub mod channel;
pub mod context;
pub mod events;
pub mod relay;
pub mod traits;

pub use channel::{QueuedStatus, RelayStream, StatusMessage, StatusMessenger, StatusSender};
pub use context::{SessionContext, SessionGuard, spawn_blocking_in_session, spawn_in_session};
pub use events::{
    EventEnvelope, EventPublisher, LogPublishClient, PublishClient, PublishError, PublisherConfig, Topic,
};
pub use relay::{deliver, relay, spawn_relay};
pub use traits::{ConnectionRegistry, DeliveryError, SessionId};
