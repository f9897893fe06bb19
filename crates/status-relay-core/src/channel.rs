//! Buffering channel between status producers and the relay loop.
//!
//! Producers may call [`StatusSender::emit`] from any thread: the unbounded
//! tokio sender is the synchronised hand-off, so enqueueing never blocks and
//! never touches the receiver directly. The receiver lives inside the
//! messenger and is lent to one consumer at a time through
//! [`StatusMessenger::consume`].

use std::sync::{
    Arc, OnceLock,
    atomic::{AtomicUsize, Ordering},
};

use futures::{StreamExt, stream::BoxStream};
use tokio::sync::{Mutex, Notify, OwnedMutexGuard, mpsc};

use crate::{SessionContext, SessionId};

/// One status text tagged with the session it belongs to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusMessage {
    /// Session the text is addressed to, absent when emitted outside a scope.
    pub session_id: Option<SessionId>,
    /// The status text.
    pub text: String,
}

impl StatusMessage {
    /// Create a message.
    #[must_use]
    pub fn new(session_id: Option<SessionId>, text: impl Into<String>) -> Self {
        Self {
            session_id,
            text: text.into(),
        }
    }
}

/// Lazy stream of dequeued messages; see [`StatusMessenger::consume`].
pub type RelayStream = BoxStream<'static, QueuedStatus>;

type Receiver = mpsc::UnboundedReceiver<StatusMessage>;

/// Counts enqueued-but-unacknowledged messages.
#[derive(Debug, Default)]
struct Tracker {
    pending: AtomicUsize,
    idle: Notify,
}

impl Tracker {
    fn enqueued(&self) {
        self.pending.fetch_add(1, Ordering::AcqRel);
    }

    fn done(&self) {
        if self.pending.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }

    fn pending(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    async fn join(&self) {
        loop {
            let notified = self.idle.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.pending() == 0 {
                return;
            }
            notified.await;
        }
    }
}

struct Channel {
    tx: mpsc::UnboundedSender<StatusMessage>,
    rx: Arc<Mutex<Receiver>>,
    tracker: Arc<Tracker>,
}

impl Channel {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tracing::debug!("status channel initialized");
        Self {
            tx,
            rx: Arc::new(Mutex::new(rx)),
            tracker: Arc::new(Tracker::default()),
        }
    }

    fn sender(&self) -> StatusSender {
        StatusSender {
            tx: self.tx.clone(),
            tracker: Arc::clone(&self.tracker),
        }
    }
}

/// Producer handle for the status channel.
///
/// Cheap to clone and safe to move to any thread.
#[derive(Clone)]
pub struct StatusSender {
    tx: mpsc::UnboundedSender<StatusMessage>,
    tracker: Arc<Tracker>,
}

impl StatusSender {
    /// Enqueue `text` for the session bound to the current unit of work.
    ///
    /// Never blocks. With no active binding the message is enqueued with
    /// an absent session.
    pub fn emit(&self, text: impl Into<String>) {
        self.enqueue(StatusMessage::new(SessionContext::current(), text));
    }

    /// Enqueue `text` for an explicitly named session.
    pub fn emit_to(&self, session_id: impl Into<SessionId>, text: impl Into<String>) {
        self.enqueue(StatusMessage::new(Some(session_id.into()), text));
    }

    fn enqueue(&self, message: StatusMessage) {
        self.tracker.enqueued();
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            self.tracker.done();
            tracing::warn!(
                session_id = ?message.session_id,
                text = %message.text,
                "Status channel closed, message dropped"
            );
        }
    }
}

impl std::fmt::Debug for StatusSender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusSender")
            .field("pending", &self.tracker.pending())
            .finish_non_exhaustive()
    }
}

/// Process-wide status channel state.
///
/// Created once at startup and handed to producers and the relay loop.
/// Clones share the same channel.
#[derive(Clone, Default)]
pub struct StatusMessenger {
    channel: Arc<OnceLock<Channel>>,
}

impl StatusMessenger {
    /// Create an uninitialised messenger.
    ///
    /// Producers calling [`emit`](Self::emit) before
    /// [`initialize`](Self::initialize) have their messages dropped.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create the channel if needed and return a producer handle.
    ///
    /// Idempotent: every call returns a sender for the same channel.
    pub fn initialize(&self) -> StatusSender {
        self.channel.get_or_init(Channel::new).sender()
    }

    /// Whether [`initialize`](Self::initialize) has run.
    #[must_use]
    pub fn is_initialized(&self) -> bool {
        self.channel.get().is_some()
    }

    /// Producer handle, if the channel exists.
    #[must_use]
    pub fn sender(&self) -> Option<StatusSender> {
        self.channel.get().map(Channel::sender)
    }

    /// Enqueue `text` for the session bound to the current unit of work.
    ///
    /// Drops the message with a warning if the channel was never initialised.
    pub fn emit(&self, text: impl Into<String>) {
        match self.channel.get() {
            Some(channel) => channel.sender().emit(text),
            None => {
                let text = text.into();
                tracing::warn!(
                    session_id = ?SessionContext::current(),
                    %text,
                    "Status channel not initialized, message dropped"
                );
            }
        }
    }

    /// Enqueue `text` for an explicitly named session.
    pub fn emit_to(&self, session_id: impl Into<SessionId>, text: impl Into<String>) {
        match self.channel.get() {
            Some(channel) => channel.sender().emit_to(session_id, text),
            None => {
                let (session_id, text) = (session_id.into(), text.into());
                tracing::warn!(
                    %session_id,
                    %text,
                    "Status channel not initialized, message dropped"
                );
            }
        }
    }

    /// Attach a consumer to the channel.
    ///
    /// The stream waits for the next message on every poll and never ends
    /// while the messenger lives. Only one stream drains the channel at a
    /// time: a second stream waits until the first is dropped, then picks up
    /// whatever is still queued. Without an initialised channel the stream
    /// is empty.
    #[must_use]
    pub fn consume(&self) -> RelayStream {
        let Some(channel) = self.channel.get() else {
            tracing::warn!("Status channel not initialized, relay stream is empty");
            return futures::stream::empty().boxed();
        };

        let tracker = Arc::clone(&channel.tracker);
        futures::stream::unfold(Slot::Waiting(Arc::clone(&channel.rx)), move |slot| {
            let tracker = Arc::clone(&tracker);
            async move {
                let mut rx = match slot {
                    Slot::Waiting(rx) => rx.lock_owned().await,
                    Slot::Attached(rx) => rx,
                };
                let message = rx.recv().await?;
                Some((QueuedStatus::new(message, tracker), Slot::Attached(rx)))
            }
        })
        .boxed()
    }

    /// Number of messages enqueued but not yet acknowledged.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.channel.get().map_or(0, |c| c.tracker.pending())
    }

    /// Wait until every enqueued message has been acknowledged.
    pub async fn join(&self) {
        if let Some(channel) = self.channel.get() {
            channel.tracker.join().await;
        }
    }
}

impl std::fmt::Debug for StatusMessenger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatusMessenger")
            .field("initialized", &self.is_initialized())
            .field("pending", &self.pending())
            .finish()
    }
}

enum Slot {
    Waiting(Arc<Mutex<Receiver>>),
    Attached(OwnedMutexGuard<Receiver>),
}

/// A message handed out by the relay stream.
///
/// Acknowledge it with [`ack`](Self::ack) once delivery was attempted.
/// Dropping it unacknowledged acknowledges it as well.
#[derive(Debug)]
pub struct QueuedStatus {
    message: StatusMessage,
    tracker: Option<Arc<Tracker>>,
}

impl QueuedStatus {
    fn new(message: StatusMessage, tracker: Arc<Tracker>) -> Self {
        Self {
            message,
            tracker: Some(tracker),
        }
    }

    /// Session the message is addressed to.
    #[must_use]
    pub fn session_id(&self) -> Option<&str> {
        self.message.session_id.as_deref()
    }

    /// The status text.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.message.text
    }

    /// The underlying message.
    #[must_use]
    pub const fn message(&self) -> &StatusMessage {
        &self.message
    }

    /// Mark delivery as attempted.
    pub fn ack(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if let Some(tracker) = self.tracker.take() {
            tracker.done();
        }
    }
}

impl Drop for QueuedStatus {
    fn drop(&mut self) {
        self.release();
    }
}
