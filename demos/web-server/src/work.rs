//! Demo workloads that report progress through the status channel.

use std::{thread, time::Duration};

use async_trait::async_trait;
use serde_json::json;
use status_relay_core::{
    EventPublisher, SessionContext, StatusMessenger, spawn_blocking_in_session, spawn_in_session,
};
use status_relay_transport::websocket::{ClientHandler, Replier};

/// Number of steps the simulated job runs.
pub const SIMULATED_STEPS: usize = 5;

/// Synchronous job that emits a status before and after each step.
///
/// Runs on whatever thread calls it; the session comes from the caller's
/// binding.
pub fn simulated_work(messenger: &StatusMessenger, step_delay: Duration) {
    messenger.emit("Starting simulated work...");
    thread::sleep(step_delay);
    for step in 1..=SIMULATED_STEPS {
        messenger.emit(format!("Processing step {step} of {SIMULATED_STEPS}..."));
        thread::sleep(step_delay);
    }
    messenger.emit("Simulated work completed!");
    thread::sleep(step_delay);
    messenger.emit("Ready for new work or displaying results.");
}

/// Answers prompts with a staged fake research run.
///
/// Progress goes out as status text; the answer itself is a reply on the
/// prompting connection, followed by turn-complete.
pub struct DemoAgent {
    messenger: StatusMessenger,
    publisher: EventPublisher,
    step_delay: Duration,
}

impl DemoAgent {
    pub const fn new(messenger: StatusMessenger, publisher: EventPublisher, step_delay: Duration) -> Self {
        Self {
            messenger,
            publisher,
            step_delay,
        }
    }
}

#[async_trait]
impl ClientHandler for DemoAgent {
    async fn on_prompt(&self, text: String, replier: Replier) {
        tracing::info!(session_id = ?SessionContext::current(), "Prompt received");
        self.publisher.publish(json!({ "prompt": text }), "prompt_received");
        self.messenger
            .emit(format!("Researching \"{text}\" now. Please wait..."));

        let messenger = self.messenger.clone();
        let publisher = self.publisher.clone();
        let step_delay = self.step_delay;
        spawn_in_session(async move {
            tokio::time::sleep(step_delay).await;
            messenger.emit("Performing a search now. Please wait...");

            let worker = messenger.clone();
            let search = spawn_blocking_in_session(move || {
                thread::sleep(step_delay);
                worker.emit("Search finished, summarizing results...");
            });
            if let Err(e) = search.await {
                tracing::error!("Search worker failed: {e}");
                messenger.emit("Research failed.");
                replier.interrupted();
                return;
            }

            tokio::time::sleep(step_delay).await;
            replier.message(format!("Here is what I found about \"{text}\"."));
            messenger.emit("Research complete.");
            replier.turn_complete();
            publisher.publish(json!({ "prompt": text }), "research_complete");
        });
    }
}
