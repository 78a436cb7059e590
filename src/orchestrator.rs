//! The orchestrator loop, bridging submissions into the pipeline's entry topic.

use std::time::Duration;

use tokio::task::JoinHandle;

use crate::relay::RelayReceiver;
use crate::stage::Publisher;

/// A controller which republishes each relayed year onto the entry topic.
pub struct Orchestrator {
    /// The receiving side of the relay queue.
    relay: RelayReceiver,
    /// The publisher of the pipeline's entry stage.
    entry: Publisher,
    /// The topic consumed by the pipeline's entry stage.
    entry_topic: String,
    /// How long to wait for a submission before logging a heartbeat.
    idle_timeout: Duration,
}

impl Orchestrator {
    /// Create a new instance.
    pub fn new(relay: RelayReceiver, entry: Publisher, entry_topic: impl Into<String>, idle_timeout: Duration) -> Self {
        Self {
            relay,
            entry,
            entry_topic: entry_topic.into(),
            idle_timeout,
        }
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    async fn run(mut self) {
        tracing::debug!(topic = %self.entry_topic, "orchestrator has started");

        loop {
            tokio::select! {
                year_opt = self.relay.recv() => match year_opt {
                    Some(year) => self.handle_submission(year).await,
                    None => break,
                },
                _ = tokio::time::sleep(self.idle_timeout) => tracing::info!("waiting for a year..."),
            }
        }

        tracing::debug!("orchestrator has shutdown");
    }

    /// Publish the given year onto the entry topic.
    #[tracing::instrument(level = "debug", skip(self))]
    async fn handle_submission(&self, year: i64) {
        tracing::info!(year, stage = self.entry.stage(), "got year, sending to entry stage");
        if let Err(err) = self.entry.publish(&self.entry_topic, year.to_string()).await {
            tracing::error!(year, error = ?err, "unable to publish year");
        }
    }
}
