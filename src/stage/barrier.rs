//! Startup barrier.

use futures::stream::{FuturesUnordered, StreamExt};
use tokio::sync::oneshot;

use crate::error::StageError;

/// A counting barrier which completes once every registered stage has signalled readiness.
#[derive(Default)]
pub struct StartupBarrier {
    pending: Vec<(String, oneshot::Receiver<()>)>,
}

/// A one-shot readiness signal handed to a starting stage.
///
/// Dropping the signal without firing it tells the barrier that the stage will never become ready.
pub struct ReadySignal {
    tx: oneshot::Sender<()>,
}

impl ReadySignal {
    /// Signal readiness.
    pub fn fire(self) {
        let _ = self.tx.send(());
    }
}

impl StartupBarrier {
    /// Create a new instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a stage with this barrier, returning the signal it must fire once ready.
    pub fn register(&mut self, stage: impl Into<String>) -> ReadySignal {
        let (tx, rx) = oneshot::channel();
        self.pending.push((stage.into(), rx));
        ReadySignal { tx }
    }

    /// The number of stages registered with this barrier.
    pub fn len(&self) -> usize {
        self.pending.len()
    }

    /// Wait for every registered stage to signal readiness.
    ///
    /// Returns an error as soon as any stage drops its signal unfired.
    pub async fn wait(self) -> Result<(), StageError> {
        let mut pending: FuturesUnordered<_> = self
            .pending
            .into_iter()
            .map(|(stage, rx)| async move { rx.await.map_err(|_| StageError::NeverReady { stage }) })
            .collect();
        let total = pending.len();
        let mut ready = 0;
        while let Some(res) = pending.next().await {
            res?;
            ready += 1;
            tracing::debug!(ready, total, "stage ready");
        }
        Ok(())
    }
}
