//! The relay queue between the ingestion front door & the orchestrator.

use tokio::sync::{mpsc, oneshot};

use crate::error::ApiError;

/// A submitted year along with the acknowledgement fired once it has been taken.
struct Submission {
    year: i64,
    taken: oneshot::Sender<()>,
}

/// The sending half of the relay queue.
///
/// Submitting is a rendezvous: `submit` only returns once the receiver has taken the year, so
/// submitters stall for as long as nothing is receiving.
#[derive(Clone)]
pub struct RelayQueue {
    tx: mpsc::Sender<Submission>,
}

/// The receiving half of the relay queue.
pub struct RelayReceiver {
    rx: mpsc::Receiver<Submission>,
}

/// Create a new relay queue.
pub fn relay_queue() -> (RelayQueue, RelayReceiver) {
    let (tx, rx) = mpsc::channel(1);
    (RelayQueue { tx }, RelayReceiver { rx })
}

impl RelayQueue {
    /// Hand the given year to the receiver, waiting until it has been taken.
    pub async fn submit(&self, year: i64) -> Result<(), ApiError> {
        let (taken, taken_rx) = oneshot::channel();
        self.tx.send(Submission { year, taken }).await.map_err(|_| ApiError::RelayClosed)?;
        taken_rx.await.map_err(|_| ApiError::RelayClosed)
    }
}

impl RelayReceiver {
    /// Take the next submitted year, or `None` once all submitters are gone.
    pub async fn recv(&mut self) -> Option<i64> {
        let submission = self.rx.recv().await?;
        let _ = submission.taken.send(());
        Some(submission.year)
    }

    /// Take a submitted year if one is immediately available.
    #[cfg(test)]
    pub fn try_recv(&mut self) -> Option<i64> {
        let submission = self.rx.try_recv().ok()?;
        let _ = submission.taken.send(());
        Some(submission.year)
    }
}
