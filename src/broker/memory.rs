//! In-process broker implementation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use bytes::Bytes;
use futures::prelude::*;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use crate::broker::{Broker, BrokerConnection, Deliveries};
use crate::error::BrokerError;
use crate::stage::Message;

/// A broker living entirely within this process.
///
/// Declared topics buffer publications until they are consumed. Publications to a topic which
/// has never been declared are dropped, the same as an unroutable message on an AMQP default
/// exchange. Each topic supports a single consumer.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    inner: Arc<MemoryBrokerInner>,
}

#[derive(Default)]
struct MemoryBrokerInner {
    topics: Mutex<HashMap<String, MemoryTopic>>,
    /// When set, all new connection attempts fail.
    offline: AtomicBool,
    /// The number of publications accepted onto a declared topic.
    published: AtomicU64,
}

struct MemoryTopic {
    tx: mpsc::UnboundedSender<Bytes>,
    /// The consumer side of the topic, taken by its first consumer.
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
}

impl MemoryBroker {
    /// Cause all subsequent connection attempts to fail, or allow them again.
    #[cfg(test)]
    pub fn set_offline(&self, offline: bool) {
        self.inner.offline.store(offline, Ordering::SeqCst);
    }

    /// Drop all topics, ending every active delivery stream.
    #[cfg(test)]
    pub fn disconnect_all(&self) {
        self.topics().clear();
    }

    /// Check whether the given topic has an active consumer.
    #[cfg(test)]
    pub fn has_consumer(&self, topic: &str) -> bool {
        self.topics().get(topic).map(|topic| topic.rx.is_none()).unwrap_or(false)
    }

    /// The number of publications which have been accepted onto a declared topic.
    #[cfg(test)]
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::SeqCst)
    }

    fn topics(&self) -> MutexGuard<'_, HashMap<String, MemoryTopic>> {
        // A poisoned map is still structurally sound, as no operation leaves it half-updated.
        self.inner.topics.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl Broker for MemoryBroker {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        if self.inner.offline.load(Ordering::SeqCst) {
            return Err(BrokerError::Dial {
                addr: addr.into(),
                reason: "broker is offline".into(),
            });
        }
        tracing::debug!(addr, "connected to in-memory broker");
        Ok(Arc::new(MemoryConnection { broker: self.clone() }))
    }
}

/// A connection to an in-process broker.
struct MemoryConnection {
    broker: MemoryBroker,
}

#[async_trait]
impl BrokerConnection for MemoryConnection {
    async fn declare(&self, topic: &str) -> Result<(), BrokerError> {
        self.broker.topics().entry(topic.into()).or_insert_with(|| {
            let (tx, rx) = mpsc::unbounded_channel();
            MemoryTopic { tx, rx: Some(rx) }
        });
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<Deliveries, BrokerError> {
        let mut topics = self.broker.topics();
        let entry = topics.get_mut(topic).ok_or_else(|| BrokerError::Consume {
            topic: topic.into(),
            reason: "topic has not been declared".into(),
        })?;
        let rx = entry.rx.take().ok_or_else(|| BrokerError::Consume {
            topic: topic.into(),
            reason: "topic already has a consumer".into(),
        })?;
        Ok(UnboundedReceiverStream::new(rx).map(Ok).boxed())
    }

    async fn publish(&self, message: &Message) -> Result<(), BrokerError> {
        let topics = self.broker.topics();
        let topic = match topics.get(message.topic()) {
            Some(topic) => topic,
            None => {
                tracing::debug!(topic = message.topic(), "no such topic, dropping publication");
                return Ok(());
            }
        };
        topic.tx.send(message.payload().clone()).map_err(|_| BrokerError::Publish {
            topic: message.topic().into(),
            reason: "consumer has gone away".into(),
        })?;
        self.broker.inner.published.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
