//! Pipeline stages.
//!
//! A stage is an independent worker bound to one listen topic on one broker. Each message
//! delivered on the listen topic is handed to the stage's `Transform`, and the messages the
//! transform derives are routed to downstream stages. Which topics a stage may route to is not
//! known by the stage itself, it is handed its routes by the pipeline wiring.

mod barrier;
#[cfg(test)]
mod barrier_test;
#[cfg(test)]
mod mod_test;

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::prelude::*;
use tokio::sync::OnceCell;

use crate::broker::{Broker, BrokerConnection};
use crate::error::{BrokerError, StageError};

pub use barrier::{ReadySignal, StartupBarrier};

/// A unit of data exchanged between stages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    topic: String,
    payload: Bytes,
}

impl Message {
    /// Create a new message bound for the given topic.
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }

    /// The topic to which this message is bound.
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// The opaque payload of this message.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }
}

/// A type capable of handling the messages delivered to a stage.
#[async_trait]
pub trait Transform: Send + Sync + 'static {
    /// Handle a single delivered payload, returning any messages derived from it.
    ///
    /// Returning a `Result::Err` drops the delivered message. The stage continues consuming
    /// either way.
    async fn transform(&self, payload: Bytes) -> Result<Vec<Message>>;
}

/// A `Transform` backed by a closure.
#[cfg(test)]
struct FnTransform<F>(F);

#[cfg(test)]
#[async_trait]
impl<F, Fut> Transform for FnTransform<F>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Message>>> + Send + 'static,
{
    async fn transform(&self, payload: Bytes) -> Result<Vec<Message>> {
        (self.0)(payload).await
    }
}

/// Build a `Transform` from the given closure.
#[cfg(test)]
pub fn transform_fn<F, Fut>(f: F) -> Arc<dyn Transform>
where
    F: Fn(Bytes) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<Message>>> + Send + 'static,
{
    Arc::new(FnTransform(f))
}

/// A handle for publishing over a stage's own broker connection.
///
/// Publishers are cheap to clone and may be used from any task. They become usable once their
/// stage has connected.
#[derive(Clone)]
pub struct Publisher {
    stage: Arc<String>,
    conn: Arc<OnceCell<Arc<dyn BrokerConnection>>>,
}

impl Publisher {
    fn new(stage: Arc<String>) -> Self {
        Self {
            stage,
            conn: Default::default(),
        }
    }

    /// The id of the stage which owns this publisher's connection.
    pub fn stage(&self) -> &str {
        &self.stage
    }

    /// Publish the given payload to the given topic.
    #[tracing::instrument(level = "debug", skip(self, payload), fields(stage = %self.stage))]
    pub async fn publish(&self, topic: &str, payload: impl Into<Bytes>) -> Result<(), StageError> {
        self.send(&Message::new(topic, payload)).await
    }

    /// Publish the given message.
    pub async fn send(&self, message: &Message) -> Result<(), StageError> {
        let conn = self.conn.get().ok_or_else(|| StageError::NotConnected {
            stage: self.stage.to_string(),
        })?;
        tracing::debug!(stage = %self.stage, topic = message.topic(), "publishing");
        conn.publish(message).await.map_err(|source| StageError::Publish {
            stage: self.stage.to_string(),
            source,
        })
    }

    fn attach(&self, conn: Arc<dyn BrokerConnection>) {
        // A stage only connects once, so the cell is always empty here.
        let _ = self.conn.set(conn);
    }
}

/// A builder of `Stage` instances.
pub struct StageBuilder {
    id: String,
    address: String,
    listen_topic: String,
    transform: Option<Arc<dyn Transform>>,
}

impl StageBuilder {
    /// Set the transform invoked for each delivered message.
    pub fn transform(mut self, transform: Arc<dyn Transform>) -> Self {
        self.transform = Some(transform);
        self
    }

    /// Build the stage.
    ///
    /// Fails if no transform has been assigned.
    pub fn build(self) -> Result<Stage, StageError> {
        let transform = self.transform.ok_or_else(|| StageError::MissingTransform { stage: self.id.clone() })?;
        let id = Arc::new(self.id);
        Ok(Stage {
            publisher: Publisher::new(id.clone()),
            id,
            address: self.address,
            listen_topic: self.listen_topic,
            transform,
            routes: Default::default(),
        })
    }
}

/// A named worker bound to one listen topic on a broker.
pub struct Stage {
    id: Arc<String>,
    address: String,
    listen_topic: String,
    transform: Arc<dyn Transform>,
    /// This stage's handle onto its own connection.
    publisher: Publisher,
    /// The downstream publishers of this stage, keyed by topic.
    routes: BTreeMap<String, Publisher>,
}

impl Stage {
    /// Begin building a new stage. No IO is performed.
    pub fn builder(id: impl Into<String>, address: impl Into<String>, listen_topic: impl Into<String>) -> StageBuilder {
        StageBuilder {
            id: id.into(),
            address: address.into(),
            listen_topic: listen_topic.into(),
            transform: None,
        }
    }

    /// The id of this stage.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// The broker address of this stage.
    #[cfg(test)]
    pub fn address(&self) -> &str {
        &self.address
    }

    /// The topic this stage consumes.
    pub fn listen_topic(&self) -> &str {
        &self.listen_topic
    }

    /// A handle for publishing over this stage's connection.
    pub fn publisher(&self) -> Publisher {
        self.publisher.clone()
    }

    /// The topics this stage routes its derived messages to.
    #[cfg(test)]
    pub fn routes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.routes.iter().map(|(topic, publisher)| (topic.as_str(), publisher.stage()))
    }

    /// Route derived messages on the given topic through the given publisher.
    pub(crate) fn route(&mut self, topic: impl Into<String>, publisher: Publisher) {
        self.routes.insert(topic.into(), publisher);
    }

    /// Start this stage.
    ///
    /// Connects to the broker, declares & subscribes to the listen topic, and then fires the
    /// given readiness signal. From then on this call only returns once the connection fails,
    /// which is always an error.
    #[tracing::instrument(level = "debug", skip(self, broker, ready), fields(stage = %self.id))]
    pub async fn start(self, broker: Arc<dyn Broker>, ready: ReadySignal) -> Result<(), StageError> {
        tracing::info!(stage = %self.id, addr = %self.address, "starting stage");
        let conn = broker.connect(&self.address).await.map_err(|source| StageError::Connect {
            stage: self.id.to_string(),
            source,
        })?;
        conn.declare(&self.listen_topic).await.map_err(|source| StageError::Declare {
            stage: self.id.to_string(),
            source,
        })?;
        let mut deliveries = conn.consume(&self.listen_topic).await.map_err(|source| StageError::Consume {
            stage: self.id.to_string(),
            source,
        })?;
        self.publisher.attach(conn);
        tracing::info!(stage = %self.id, topic = %self.listen_topic, "stage listening");
        ready.fire();

        while let Some(delivery) = deliveries.next().await {
            let payload = delivery.map_err(|source| StageError::ConnectionLost {
                stage: self.id.to_string(),
                source,
            })?;
            if payload.is_empty() {
                tracing::debug!(stage = %self.id, "empty payload received, skipping");
                continue;
            }
            tracing::debug!(stage = %self.id, len = payload.len(), "received a message");
            self.handle_delivery(payload).await;
        }

        Err(StageError::ConnectionLost {
            stage: self.id.to_string(),
            source: BrokerError::Closed,
        })
    }

    /// Run the transform over a single payload and route its outputs.
    ///
    /// Every failure in here is local to the given payload.
    async fn handle_delivery(&self, payload: Bytes) {
        let outputs = match AssertUnwindSafe(self.transform.transform(payload)).catch_unwind().await {
            Ok(Ok(outputs)) => outputs,
            Ok(Err(err)) => {
                tracing::warn!(stage = %self.id, error = ?err, "transform failed, dropping message");
                return;
            }
            Err(_) => {
                tracing::error!(stage = %self.id, "transform panicked, dropping message");
                return;
            }
        };
        for output in outputs {
            let publisher = match self.routes.get(output.topic()) {
                Some(publisher) => publisher,
                None => {
                    tracing::warn!(stage = %self.id, topic = output.topic(), "no route for derived message, dropping");
                    continue;
                }
            };
            if let Err(err) = publisher.send(&output).await {
                tracing::error!(stage = %self.id, topic = output.topic(), error = ?err, "error publishing derived message");
            }
        }
    }
}
