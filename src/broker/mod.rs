//! Message broker abstractions.
//!
//! A `Broker` dials connections, and a `BrokerConnection` is owned by exactly one stage for its
//! entire lifetime. Brokers are addressed by URL, and the scheme of the address selects the
//! implementation used to reach it.

mod amqp;
mod memory;

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::BrokerError;
use crate::stage::Message;

pub use amqp::AmqpBroker;
pub use memory::MemoryBroker;

/// The ordered stream of payloads delivered to a consumer.
///
/// The stream ending indicates that the underlying connection has closed.
pub type Deliveries = BoxStream<'static, Result<Bytes, BrokerError>>;

/// A type capable of dialing broker connections.
#[async_trait]
pub trait Broker: Send + Sync + 'static {
    /// Establish a new connection to the broker at the given address.
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError>;
}

/// A single live connection to a broker.
///
/// Implementations must be safe to publish through from any task.
#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    /// Ensure the given topic exists as a consumable channel.
    async fn declare(&self, topic: &str) -> Result<(), BrokerError>;

    /// Begin consuming the given topic.
    async fn consume(&self, topic: &str) -> Result<Deliveries, BrokerError>;

    /// Publish the given message to its topic.
    async fn publish(&self, message: &Message) -> Result<(), BrokerError>;
}

/// A broker which dispatches to a concrete implementation based on the address scheme.
///
/// All `memory://` addresses resolve to the same in-process broker.
#[derive(Clone, Default)]
pub struct SchemeBroker {
    amqp: AmqpBroker,
    memory: MemoryBroker,
}

#[async_trait]
impl Broker for SchemeBroker {
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        match scheme(addr) {
            Some("amqp") | Some("amqps") => self.amqp.connect(addr).await,
            Some("memory") => self.memory.connect(addr).await,
            _ => Err(BrokerError::UnsupportedAddress(addr.into())),
        }
    }
}

/// Extract the scheme of the given broker address, if any.
fn scheme(addr: &str) -> Option<&str> {
    addr.split_once("://").map(|(scheme, _)| scheme).filter(|scheme| !scheme.is_empty())
}
