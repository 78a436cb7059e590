//! AMQP broker implementation.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::prelude::*;
use lapin::options::{BasicConsumeOptions, BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};

use crate::broker::{Broker, BrokerConnection, Deliveries};
use crate::error::BrokerError;
use crate::stage::Message;

/// The content type attached to every publication.
const CONTENT_TYPE: &str = "text/plain";

/// A broker reached over AMQP 0.9.1.
///
/// Topics map onto queues bound to the default exchange. Queues are non-durable and
/// deliveries are auto-acknowledged, so delivery is at-most-once. Channels run in confirm mode,
/// and a publication only succeeds once the broker has acked it.
#[derive(Clone, Copy, Debug, Default)]
pub struct AmqpBroker;

#[async_trait]
impl Broker for AmqpBroker {
    #[tracing::instrument(level = "debug", skip(self))]
    async fn connect(&self, addr: &str) -> Result<Arc<dyn BrokerConnection>, BrokerError> {
        let dial_err = |err: lapin::Error| BrokerError::Dial {
            addr: addr.into(),
            reason: err.to_string(),
        };
        let conn = Connection::connect(addr, ConnectionProperties::default()).await.map_err(dial_err)?;
        let channel = conn.create_channel().await.map_err(dial_err)?;
        channel.confirm_select(ConfirmSelectOptions::default()).await.map_err(dial_err)?;
        Ok(Arc::new(AmqpConnection { _conn: conn, channel }))
    }
}

/// A live AMQP connection along with the one channel used over it.
struct AmqpConnection {
    /// Held so that the connection lives as long as its channel.
    _conn: Connection,
    channel: Channel,
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    async fn declare(&self, topic: &str) -> Result<(), BrokerError> {
        let opts = QueueDeclareOptions {
            durable: false,
            exclusive: false,
            auto_delete: false,
            nowait: false,
            passive: false,
        };
        self.channel
            .queue_declare(topic, opts, FieldTable::default())
            .await
            .map_err(|err| BrokerError::Declare {
                topic: topic.into(),
                reason: err.to_string(),
            })?;
        Ok(())
    }

    async fn consume(&self, topic: &str) -> Result<Deliveries, BrokerError> {
        let opts = BasicConsumeOptions {
            no_ack: true,
            ..Default::default()
        };
        let consumer = self
            .channel
            .basic_consume(topic, "", opts, FieldTable::default())
            .await
            .map_err(|err| BrokerError::Consume {
                topic: topic.into(),
                reason: err.to_string(),
            })?;
        Ok(consumer
            .map(|res| {
                res.map(|delivery| Bytes::from(delivery.data))
                    .map_err(|err| BrokerError::Delivery(err.to_string()))
            })
            .boxed())
    }

    async fn publish(&self, message: &Message) -> Result<(), BrokerError> {
        let publish_err = |err: lapin::Error| BrokerError::Publish {
            topic: message.topic().into(),
            reason: err.to_string(),
        };
        let props = BasicProperties::default().with_content_type(CONTENT_TYPE.into());
        let confirmation = self
            .channel
            .basic_publish("", message.topic(), BasicPublishOptions::default(), message.payload(), props)
            .await
            .map_err(publish_err)?
            .await
            .map_err(publish_err)?;
        check_confirmation(message.topic(), confirmation)
    }
}

/// Check the broker's confirmation of a publication.
pub(super) fn check_confirmation(topic: &str, confirmation: Confirmation) -> Result<(), BrokerError> {
    match confirmation {
        Confirmation::Ack(_) => Ok(()),
        Confirmation::Nack(_) => Err(BrokerError::Publish {
            topic: topic.into(),
            reason: "publication was nacked by the broker".into(),
        }),
        Confirmation::NotRequested => Err(BrokerError::Publish {
            topic: topic.into(),
            reason: "channel is not in confirm mode".into(),
        }),
    }
}
