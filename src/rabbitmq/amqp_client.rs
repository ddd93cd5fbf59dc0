// src/rabbitmq/amqp_client.rs

use async_trait::async_trait;
use futures::StreamExt;
use lapin::{
    options::{
        BasicAckOptions, BasicConsumeOptions, ExchangeDeclareOptions, QueueBindOptions,
        QueueDeclareOptions,
    },
    types::FieldTable,
    Channel, Connection, ConnectionProperties, ExchangeKind,
};
use tracing::debug;

use super::broker::{Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryStream};
use super::errors::{Result, SubscriberError};

/// Dials RabbitMQ through `lapin`.
#[derive(Clone, Default)]
pub struct AmqpBroker {
    properties: ConnectionProperties,
}

impl AmqpBroker {
    pub fn new(properties: ConnectionProperties) -> Self {
        Self { properties }
    }
}

pub struct AmqpConnection {
    connection: Connection,
}

pub struct AmqpChannel {
    channel: Channel,
}

pub(crate) fn exchange_kind(kind: &str) -> ExchangeKind {
    match kind {
        "direct" => ExchangeKind::Direct,
        "fanout" => ExchangeKind::Fanout,
        "headers" => ExchangeKind::Headers,
        "topic" => ExchangeKind::Topic,
        other => ExchangeKind::Custom(other.to_string()),
    }
}

#[async_trait]
impl Broker for AmqpBroker {
    type Connection = AmqpConnection;

    async fn connect(&self, uri: &str) -> Result<AmqpConnection> {
        let connection = Connection::connect(uri, self.properties.clone())
            .await
            .map_err(|e| SubscriberError::ConnectionError(format!("Failed to connect: {}", e)))?;

        Ok(AmqpConnection { connection })
    }
}

#[async_trait]
impl BrokerConnection for AmqpConnection {
    type Channel = AmqpChannel;

    async fn open_channel(&self) -> Result<AmqpChannel> {
        let channel = self
            .connection
            .create_channel()
            .await
            .map_err(|e| SubscriberError::ChannelError(format!("Failed to create channel: {}", e)))?;

        Ok(AmqpChannel { channel })
    }

    async fn close(&self) -> Result<()> {
        if !self.connection.status().connected() {
            debug!("Connection already closed");
            return Ok(());
        }

        self.connection
            .close(200, "Closing subscriber")
            .await
            .map_err(|e| SubscriberError::ConnectionError(e.to_string()))
    }
}

#[async_trait]
impl BrokerChannel for AmqpChannel {
    async fn declare_exchange(&self, name: &str, kind: &str) -> Result<()> {
        self.channel
            .exchange_declare(
                name,
                exchange_kind(kind),
                ExchangeDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    internal: false,
                    ..ExchangeDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SubscriberError::ExchangeError(format!("Failed to declare exchange: {}", e)))
    }

    async fn declare_queue(&self, name: &str) -> Result<()> {
        self.channel
            .queue_declare(
                name,
                QueueDeclareOptions {
                    durable: true,
                    auto_delete: false,
                    exclusive: false,
                    ..QueueDeclareOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SubscriberError::ChannelError(format!("queue declare: {}", e)))?;

        Ok(())
    }

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()> {
        self.channel
            .queue_bind(
                queue,
                exchange,
                routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|e| SubscriberError::ChannelError(format!("queue bind: {}", e)))
    }

    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream> {
        let consumer = self
            .channel
            .basic_consume(
                queue,
                consumer_tag,
                BasicConsumeOptions {
                    no_ack: false,
                    exclusive: false,
                    no_local: false,
                    ..BasicConsumeOptions::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| SubscriberError::ConsumeError(e.to_string()))?;

        let deliveries = consumer.map(|delivery| {
            delivery
                .map(|d| Delivery::new(d.delivery_tag, d.data))
                .map_err(SubscriberError::from)
        });

        Ok(deliveries.boxed())
    }

    async fn ack(&self, delivery_tag: u64) -> Result<()> {
        self.channel
            .basic_ack(delivery_tag, BasicAckOptions::default())
            .await
            .map_err(|e| SubscriberError::AckError(e.to_string()))
    }
}
