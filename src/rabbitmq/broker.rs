// src/rabbitmq/broker.rs
//! Broker operations the subscriber depends on.
//!
//! The session provider and subscription loop only see these traits; the
//! `lapin` implementation lives in `amqp_client`.

use async_trait::async_trait;
use futures::stream::BoxStream;
use tracing::{debug, warn};

use super::errors::Result;

/// One message pulled from a queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delivery {
    pub delivery_tag: u64,
    pub body: Vec<u8>,
}

impl Delivery {
    pub fn new(delivery_tag: u64, body: impl Into<Vec<u8>>) -> Self {
        Self {
            delivery_tag,
            body: body.into(),
        }
    }
}

/// Deliveries of one consumer, ending when the channel goes away.
pub type DeliveryStream = BoxStream<'static, Result<Delivery>>;

#[async_trait]
pub trait Broker: Send + Sync + 'static {
    type Connection: BrokerConnection;

    async fn connect(&self, uri: &str) -> Result<Self::Connection>;
}

#[async_trait]
pub trait BrokerConnection: Send + Sync + 'static {
    type Channel: BrokerChannel;

    async fn open_channel(&self) -> Result<Self::Channel>;

    async fn close(&self) -> Result<()>;
}

#[async_trait]
pub trait BrokerChannel: Send + Sync + 'static {
    /// Declares a durable, non-auto-deleted, non-internal exchange.
    async fn declare_exchange(&self, name: &str, kind: &str) -> Result<()>;

    /// Declares a durable, non-auto-deleted, non-exclusive queue.
    async fn declare_queue(&self, name: &str) -> Result<()>;

    async fn bind_queue(&self, queue: &str, exchange: &str, routing_key: &str) -> Result<()>;

    /// Starts a manual-ack, non-exclusive consumer. An empty tag lets the broker pick one.
    async fn consume(&self, queue: &str, consumer_tag: &str) -> Result<DeliveryStream>;

    async fn ack(&self, delivery_tag: u64) -> Result<()>;
}

/// A live connection and channel pair.
pub struct Session<C: BrokerConnection> {
    pub connection: C,
    pub channel: C::Channel,
}

pub type SessionOf<B> = Session<<B as Broker>::Connection>;

impl<C: BrokerConnection> Session<C> {
    pub fn new(connection: C, channel: C::Channel) -> Self {
        Self { connection, channel }
    }

    /// Closes the connection, which takes the channel with it. Errors are only
    /// logged: a dead session is the usual reason for closing it.
    pub async fn close(self) {
        debug!("Closing session");
        if let Err(e) = self.connection.close().await {
            warn!(error = %e, "Failed to close broker connection");
        }
    }
}
