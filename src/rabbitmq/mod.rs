// src/rabbitmq/mod.rs
// Resilient RabbitMQ subscription: session provider, subscription loop and the broker seam

pub mod errors;
pub mod broker;
pub mod connection;
pub mod consumer;
pub mod subscriber;

// lapin implementation of the broker traits
mod amqp_client;

// Re-export specific items to simplify imports elsewhere
pub use amqp_client::{AmqpBroker, AmqpChannel, AmqpConnection};
pub use broker::{Broker, BrokerChannel, BrokerConnection, Delivery, DeliveryStream, Session, SessionOf};
pub use connection::{ProviderState, RetryState, SessionProvider, SessionSlot};
pub use consumer::{SessionEnd, SubscriptionLoop};
pub use errors::{Result, SubscriberError};
pub use subscriber::Subscriber;
