//! Listens for image-push notifications on RabbitMQ and rolls matching
//! Docker Swarm services to the pushed tag.

pub mod config;
pub mod dispatcher;
pub mod env;
pub mod handoff;
pub mod message;
pub mod rabbitmq;
pub mod shutdown;
pub mod updater;
