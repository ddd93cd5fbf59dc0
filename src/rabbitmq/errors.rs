// src/rabbitmq/errors.rs

use lapin::Error as LapinError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SubscriberError {
    #[error("RabbitMQ connection error: {0}")]
    ConnectionError(String),

    #[error("RabbitMQ channel error: {0}")]
    ChannelError(String),

    #[error("RabbitMQ exchange error: {0}")]
    ExchangeError(String),

    #[error("Subscription setup failed: {0}")]
    SetupError(String),

    #[error("RabbitMQ consume error: {0}")]
    ConsumeError(String),

    #[error("RabbitMQ acknowledge error: {0}")]
    AckError(String),

    #[error("Too many retries: gave up after {attempts} attempts")]
    RetriesExhausted { attempts: u32 },

    #[error("Unknown error: {0}")]
    Unknown(String),
}

// Custom Result type for subscriber operations
pub type Result<T> = std::result::Result<T, SubscriberError>;

// Converting from lapin errors
impl From<LapinError> for SubscriberError {
    fn from(error: LapinError) -> Self {
        // lapin does not expose a stable error taxonomy, classify on the message
        let error_text = error.to_string();

        if error_text.contains("connection") {
            SubscriberError::ConnectionError(error_text)
        } else if error_text.contains("channel") {
            SubscriberError::ChannelError(error_text)
        } else if error_text.contains("consume") {
            SubscriberError::ConsumeError(error_text)
        } else if error_text.contains("ack") {
            SubscriberError::AckError(error_text)
        } else {
            SubscriberError::Unknown(error_text)
        }
    }
}
