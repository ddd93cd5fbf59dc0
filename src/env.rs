use std::env;
use std::time::Duration;

use anyhow::{Context, Result};
use dotenv::dotenv;

use crate::config::{RetryPolicy, SetupFailurePolicy, SubscriberConfig};

const DEFAULT_DOCKER_HOST: &str = "http://localhost:2375";

/// Process configuration read from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub subscriber: SubscriberConfig,
    pub docker_host: String,
}

impl Config {
    /// Reads `.env` and the process environment. A subscriber configuration
    /// loaded from a file replaces the `AMQP_*` variables entirely.
    pub fn load(file_config: Option<SubscriberConfig>) -> Result<Self> {
        dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok(), file_config)
    }

    /// Builds the configuration from any key lookup, falling back to defaults for unset keys.
    pub fn from_lookup<F>(lookup: F, file_config: Option<SubscriberConfig>) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let docker_host = lookup("DOCKER_HOST").unwrap_or_else(|| DEFAULT_DOCKER_HOST.to_string());

        if let Some(subscriber) = file_config {
            return Ok(Config {
                subscriber,
                docker_host,
            });
        }

        let defaults = SubscriberConfig::default();
        let retry_defaults = RetryPolicy::default();

        let max_attempts = match lookup("AMQP_MAX_RETRIES") {
            Some(val) => val.parse().context("AMQP_MAX_RETRIES must be a number")?,
            None => retry_defaults.max_attempts,
        };
        let delay = match lookup("AMQP_RETRY_DELAY_SECONDS") {
            Some(val) => Duration::from_secs(
                val.parse().context("AMQP_RETRY_DELAY_SECONDS must be a number")?,
            ),
            None => retry_defaults.delay(),
        };
        let setup_failure = match lookup("AMQP_SETUP_RETRY").as_deref() {
            Some("1") | Some("true") => SetupFailurePolicy::Retry,
            _ => SetupFailurePolicy::Terminate,
        };

        let subscriber = SubscriberConfig {
            uri: lookup("AMQP_URI").unwrap_or(defaults.uri),
            exchange: lookup("AMQP_EXCHANGE").unwrap_or(defaults.exchange),
            exchange_type: lookup("AMQP_EXCHANGE_TYPE").unwrap_or(defaults.exchange_type),
            queue: lookup("AMQP_QUEUE").unwrap_or(defaults.queue),
            routing_key: lookup("AMQP_ROUTING_KEY").unwrap_or(defaults.routing_key),
            consumer_tag: lookup("AMQP_CONSUMER_TAG").unwrap_or(defaults.consumer_tag),
            retry: RetryPolicy::new(max_attempts, delay),
            setup_failure,
        };
        subscriber.validate()?;

        Ok(Config {
            subscriber,
            docker_host,
        })
    }
}
