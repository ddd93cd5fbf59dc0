// src/config.rs
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

const CONFIG_FILE_NAME: &str = "deploy-listener.json";

/// Immutable parameters of one subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SubscriberConfig {
    pub uri: String,
    pub exchange: String,
    #[serde(default = "default_exchange_type")]
    pub exchange_type: String,
    pub queue: String,
    #[serde(default)]
    pub routing_key: String,
    /// Empty lets the broker assign a tag.
    #[serde(default = "default_consumer_tag")]
    pub consumer_tag: String,
    #[serde(default)]
    pub retry: RetryPolicy,
    #[serde(default)]
    pub setup_failure: SetupFailurePolicy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_delay_secs")]
    pub delay_secs: u64,
    /// Delay in milliseconds. Takes precedence over `delay_secs`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<u64>,
}

/// What the subscription does when queue declare, bind or consume fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SetupFailurePolicy {
    /// Stop the whole subscription.
    #[default]
    Terminate,
    /// Drop the session and request a new one after the retry delay.
    Retry,
}

// Default values
fn default_exchange_type() -> String { "topic".to_string() }
fn default_consumer_tag() -> String { "deploy-listener".to_string() }
fn default_max_attempts() -> u32 { 10 }
fn default_delay_secs() -> u64 { 15 }

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            delay_secs: default_delay_secs(),
            delay_ms: None,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            max_attempts,
            delay_secs: delay.as_secs(),
            delay_ms: Some(delay.as_millis() as u64),
        }
    }

    pub fn delay(&self) -> Duration {
        match self.delay_ms {
            Some(ms) => Duration::from_millis(ms),
            None => Duration::from_secs(self.delay_secs),
        }
    }
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            uri: "amqp://localhost".to_string(),
            exchange: "holmescode.deployments".to_string(),
            exchange_type: default_exchange_type(),
            queue: "holmescode.deploymentsQueue".to_string(),
            routing_key: String::new(),
            consumer_tag: default_consumer_tag(),
            retry: RetryPolicy::default(),
            setup_failure: SetupFailurePolicy::default(),
        }
    }
}

impl SubscriberConfig {
    pub fn validate(&self) -> Result<()> {
        if self.uri.is_empty() {
            return Err(anyhow!("Configuration error: uri cannot be empty"));
        }
        if self.exchange.is_empty() {
            return Err(anyhow!("Configuration error: exchange cannot be empty"));
        }
        if self.queue.is_empty() {
            return Err(anyhow!("Configuration error: queue cannot be empty"));
        }
        if self.retry.max_attempts == 0 {
            return Err(anyhow!("Configuration error: retry.max_attempts must be at least 1"));
        }
        Ok(())
    }
}

pub fn find_config_file() -> Option<PathBuf> {
    let locations = [
        ("Current directory", PathBuf::from(CONFIG_FILE_NAME)),
        ("Config directory", Path::new("config").join(CONFIG_FILE_NAME)),
    ];

    for (location_name, path) in locations.iter() {
        if path.exists() {
            debug!("Found config file in {}: {}", location_name, path.display());
            return Some(path.clone());
        }
    }

    if let Some(home_dir) = home::home_dir() {
        let home_config = home_dir.join(format!(".{}", CONFIG_FILE_NAME));
        if home_config.exists() {
            debug!("Found config file in home directory: {}", home_config.display());
            return Some(home_config);
        }
    }

    None
}

pub fn load_config(path: &Path) -> Result<SubscriberConfig> {
    let config_content = fs::read_to_string(path)
        .context(format!("Failed to read config file at {}", path.display()))?;

    let config: SubscriberConfig = serde_json::from_str(&config_content)
        .context("Configuration file contains invalid JSON or missing required fields")?;

    config.validate()?;
    info!(path = %path.display(), "Loaded configuration file");

    Ok(config)
}
