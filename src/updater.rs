//! Rolling image updates of orchestrator services.
//!
//! [`Updater`] selects the services running a given image and points them at
//! a new tag, one service at a time. [`DockerEngine`] is the Docker Swarm
//! implementation of [`Orchestrator`], speaking the Engine HTTP API.

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tracing::{debug, error, info};

const IMAGE_POINTER: &str = "/TaskTemplate/ContainerSpec/Image";

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("orchestrator request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("orchestrator returned {status}: {message}")]
    Api { status: u16, message: String },

    #[error("service {0} has no container image in its spec")]
    InvalidSpec(String),

    #[error("invalid orchestrator configuration: {0}")]
    Config(String),
}

/// A running service as reported by the orchestrator.
#[derive(Debug, Clone, PartialEq)]
pub struct Service {
    pub id: String,
    pub name: String,
    pub image: String,
    /// Spec version, required by the orchestrator for optimistic updates.
    pub version: u64,
    pub spec: Value,
}

#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn list_services(&self) -> Result<Vec<Service>, UpdateError>;

    async fn update_image(&self, service: &Service, image: &str) -> Result<(), UpdateError>;
}

/// Outcome of one update round.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct UpdateReport {
    pub updated: Vec<String>,
    pub unchanged: Vec<String>,
    pub failed: Vec<String>,
}

impl UpdateReport {
    pub fn is_empty(&self) -> bool {
        self.updated.is_empty() && self.unchanged.is_empty() && self.failed.is_empty()
    }
}

/// True when `current` names the image `name`, with any tag or digest.
pub fn image_matches(current: &str, name: &str) -> bool {
    match current.strip_prefix(name) {
        Some(rest) => rest.is_empty() || rest.starts_with(':') || rest.starts_with('@'),
        None => false,
    }
}

pub struct Updater<O> {
    orchestrator: O,
}

impl<O: Orchestrator> Updater<O> {
    pub fn new(orchestrator: O) -> Self {
        Self { orchestrator }
    }

    /// Points every service running `image_name` at `image_name:tag`.
    ///
    /// Only listing the services can fail the whole round; a failed service
    /// update is logged and recorded in the report.
    pub async fn update(&self, image_name: &str, tag: &str) -> Result<UpdateReport, UpdateError> {
        let target = format!("{}:{}", image_name, tag);
        let services = self.orchestrator.list_services().await?;
        let mut report = UpdateReport::default();

        for service in services.iter().filter(|s| image_matches(&s.image, image_name)) {
            // digests are re-resolved by the orchestrator, compare on name:tag
            let current = service.image.split('@').next().unwrap_or_default();
            if current == target {
                debug!(service = %service.name, image = %target, "Service already up to date");
                report.unchanged.push(service.name.clone());
                continue;
            }

            info!(service = %service.name, from = %service.image, to = %target, "Updating service");
            match self.orchestrator.update_image(service, &target).await {
                Ok(()) => report.updated.push(service.name.clone()),
                Err(e) => {
                    error!(service = %service.name, error = %e, "Failed to update service");
                    report.failed.push(service.name.clone());
                }
            }
        }

        Ok(report)
    }
}

/// Docker Engine API client for Swarm services.
#[derive(Debug, Clone)]
pub struct DockerEngine {
    client: reqwest::Client,
    base_url: String,
}

#[derive(Deserialize)]
struct ServiceResponse {
    #[serde(rename = "ID")]
    id: String,
    #[serde(rename = "Version")]
    version: VersionResponse,
    #[serde(rename = "Spec")]
    spec: Value,
}

#[derive(Deserialize)]
struct VersionResponse {
    #[serde(rename = "Index")]
    index: u64,
}

#[derive(Deserialize)]
struct ApiErrorResponse {
    message: String,
}

fn base_url(host: &str) -> Result<String, UpdateError> {
    let url = if let Some(rest) = host.strip_prefix("tcp://") {
        format!("http://{}", rest)
    } else if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else if host.starts_with("unix://") {
        return Err(UpdateError::Config(
            "unix sockets are not supported, expose the engine over tcp".to_string(),
        ));
    } else {
        format!("http://{}", host)
    };
    Ok(url.trim_end_matches('/').to_string())
}

impl DockerEngine {
    /// `host` takes the `DOCKER_HOST` forms `tcp://host:port` or an http(s) URL.
    pub fn new(host: &str) -> Result<Self, UpdateError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url(host)?,
        })
    }

    async fn check(response: reqwest::Response) -> Result<reqwest::Response, UpdateError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ApiErrorResponse>(&body)
            .map(|e| e.message)
            .unwrap_or(body);
        Err(UpdateError::Api {
            status: status.as_u16(),
            message,
        })
    }
}

#[async_trait]
impl Orchestrator for DockerEngine {
    async fn list_services(&self) -> Result<Vec<Service>, UpdateError> {
        let response = self
            .client
            .get(format!("{}/services", self.base_url))
            .send()
            .await?;
        let services: Vec<ServiceResponse> = Self::check(response).await?.json().await?;

        Ok(services
            .into_iter()
            .map(|s| Service {
                name: s.spec["Name"].as_str().unwrap_or(&s.id).to_string(),
                image: s
                    .spec
                    .pointer(IMAGE_POINTER)
                    .and_then(Value::as_str)
                    .unwrap_or_default()
                    .to_string(),
                id: s.id,
                version: s.version.index,
                spec: s.spec,
            })
            .collect())
    }

    async fn update_image(&self, service: &Service, image: &str) -> Result<(), UpdateError> {
        let mut spec = service.spec.clone();
        match spec.pointer_mut(IMAGE_POINTER) {
            Some(current) => *current = Value::String(image.to_string()),
            None => return Err(UpdateError::InvalidSpec(service.name.clone())),
        }

        let response = self
            .client
            .post(format!(
                "{}/services/{}/update?version={}",
                self.base_url, service.id, service.version
            ))
            .json(&spec)
            .send()
            .await?;
        Self::check(response).await?;

        Ok(())
    }
}
