//! Reads the subscriber's output stream and hands each body to a handler.

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::handoff::HandoffReceiver;
use crate::message::{DecodeError, PushEvent};
use crate::rabbitmq::Delivery;
use crate::updater::{Orchestrator, UpdateError, Updater};

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Update(#[from] UpdateError),
}

/// Processes one delivery body. Errors are logged by the dispatcher and the
/// message is dropped.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, body: &[u8]) -> Result<(), DispatchError>;
}

pub struct Dispatcher<H> {
    handler: H,
}

impl<H: Handler> Dispatcher<H> {
    pub fn new(handler: H) -> Self {
        Self { handler }
    }

    /// Runs until the output stream closes. Returns the number of deliveries handled.
    pub async fn run(&self, mut deliveries: HandoffReceiver<Delivery>) -> usize {
        let mut handled = 0;

        while let Some(delivery) = deliveries.recv().await {
            handled += 1;
            if let Err(e) = self.handler.handle(&delivery.body).await {
                error!(
                    delivery_tag = delivery.delivery_tag,
                    payload = %String::from_utf8_lossy(&delivery.body),
                    error = %e,
                    "Dropping message"
                );
            }
        }

        info!(handled, "Output stream closed, dispatcher stopping");
        handled
    }
}

/// Decodes push events and rolls the matching services to the pushed tag.
pub struct DeployHandler<O> {
    updater: Updater<O>,
}

impl<O: Orchestrator> DeployHandler<O> {
    pub fn new(updater: Updater<O>) -> Self {
        Self { updater }
    }
}

#[async_trait]
impl<O: Orchestrator> Handler for DeployHandler<O> {
    async fn handle(&self, body: &[u8]) -> Result<(), DispatchError> {
        let event = PushEvent::from_slice(body)?;
        info!(repo = %event.repo_name(), tag = %event.tag(), "Received push event");

        let report = self.updater.update(event.repo_name(), event.tag()).await?;
        if report.is_empty() {
            warn!(repo = %event.repo_name(), "No service runs this image");
        } else {
            info!(
                repo = %event.repo_name(),
                updated = ?report.updated,
                unchanged = ?report.unchanged,
                failed = ?report.failed,
                "Update round finished"
            );
        }

        Ok(())
    }
}
