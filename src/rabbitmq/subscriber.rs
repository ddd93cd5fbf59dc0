// src/rabbitmq/subscriber.rs

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use super::broker::{Broker, Delivery};
use super::connection::SessionProvider;
use super::consumer::SubscriptionLoop;
use super::errors::{Result, SubscriberError};
use crate::config::SubscriberConfig;
use crate::handoff::{rendezvous, HandoffReceiver};

/// A single consumer of one exchange, kept alive across broker failures.
pub struct Subscriber<B: Broker> {
    broker: Arc<B>,
    config: Arc<SubscriberConfig>,
    token: CancellationToken,
}

impl<B: Broker> Subscriber<B> {
    pub fn new(config: SubscriberConfig, broker: B, token: CancellationToken) -> Self {
        Self {
            broker: Arc::new(broker),
            config: Arc::new(config),
            token,
        }
    }

    /// Starts the session provider and the subscription loop.
    ///
    /// Deliveries come out of the returned receiver one at a time; each is
    /// acknowledged only after the receiver has taken it. The receiver yields
    /// `None` once both background tasks have stopped. The handle resolves to
    /// the reason they stopped: `Ok` on cancellation, `RetriesExhausted` or
    /// `SetupError` otherwise.
    pub fn consume(self) -> (HandoffReceiver<Delivery>, JoinHandle<Result<()>>) {
        let (output_tx, output_rx) = rendezvous();
        let (offer_tx, offer_rx) = rendezvous();

        // cancelling the subscription's own token stops the provider without
        // touching the caller's
        let token = self.token.child_token();

        let provider = SessionProvider::new(self.broker.clone(), self.config.clone());
        let provider_handle = tokio::spawn(provider.run(offer_tx, token.clone()));

        let subscription = SubscriptionLoop::new(self.config.clone(), output_tx, token.clone());

        let handle = tokio::spawn(async move {
            let result = subscription.run(offer_rx).await;
            token.cancel();

            let provider_result = match provider_handle.await {
                Ok(result) => result,
                Err(e) => Err(SubscriberError::Unknown(format!(
                    "session provider task failed: {}",
                    e
                ))),
            };

            // closes the output stream
            drop(subscription);

            match (result, provider_result) {
                (_, Err(e)) | (Err(e), Ok(())) => {
                    error!(error = %e, "Subscriber stopped");
                    Err(e)
                }
                (Ok(()), Ok(())) => {
                    info!("Subscriber stopped");
                    Ok(())
                }
            }
        });

        (output_rx, handle)
    }
}
