// src/rabbitmq/consumer.rs

use std::sync::Arc;

use futures::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::broker::{BrokerChannel, BrokerConnection, Delivery, Session};
use super::connection::SessionSlot;
use super::errors::{Result, SubscriberError};
use crate::config::{SetupFailurePolicy, SubscriberConfig};
use crate::handoff::{HandoffError, HandoffReceiver, HandoffSender};
use crate::shutdown::sleep_or_cancel;

/// Why consumption of one session stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEnd {
    /// The broker side went away; ask for another session.
    Closed,
    /// Cancelled, or nobody is reading the output stream any more.
    Shutdown,
}

/// Turns sessions into an acknowledged stream of deliveries.
pub struct SubscriptionLoop {
    config: Arc<SubscriberConfig>,
    output: HandoffSender<Delivery>,
    token: CancellationToken,
}

impl SubscriptionLoop {
    pub fn new(
        config: Arc<SubscriberConfig>,
        output: HandoffSender<Delivery>,
        token: CancellationToken,
    ) -> Self {
        Self {
            config,
            output,
            token,
        }
    }

    /// Requests sessions one at a time and consumes each until it dies.
    ///
    /// Returns when cancelled, when the provider stops handing out sessions,
    /// or with `SetupError` if queue setup fails under the terminate policy.
    pub async fn run<C: BrokerConnection>(
        &self,
        mut offers: HandoffReceiver<SessionSlot<C>>,
    ) -> Result<()> {
        let mut setup_failures: u32 = 0;

        loop {
            let Some(slot) = offers.recv_or_cancel(&self.token).await else {
                info!("No more sessions, stopping subscription");
                return Ok(());
            };
            let Some(session) = slot.wait(&self.token).await else {
                info!("Session request withdrawn, stopping subscription");
                return Ok(());
            };

            let outcome = self.consume_session(&session).await;
            session.close().await;

            match outcome {
                Ok(SessionEnd::Closed) => {
                    setup_failures = 0;
                    warn!("Delivery stream closed, requesting a new session");
                }
                Ok(SessionEnd::Shutdown) => {
                    info!("Subscription shutting down");
                    return Ok(());
                }
                Err(e @ SubscriberError::SetupError(_)) => {
                    error!(error = %e, "Subscription setup failed");
                    match self.config.setup_failure {
                        SetupFailurePolicy::Terminate => return Err(e),
                        SetupFailurePolicy::Retry => {
                            setup_failures += 1;
                            if setup_failures > self.config.retry.max_attempts {
                                return Err(SubscriberError::RetriesExhausted {
                                    attempts: setup_failures,
                                });
                            }
                            info!(attempt = setup_failures, "Retrying subscription setup with a new session");
                            if !sleep_or_cancel(self.config.retry.delay(), &self.token).await {
                                return Ok(());
                            }
                        }
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Session failed, requesting a new session");
                }
            }
        }
    }

    /// Declares and binds the queue, then forwards and acknowledges
    /// deliveries until the session ends.
    pub async fn consume_session<C: BrokerConnection>(
        &self,
        session: &Session<C>,
    ) -> Result<SessionEnd> {
        let channel = &session.channel;

        info!(queue = %self.config.queue, "Declaring queue");
        channel
            .declare_queue(&self.config.queue)
            .await
            .map_err(setup_error("declare queue"))?;

        info!(
            queue = %self.config.queue,
            key = %self.config.routing_key,
            exchange = %self.config.exchange,
            "Binding queue"
        );
        channel
            .bind_queue(&self.config.queue, &self.config.exchange, &self.config.routing_key)
            .await
            .map_err(setup_error("bind queue"))?;

        info!(queue = %self.config.queue, ctag = %self.config.consumer_tag, "Consuming");
        let mut deliveries = channel
            .consume(&self.config.queue, &self.config.consumer_tag)
            .await
            .map_err(setup_error("start consumer"))?;

        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => return Ok(SessionEnd::Shutdown),
                next = deliveries.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    warn!(error = %e, "Error receiving delivery");
                    return Ok(SessionEnd::Closed);
                }
                None => return Ok(SessionEnd::Closed),
            };

            let delivery_tag = delivery.delivery_tag;
            if delivery.body.is_empty() {
                warn!(delivery_tag, "Skipping delivery with empty body");
            } else {
                match self.output.send(delivery, &self.token).await {
                    Ok(()) => {}
                    Err(HandoffError::Cancelled) => return Ok(SessionEnd::Shutdown),
                    Err(HandoffError::Closed) => {
                        warn!("Output stream closed, stopping subscription");
                        return Ok(SessionEnd::Shutdown);
                    }
                }
            }

            if let Err(e) = channel.ack(delivery_tag).await {
                warn!(delivery_tag, error = %e, "Failed to acknowledge delivery");
                return Ok(SessionEnd::Closed);
            }
        }
    }
}

/// Any failure before the first delivery falls under the setup-failure policy,
/// whatever the broker reported.
fn setup_error(step: &'static str) -> impl Fn(SubscriberError) -> SubscriberError {
    move |e| match e {
        SubscriberError::SetupError(_) => e,
        other => SubscriberError::SetupError(format!("Failed to {}: {}", step, other)),
    }
}
