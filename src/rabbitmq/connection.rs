// src/rabbitmq/connection.rs
//! Session provider: dials the broker and hands live sessions to the
//! subscription loop, retrying failed dials a bounded number of times.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::broker::{Broker, BrokerChannel, BrokerConnection, Session, SessionOf};
use super::errors::{Result, SubscriberError};
use crate::config::SubscriberConfig;
use crate::handoff::HandoffSender;
use crate::shutdown::sleep_or_cancel;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderState {
    Idle,
    Dialing,
    Ready,
    Retrying,
    Exhausted,
    ShuttingDown,
}

impl fmt::Display for ProviderState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProviderState::Idle => "idle",
            ProviderState::Dialing => "dialing",
            ProviderState::Ready => "ready",
            ProviderState::Retrying => "retrying",
            ProviderState::Exhausted => "exhausted",
            ProviderState::ShuttingDown => "shutting-down",
        };
        f.write_str(name)
    }
}

/// Reconnect attempts since the last successful session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    max_attempts: u32,
    delay: Duration,
}

impl RetryState {
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn delay(&self) -> Duration {
        self.delay
    }

    pub fn exhausted(&self) -> bool {
        self.attempts > self.max_attempts
    }

    fn record_attempt(&mut self) {
        self.attempts += 1;
    }

    fn reset(&mut self) {
        self.attempts = 0;
    }
}

/// The consumer's side of one session request. Resolves once the provider
/// has a session, or fails if the provider stopped first.
pub struct SessionSlot<C: BrokerConnection> {
    rx: oneshot::Receiver<Session<C>>,
}

impl<C: BrokerConnection> SessionSlot<C> {
    pub async fn wait(self, token: &CancellationToken) -> Option<Session<C>> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            session = self.rx => session.ok(),
        }
    }
}

pub struct SessionProvider<B: Broker> {
    broker: Arc<B>,
    config: Arc<SubscriberConfig>,
    retry: RetryState,
    state: ProviderState,
}

impl<B: Broker> SessionProvider<B> {
    pub fn new(broker: Arc<B>, config: Arc<SubscriberConfig>) -> Self {
        let retry = RetryState::new(config.retry.max_attempts, config.retry.delay());
        Self {
            broker,
            config,
            retry,
            state: ProviderState::Idle,
        }
    }

    pub fn attempts(&self) -> u32 {
        self.retry.attempts()
    }

    pub fn state(&self) -> ProviderState {
        self.state
    }

    fn transition(&mut self, next: ProviderState) {
        debug!(from = %self.state, to = %next, attempt = self.retry.attempts(), "Session provider transition");
        self.state = next;
    }

    /// Dials until a session is ready.
    ///
    /// Returns `Ok(None)` when cancelled and `RetriesExhausted` once the
    /// attempt counter passes the configured maximum.
    pub async fn next_session(
        &mut self,
        token: &CancellationToken,
    ) -> Result<Option<SessionOf<B>>> {
        if self.retry.attempts() == 0 {
            self.transition(ProviderState::Dialing);
        } else {
            self.transition(ProviderState::Retrying);
        }

        loop {
            match self.state {
                ProviderState::Retrying => {
                    if self.retry.exhausted() {
                        self.transition(ProviderState::Exhausted);
                        continue;
                    }
                    if token.is_cancelled() {
                        self.transition(ProviderState::ShuttingDown);
                        continue;
                    }

                    info!(
                        attempt = self.retry.attempts(),
                        delay_ms = self.retry.delay().as_millis() as u64,
                        "Waiting to retry"
                    );
                    if sleep_or_cancel(self.retry.delay(), token).await {
                        self.transition(ProviderState::Dialing);
                    } else {
                        self.transition(ProviderState::ShuttingDown);
                    }
                }
                ProviderState::Idle | ProviderState::Dialing | ProviderState::Ready => {
                    self.retry.record_attempt();
                    match self.establish(token).await {
                        Ok(Some(session)) => {
                            self.retry.reset();
                            self.transition(ProviderState::Ready);
                            return Ok(Some(session));
                        }
                        Ok(None) => {
                            info!("Dial abandoned");
                            self.transition(ProviderState::ShuttingDown);
                        }
                        Err(e) => {
                            error!(attempt = self.retry.attempts(), error = %e, "Failed to establish session");
                            self.transition(ProviderState::Retrying);
                        }
                    }
                }
                ProviderState::Exhausted => {
                    error!(attempts = self.retry.attempts(), "Too many retries");
                    return Err(SubscriberError::RetriesExhausted {
                        attempts: self.retry.attempts(),
                    });
                }
                ProviderState::ShuttingDown => {
                    info!("Shutting down session factory");
                    return Ok(None);
                }
            }
        }
    }

    /// Connects, opens a channel and declares the exchange. Cancellation only
    /// abandons the dial itself; a connected session is always returned.
    async fn establish(&self, token: &CancellationToken) -> Result<Option<SessionOf<B>>> {
        info!(uri = %redact(&self.config.uri), "Dialing");
        let connection = tokio::select! {
            biased;
            _ = token.cancelled() => return Ok(None),
            connection = self.broker.connect(&self.config.uri) => connection?,
        };

        debug!("Opening channel");
        let channel = match connection.open_channel().await {
            Ok(channel) => channel,
            Err(e) => {
                let _ = connection.close().await;
                return Err(e);
            }
        };

        info!(
            exchange = %self.config.exchange,
            kind = %self.config.exchange_type,
            "Declaring exchange"
        );
        if let Err(e) = channel
            .declare_exchange(&self.config.exchange, &self.config.exchange_type)
            .await
        {
            let _ = connection.close().await;
            return Err(e);
        }

        Ok(Some(Session::new(connection, channel)))
    }

    /// Serves sessions to the subscription loop until cancelled or exhausted.
    ///
    /// A request slot is only offered once the previous session has been
    /// handed over, so a new session is never dialed while the consumer is
    /// still draining the last one.
    pub async fn run(
        mut self,
        offers: HandoffSender<SessionSlot<B::Connection>>,
        token: CancellationToken,
    ) -> Result<()> {
        loop {
            self.transition(ProviderState::Idle);
            let (session_tx, session_rx) = oneshot::channel();
            if offers
                .send(SessionSlot { rx: session_rx }, &token)
                .await
                .is_err()
            {
                self.transition(ProviderState::ShuttingDown);
                info!("Shutting down session factory");
                return Ok(());
            }

            let session = match self.next_session(&token).await? {
                Some(session) => session,
                None => return Ok(()),
            };

            if token.is_cancelled() {
                info!("Shutting down new session");
                session.close().await;
                return Ok(());
            }

            if let Err(session) = session_tx.send(session) {
                warn!("Subscription loop went away, discarding session");
                session.close().await;
                self.transition(ProviderState::ShuttingDown);
                return Ok(());
            }
        }
    }
}

/// Hides the password part of an AMQP URI for logging.
pub(crate) fn redact(uri: &str) -> String {
    let Some(scheme_end) = uri.find("://") else {
        return uri.to_string();
    };
    let rest = &uri[scheme_end + 3..];
    let authority_end = rest.find('/').unwrap_or(rest.len());
    match rest[..authority_end].rfind('@') {
        Some(at) => {
            let userinfo = &rest[..at];
            let user = userinfo.split(':').next().unwrap_or_default();
            format!("{}://{}:***{}", &uri[..scheme_end], user, &rest[at..])
        }
        None => uri.to_string(),
    }
}
