//! Rendezvous hand-off between two tasks.
//!
//! `send` completes only once the receiving side has taken the value, so the
//! channel never holds an accepted-but-unread item. A value whose sender gave
//! up (cancelled or dropped the wait) before the receiver got to it is
//! discarded by the receiver instead of being delivered late.

use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum HandoffError {
    #[error("hand-off cancelled")]
    Cancelled,

    #[error("receiving side closed")]
    Closed,
}

type Offer<T> = (T, oneshot::Sender<()>);

pub struct HandoffSender<T> {
    tx: mpsc::Sender<Offer<T>>,
}

pub struct HandoffReceiver<T> {
    rx: mpsc::Receiver<Offer<T>>,
}

pub fn rendezvous<T>() -> (HandoffSender<T>, HandoffReceiver<T>) {
    let (tx, rx) = mpsc::channel(1);
    (HandoffSender { tx }, HandoffReceiver { rx })
}

impl<T> HandoffSender<T> {
    /// Blocks until the receiver takes `value`, racing `token`.
    pub async fn send(&self, value: T, token: &CancellationToken) -> Result<(), HandoffError> {
        let (taken_tx, taken_rx) = oneshot::channel();

        tokio::select! {
            biased;
            _ = token.cancelled() => return Err(HandoffError::Cancelled),
            sent = self.tx.send((value, taken_tx)) => {
                sent.map_err(|_| HandoffError::Closed)?;
            }
        }

        // a value already taken counts as handed off even if cancellation raced it
        tokio::select! {
            biased;
            taken = taken_rx => taken.map_err(|_| HandoffError::Closed),
            _ = token.cancelled() => Err(HandoffError::Cancelled),
        }
    }
}

impl<T> HandoffReceiver<T> {
    /// Next value whose sender is still waiting; `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<T> {
        while let Some((value, taken)) = self.rx.recv().await {
            if taken.send(()).is_ok() {
                return Some(value);
            }
        }
        None
    }

    /// Like [`recv`](Self::recv) but gives up when `token` fires.
    pub async fn recv_or_cancel(&mut self, token: &CancellationToken) -> Option<T> {
        tokio::select! {
            biased;
            _ = token.cancelled() => None,
            value = self.recv() => value,
        }
    }
}
