//! Event publishing/subscription abstraction (mechanics only).
//!
//! The bus is **best-effort**: it distributes notifications to whoever is
//! listening right now and reports how many receivers it reached. It stores
//! nothing; the rock store is the source of truth.
//!
//! "Undeliverable" is not an error. A publish that reached zero receivers
//! returns `Ok(Delivery::undeliverable())` and the caller decides whether that
//! deserves a warning.

use std::sync::Arc;

use tokio::sync::mpsc::UnboundedReceiver;
use tokio::sync::mpsc::error::TryRecvError;

/// How many receivers a publish reached.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Delivery {
    receivers: usize,
}

impl Delivery {
    pub fn to(receivers: usize) -> Self {
        Self { receivers }
    }

    pub fn undeliverable() -> Self {
        Self { receivers: 0 }
    }

    pub fn receivers(&self) -> usize {
        self.receivers
    }

    pub fn is_delivered(&self) -> bool {
        self.receivers > 0
    }
}

/// A subscription to a bus.
///
/// Each subscription gets its own copy of every message published after it
/// was created (broadcast semantics). Dropping the subscription unsubscribes.
#[derive(Debug)]
pub struct Subscription<M> {
    receiver: UnboundedReceiver<M>,
}

impl<M> Subscription<M> {
    pub fn new(receiver: UnboundedReceiver<M>) -> Self {
        Self { receiver }
    }

    /// Wait for the next message. `None` once the bus is gone.
    pub async fn recv(&mut self) -> Option<M> {
        self.receiver.recv().await
    }

    /// Try to receive a message without waiting.
    pub fn try_recv(&mut self) -> Result<M, TryRecvError> {
        self.receiver.try_recv()
    }
}

/// Transport-agnostic pub/sub bus.
///
/// `publish` must not block on consumers. Implementations must be safe to
/// share across tasks (`Send + Sync`).
pub trait EventBus<M>: Send + Sync {
    type Error: core::fmt::Debug + core::fmt::Display + Send + Sync + 'static;

    fn publish(&self, message: M) -> Result<Delivery, Self::Error>;

    fn subscribe(&self) -> Subscription<M>;
}

impl<M, B> EventBus<M> for Arc<B>
where
    B: EventBus<M> + ?Sized,
{
    type Error = B::Error;

    fn publish(&self, message: M) -> Result<Delivery, Self::Error> {
        (**self).publish(message)
    }

    fn subscribe(&self) -> Subscription<M> {
        (**self).subscribe()
    }
}
