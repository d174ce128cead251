//! Infrastructure-backed buses for `RockProcessed` notifications.
//!
//! The bus abstraction lives in `blackrock-events`; in-process queues use its
//! `InMemoryEventBus`. This module adds transports that reach other processes.

#[cfg(feature = "redis")]
pub mod redis_pubsub;

#[cfg(feature = "redis")]
pub use redis_pubsub::{RedisBusError, RedisPubSubNotificationBus};
