//! Event mechanics for the retry queue.
//!
//! - `Event` / `EventEnvelope`: what gets published
//! - `EventBus`: best-effort pub/sub that reports whether anyone was listening
//! - `RockProcessed` / `KillTheRock`: the two signals a rock emits

pub mod bus;
pub mod envelope;
pub mod event;
pub mod in_memory_bus;
pub mod rock;

pub use bus::{Delivery, EventBus, Subscription};
pub use envelope::EventEnvelope;
pub use event::Event;
pub use in_memory_bus::{InMemoryBusError, InMemoryEventBus};
pub use rock::{KILL_THE_ROCK, KillTheRock, RockOutcome, RockProcessed};
