//! `blackrock-core`: domain building blocks for the retry queue.
//!
//! This crate contains **pure domain** primitives (no IO, no runtime): rock
//! identities, the durable rock record and its transitions, and retry budgets.

pub mod aggregate;
pub mod budget;
pub mod error;
pub mod id;
pub mod record;

pub use aggregate::{AggregateRoot, ExpectedVersion};
pub use budget::RetryBudget;
pub use error::{DomainError, DomainResult};
pub use id::RockId;
pub use record::{RockAction, RockRecord, RockStatus};
