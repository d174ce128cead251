//! Errors surfaced by rock actors and the queue facade.

use thiserror::Error;

use blackrock_core::{DomainError, RockId};

use crate::rock_store::RockStoreError;

/// Failure of a rock or queue operation.
///
/// Action failures never show up here; they are reported through
/// `RockProcessed` notifications instead.
#[derive(Debug, Error)]
pub enum RockError {
    #[error(transparent)]
    Store(#[from] RockStoreError),

    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The actor was retired while the call was waiting for it.
    /// The facade resolves a fresh actor and tries again.
    #[error("rock {0} was retired")]
    Retired(RockId),
}
