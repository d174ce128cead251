use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use blackrock_core::{AggregateRoot, ExpectedVersion, RockId, RockRecord};

use super::query::RockFilter;

/// A persisted snapshot of a rock record.
///
/// `version` is monotonically increasing per rock (1, 2, 3, ...) and the
/// record inside carries the same version.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRock {
    pub record: RockRecord,
    pub version: u64,
    pub stored_at: DateTime<Utc>,
}

impl StoredRock {
    pub fn new(record: RockRecord, version: u64, stored_at: DateTime<Utc>) -> Self {
        Self {
            record: record.at_version(version),
            version,
            stored_at,
        }
    }

    pub fn id(&self) -> &RockId {
        self.record.id()
    }

    pub fn into_record(self) -> RockRecord {
        self.record
    }
}

/// Rock store operation error.
///
/// Infrastructure errors only. None of these are retried by the store
/// itself; they propagate to whoever triggered the write.
#[derive(Debug, Error)]
pub enum RockStoreError {
    #[error("optimistic concurrency check failed: {0}")]
    Concurrency(String),

    #[error("record serialization failed: {0}")]
    Serialization(String),

    #[error("storage error: {0}")]
    Storage(String),
}

/// Append-only, versioned rock store.
///
/// ## Append semantics
///
/// `append()` checks `expected_version` against the latest stored version,
/// writes the full record under `latest + 1` and returns the stored snapshot.
///
/// ## Read semantics
///
/// Reads resolve each rock to its latest version. `query()` applies a
/// `RockFilter` to those latest versions only, so a rock whose older
/// snapshot was pending but whose latest one is processed never matches a
/// "pending" filter.
#[async_trait]
pub trait RockStore: Send + Sync {
    /// Append a new version of the record.
    async fn append(
        &self,
        record: &RockRecord,
        expected_version: ExpectedVersion,
    ) -> Result<StoredRock, RockStoreError>;

    /// Latest version of a rock, if it was ever persisted.
    async fn load_latest(&self, id: &RockId) -> Result<Option<StoredRock>, RockStoreError>;

    /// Every stored version of a rock, oldest first.
    async fn load_history(&self, id: &RockId) -> Result<Vec<StoredRock>, RockStoreError>;

    /// Latest versions matching `filter`, ordered by rock id.
    async fn query(&self, filter: &RockFilter) -> Result<Vec<StoredRock>, RockStoreError>;

    /// Identities the recovery sweep must reactivate.
    async fn pending_ids(&self) -> Result<Vec<RockId>, RockStoreError> {
        let rocks = self.query(&RockFilter::recoverable()).await?;
        Ok(rocks.into_iter().map(|r| r.id().clone()).collect())
    }
}

#[async_trait]
impl<S> RockStore for Arc<S>
where
    S: RockStore + ?Sized,
{
    async fn append(
        &self,
        record: &RockRecord,
        expected_version: ExpectedVersion,
    ) -> Result<StoredRock, RockStoreError> {
        (**self).append(record, expected_version).await
    }

    async fn load_latest(&self, id: &RockId) -> Result<Option<StoredRock>, RockStoreError> {
        (**self).load_latest(id).await
    }

    async fn load_history(&self, id: &RockId) -> Result<Vec<StoredRock>, RockStoreError> {
        (**self).load_history(id).await
    }

    async fn query(&self, filter: &RockFilter) -> Result<Vec<StoredRock>, RockStoreError> {
        (**self).query(filter).await
    }

    async fn pending_ids(&self) -> Result<Vec<RockId>, RockStoreError> {
        (**self).pending_ids().await
    }
}
