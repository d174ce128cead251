use std::collections::BTreeMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use blackrock_core::{AggregateRoot, ExpectedVersion, RockId, RockRecord};

use super::query::RockFilter;
use super::r#trait::{RockStore, RockStoreError, StoredRock};

/// In-memory append-only rock store.
///
/// Intended for tests/dev. Keeps every version; reads resolve to the last one.
#[derive(Debug, Default)]
pub struct InMemoryRockStore {
    rocks: RwLock<BTreeMap<RockId, Vec<StoredRock>>>,
}

impl InMemoryRockStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(history: &[StoredRock]) -> u64 {
        history.last().map(|r| r.version).unwrap_or(0)
    }
}

#[async_trait]
impl RockStore for InMemoryRockStore {
    async fn append(
        &self,
        record: &RockRecord,
        expected_version: ExpectedVersion,
    ) -> Result<StoredRock, RockStoreError> {
        let mut rocks = self
            .rocks
            .write()
            .map_err(|_| RockStoreError::Storage("lock poisoned".to_string()))?;

        let history = rocks.entry(record.id().clone()).or_default();
        let current = Self::current_version(history);

        expected_version
            .check(current)
            .map_err(|conflict| RockStoreError::Concurrency(format!("{}: {conflict}", record.id())))?;

        let stored = StoredRock::new(record.clone(), current + 1, Utc::now());
        history.push(stored.clone());
        Ok(stored)
    }

    async fn load_latest(&self, id: &RockId) -> Result<Option<StoredRock>, RockStoreError> {
        let rocks = self
            .rocks
            .read()
            .map_err(|_| RockStoreError::Storage("lock poisoned".to_string()))?;

        Ok(rocks.get(id).and_then(|history| history.last().cloned()))
    }

    async fn load_history(&self, id: &RockId) -> Result<Vec<StoredRock>, RockStoreError> {
        let rocks = self
            .rocks
            .read()
            .map_err(|_| RockStoreError::Storage("lock poisoned".to_string()))?;

        Ok(rocks.get(id).cloned().unwrap_or_default())
    }

    async fn query(&self, filter: &RockFilter) -> Result<Vec<StoredRock>, RockStoreError> {
        let rocks = self
            .rocks
            .read()
            .map_err(|_| RockStoreError::Storage("lock poisoned".to_string()))?;

        Ok(rocks
            .values()
            .filter_map(|history| history.last())
            .filter(|latest| filter.matches(&latest.record))
            .cloned()
            .collect())
    }
}
