//! Postgres-backed rock store.
//!
//! Each write inserts one row into `rocks` holding the full record snapshot
//! as JSONB plus a few projected columns (`processed`, `status`,
//! `retries_remaining`, `action_name`) that the recovery scan filters on.
//!
//! ## Error Mapping
//!
//! | SQLx Error | PostgreSQL Error Code | RockStoreError | Scenario |
//! |------------|----------------------|----------------|----------|
//! | Database (unique violation) | `23505` | `Concurrency` | Another writer took the same `(id, version)` |
//! | Database (check constraint violation) | `23514` | `Storage` | Invalid data (e.g. version <= 0) |
//! | Database (other) | Any other | `Storage` | Other database errors |
//! | PoolClosed | N/A | `Storage` | Connection pool was closed |
//! | Other | N/A | `Storage` | Network errors, connection failures, etc. |
//!
//! Row payloads that no longer deserialize into a `RockRecord` surface as
//! `Serialization`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{PgPool, Postgres, Row, Transaction};
use tracing::{instrument, Span};

use blackrock_core::{AggregateRoot, ExpectedVersion, RetryBudget, RockId, RockRecord};

use super::query::RockFilter;
use super::r#trait::{RockStore, RockStoreError, StoredRock};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS rocks (
    id TEXT NOT NULL,
    version BIGINT NOT NULL CHECK (version > 0),
    processed BOOLEAN NOT NULL,
    status TEXT NOT NULL,
    retries_remaining BIGINT NULL,
    action_name TEXT NULL,
    record JSONB NOT NULL,
    stored_at TIMESTAMPTZ NOT NULL DEFAULT now(),
    PRIMARY KEY (id, version)
);
CREATE INDEX IF NOT EXISTS rocks_pending_idx ON rocks (processed, status);
"#;

/// Postgres-backed append-only rock store.
///
/// ## Optimistic Concurrency
///
/// `append()` runs in a transaction that:
/// 1. Reads the current version (`MAX(version)`)
/// 2. Validates it against `expected_version`
/// 3. Inserts the snapshot under `current + 1`
///
/// A concurrent writer that commits between 1 and 3 trips the primary key
/// and the append fails with `RockStoreError::Concurrency`.
#[derive(Debug, Clone)]
pub struct PostgresRockStore {
    pool: Arc<PgPool>,
}

impl PostgresRockStore {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool: Arc::new(pool),
        }
    }

    /// Create the `rocks` table and its index if they are missing.
    #[instrument(skip(self), err)]
    pub async fn ensure_schema(&self) -> Result<(), RockStoreError> {
        sqlx::raw_sql(SCHEMA)
            .execute(&*self.pool)
            .await
            .map_err(|e| map_sqlx_error("ensure_schema", e))?;
        Ok(())
    }
}

#[async_trait]
impl RockStore for PostgresRockStore {
    #[instrument(
        skip(self, record),
        fields(
            rock_id = %record.id(),
            expected_version = ?expected_version,
            committed_version = tracing::field::Empty
        ),
        err
    )]
    async fn append(
        &self,
        record: &RockRecord,
        expected_version: ExpectedVersion,
    ) -> Result<StoredRock, RockStoreError> {
        let payload = serde_json::to_value(record)
            .map_err(|e| RockStoreError::Serialization(e.to_string()))?;

        let mut tx = self
            .pool
            .begin()
            .await
            .map_err(|e| map_sqlx_error("begin_transaction", e))?;

        let current_version = check_rock_version(&mut tx, record.id()).await?;

        if let Err(conflict) = expected_version.check(current_version) {
            tx.rollback()
                .await
                .map_err(|e| map_sqlx_error("rollback", e))?;
            return Err(RockStoreError::Concurrency(format!("{}: {conflict}", record.id())));
        }

        let next_version = current_version + 1;
        let row = sqlx::query(
            r#"
            INSERT INTO rocks (
                id,
                version,
                processed,
                status,
                retries_remaining,
                action_name,
                record
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING stored_at
            "#,
        )
        .bind(record.id().to_string())
        .bind(next_version as i64)
        .bind(record.processed())
        .bind(record.status().as_str())
        .bind(retries_column(record.retries()))
        .bind(record.action().map(|a| a.name.clone()))
        .bind(&payload)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                RockStoreError::Concurrency(format!(
                    "concurrent append detected: {} version {} already exists",
                    record.id(),
                    next_version
                ))
            } else {
                map_sqlx_error("insert_rock", e)
            }
        })?;

        let stored_at: DateTime<Utc> = row
            .try_get("stored_at")
            .map_err(|e| map_sqlx_error("read_stored_at", e))?;

        tx.commit()
            .await
            .map_err(|e| map_sqlx_error("commit_transaction", e))?;

        Span::current().record("committed_version", next_version);
        Ok(StoredRock::new(record.clone(), next_version, stored_at))
    }

    #[instrument(skip(self), fields(rock_id = %id), err)]
    async fn load_latest(&self, id: &RockId) -> Result<Option<StoredRock>, RockStoreError> {
        let row = sqlx::query(
            r#"
            SELECT id, version, record, stored_at
            FROM rocks
            WHERE id = $1
            ORDER BY version DESC
            LIMIT 1
            "#,
        )
        .bind(id.to_string())
        .fetch_optional(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_latest", e))?;

        row.map(|r| RockRow::from_pg_row(&r)?.into_stored())
            .transpose()
    }

    #[instrument(skip(self), fields(rock_id = %id), err)]
    async fn load_history(&self, id: &RockId) -> Result<Vec<StoredRock>, RockStoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, version, record, stored_at
            FROM rocks
            WHERE id = $1
            ORDER BY version ASC
            "#,
        )
        .bind(id.to_string())
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("load_history", e))?;

        rows.iter()
            .map(|r| RockRow::from_pg_row(r)?.into_stored())
            .collect()
    }

    #[instrument(skip(self), fields(rock_count = tracing::field::Empty), err)]
    async fn query(&self, filter: &RockFilter) -> Result<Vec<StoredRock>, RockStoreError> {
        // Filters apply to the latest version of each rock only.
        let rows = sqlx::query(
            r#"
            SELECT id, version, record, stored_at
            FROM (
                SELECT DISTINCT ON (id)
                    id, version, processed, status, retries_remaining, action_name, record, stored_at
                FROM rocks
                ORDER BY id, version DESC
            ) latest
            WHERE ($1::BOOLEAN IS NULL OR processed = $1)
              AND ($2::TEXT IS NULL OR status = $2)
              AND (NOT $3 OR retries_remaining IS NULL OR retries_remaining > 0)
              AND (NOT $4 OR action_name IS NOT NULL)
            ORDER BY id
            "#,
        )
        .bind(filter.processed)
        .bind(filter.status.map(|s| s.as_str()))
        .bind(filter.exclude_exhausted)
        .bind(filter.require_action)
        .fetch_all(&*self.pool)
        .await
        .map_err(|e| map_sqlx_error("query", e))?;

        let stored = rows
            .iter()
            .map(|r| RockRow::from_pg_row(r)?.into_stored())
            .collect::<Result<Vec<_>, _>>()?;

        Span::current().record("rock_count", stored.len());
        Ok(stored)
    }
}

/// Current version of a rock inside an open transaction (0 if never stored).
async fn check_rock_version(
    tx: &mut Transaction<'_, Postgres>,
    id: &RockId,
) -> Result<u64, RockStoreError> {
    let row = sqlx::query(
        r#"
        SELECT COALESCE(MAX(version), 0) AS current_version
        FROM rocks
        WHERE id = $1
        "#,
    )
    .bind(id.to_string())
    .fetch_one(&mut **tx)
    .await
    .map_err(|e| map_sqlx_error("check_rock_version", e))?;

    let current: Option<i64> = row
        .try_get("current_version")
        .map_err(|e| map_sqlx_error("read_current_version", e))?;

    Ok(current.unwrap_or(0) as u64)
}

/// Map SQLx errors to RockStoreError.
fn map_sqlx_error(operation: &str, err: sqlx::Error) -> RockStoreError {
    match err {
        sqlx::Error::Database(db_err) => {
            let msg = format!("database error in {}: {}", operation, db_err.message());
            match db_err.code().as_deref() {
                Some("23505") => RockStoreError::Concurrency(msg),
                _ => RockStoreError::Storage(msg),
            }
        }
        sqlx::Error::PoolClosed => {
            RockStoreError::Storage(format!("connection pool closed in {}", operation))
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            RockStoreError::Serialization(format!("decode error in {}: {}", operation, err))
        }
        _ => RockStoreError::Storage(format!("sqlx error in {}: {}", operation, err)),
    }
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    if let sqlx::Error::Database(db_err) = err {
        if let Some(code) = db_err.code() {
            return code.as_ref() == "23505";
        }
    }
    false
}

/// `retries_remaining` column value; `NULL` means unlimited.
fn retries_column(retries: RetryBudget) -> Option<i64> {
    retries.as_option().map(i64::from)
}

// SQLx row types

#[derive(Debug)]
struct RockRow {
    id: String,
    version: i64,
    record: serde_json::Value,
    stored_at: DateTime<Utc>,
}

impl RockRow {
    fn from_pg_row(row: &sqlx::postgres::PgRow) -> Result<Self, RockStoreError> {
        let read = |e: sqlx::Error| map_sqlx_error("read_rock_row", e);
        Ok(RockRow {
            id: row.try_get("id").map_err(read)?,
            version: row.try_get("version").map_err(read)?,
            record: row.try_get("record").map_err(read)?,
            stored_at: row.try_get("stored_at").map_err(read)?,
        })
    }

    fn into_stored(self) -> Result<StoredRock, RockStoreError> {
        let record: RockRecord = serde_json::from_value(self.record).map_err(|e| {
            RockStoreError::Serialization(format!("rock {} version {}: {}", self.id, self.version, e))
        })?;
        Ok(StoredRock::new(record, self.version as u64, self.stored_at))
    }
}
