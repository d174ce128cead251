//! Durable, versioned rock storage.
//!
//! Every write appends a full snapshot of the rock record under the next
//! version; reads see the latest version of each rock (last write wins).

pub mod in_memory;
pub mod postgres;
pub mod query;
pub mod r#trait;

pub use in_memory::InMemoryRockStore;
pub use postgres::PostgresRockStore;
pub use query::RockFilter;
pub use r#trait::{RockStore, RockStoreError, StoredRock};
