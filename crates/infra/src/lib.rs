//! Runtime layer of the retry queue: storage, command execution, the
//! launcher, rock actors and the queue facade.

pub mod blackrock;
pub mod command;
pub mod config;
pub mod error;
pub mod launcher;
pub mod notification_bus;
pub mod rock;
pub mod rock_store;

#[cfg(test)]
mod integration_tests;

pub use blackrock::{Blackrock, Hurl};
pub use command::{CommandError, CommandExecutor, CommandHandler, CommandRegistry};
pub use config::BlackrockConfig;
pub use error::RockError;
pub use launcher::{LaunchOptions, Launcher, LauncherSignal};
pub use rock::Rock;
pub use rock_store::{InMemoryRockStore, PostgresRockStore, RockFilter, RockStore, RockStoreError, StoredRock};
