//! CLI command implementations.

pub mod approve;
pub mod inspect;
pub mod propose;
pub mod serve;
pub mod token;

use fleetgate_core::{Database, StoreConfig};
use std::path::Path;

/// Result type shared by every command.
pub type CommandResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

/// Opens an existing or new file store.
pub fn open_store(path: &Path) -> CommandResult<Database> {
    Ok(Database::open(StoreConfig::file(path))?)
}
