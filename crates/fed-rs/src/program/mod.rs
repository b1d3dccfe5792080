//! Versioned program state.
//!
//! A program state is an arbitrary nested [`Value`] persisted under a
//! monotonically increasing version number. Versions are write-once.

mod file_state_manager;
pub mod structure;

use std::path::PathBuf;

use thiserror::Error;

use crate::value::Value;

pub use file_state_manager::{FileProgramStateManager, FileProgramStateManagerConfig};
pub use structure::{flatten, flatten_with_name, pack_sequence_as};

#[derive(Debug, Error)]
pub enum ProgramStateError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("program state structure is not configured; call set_structure before loading")]
    StructureNotConfigured,
    #[error("no program state found for version {version}")]
    VersionNotFound { version: u64 },
    #[error("program state for version {version} already exists")]
    VersionAlreadyExists { version: u64 },
    #[error("program state has {found} leaves but the structure expects {expected}")]
    StructureMismatch { expected: usize, found: usize },
    #[error("state archive error: {0:#}")]
    Archive(anyhow::Error),
    #[error("i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Saves and loads versioned program state.
pub trait ProgramStateManager: Send + Sync {
    /// Saved versions in ascending order, or `None` when nothing was saved.
    fn versions(&self) -> Result<Option<Vec<u64>>, ProgramStateError>;

    fn load(&self, version: u64) -> Result<Value, ProgramStateError>;

    fn save(&self, program_state: &Value, version: u64) -> Result<(), ProgramStateError>;

    fn remove(&self, version: u64) -> Result<(), ProgramStateError>;

    /// Loads the highest saved version together with its number.
    fn load_latest(&self) -> Result<Option<(Value, u64)>, ProgramStateError> {
        let Some(latest) = self.versions()?.and_then(|versions| versions.last().copied()) else {
            return Ok(None);
        };
        let program_state = self.load(latest)?;
        Ok(Some((program_state, latest)))
    }
}
