//! Beam Checkpoints
//!
//! Durable snapshots of the story beam keyed by render step. The renderer
//! writes one per completed step and resumes from the highest readable one.

pub mod file;
pub mod sled_store;

pub use file::FileCheckpointStore;
pub use sled_store::SledCheckpointStore;

use crate::config::{CheckpointBackend, CheckpointConfig, PathsConfig};
use crate::error::StorageError;
use crate::story::StoryBeam;
use std::path::Path;
use tracing::warn;

/// Storage for serialized beams, one entry per step index.
pub trait CheckpointStore: Send + Sync {
    fn save(&self, step: usize, beam: &StoryBeam) -> Result<(), StorageError>;

    fn load(&self, step: usize) -> Result<Option<StoryBeam>, StorageError>;

    /// Removing a missing entry is not an error.
    fn delete(&self, step: usize) -> Result<(), StorageError>;

    /// Stored step indices, ascending.
    fn steps(&self) -> Result<Vec<usize>, StorageError>;

    /// The highest step that can be read back. Unreadable entries are
    /// skipped with a warning.
    fn latest(&self) -> Result<Option<(usize, StoryBeam)>, StorageError> {
        for step in self.steps()?.into_iter().rev() {
            match self.load(step) {
                Ok(Some(beam)) => return Ok(Some((step, beam))),
                Ok(None) => continue,
                Err(e) => warn!(step, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        Ok(None)
    }
}

/// Open the store selected by `config`, relative to `workspace_root`.
pub fn open_store(
    config: &CheckpointConfig,
    workspace_root: &Path,
) -> Result<Box<dyn CheckpointStore>, StorageError> {
    let directory = PathsConfig::resolve(workspace_root, &config.directory);
    Ok(match config.backend {
        CheckpointBackend::File => Box::new(FileCheckpointStore::new(directory, &config.prefix)),
        CheckpointBackend::Sled => Box::new(SledCheckpointStore::open(directory, &config.prefix)?),
    })
}
