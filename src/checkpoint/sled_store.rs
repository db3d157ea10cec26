//! Sled-backed checkpoints, one tree per prefix, keyed by big-endian step.

use super::CheckpointStore;
use crate::error::StorageError;
use crate::story::StoryBeam;
use std::path::Path;

pub struct SledCheckpointStore {
    db: sled::Db,
    tree: sled::Tree,
}

impl SledCheckpointStore {
    pub fn open<P: AsRef<Path>>(path: P, prefix: &str) -> Result<Self, StorageError> {
        let db = sled::open(path)?;
        let tree = db.open_tree(prefix)?;
        Ok(Self { db, tree })
    }

    pub fn db(&self) -> &sled::Db {
        &self.db
    }
}

fn key(step: usize) -> [u8; 8] {
    (step as u64).to_be_bytes()
}

impl CheckpointStore for SledCheckpointStore {
    fn save(&self, step: usize, beam: &StoryBeam) -> Result<(), StorageError> {
        self.tree.insert(key(step), serde_json::to_vec(beam)?)?;
        self.tree.flush()?;
        Ok(())
    }

    fn load(&self, step: usize) -> Result<Option<StoryBeam>, StorageError> {
        match self.tree.get(key(step))? {
            Some(raw) => Ok(Some(serde_json::from_slice(&raw)?)),
            None => Ok(None),
        }
    }

    fn delete(&self, step: usize) -> Result<(), StorageError> {
        self.tree.remove(key(step))?;
        Ok(())
    }

    fn steps(&self) -> Result<Vec<usize>, StorageError> {
        let mut steps = Vec::new();
        for key in self.tree.iter().keys() {
            let key = key?;
            let bytes: [u8; 8] = key.as_ref().try_into().map_err(|_| {
                StorageError::Database(format!("malformed checkpoint key of {} bytes", key.len()))
            })?;
            steps.push(u64::from_be_bytes(bytes) as usize);
        }
        Ok(steps)
    }
}
