//! JSON-file checkpoints: `{prefix}_{step}.json` in one directory.

use super::CheckpointStore;
use crate::error::StorageError;
use crate::story::StoryBeam;
use std::path::PathBuf;
use tracing::debug;

pub struct FileCheckpointStore {
    directory: PathBuf,
    prefix: String,
}

impl FileCheckpointStore {
    pub fn new(directory: impl Into<PathBuf>, prefix: &str) -> Self {
        Self {
            directory: directory.into(),
            prefix: prefix.to_string(),
        }
    }

    pub fn path_for(&self, step: usize) -> PathBuf {
        self.directory.join(format!("{}_{}.json", self.prefix, step))
    }

    fn parse_step(&self, file_name: &str) -> Option<usize> {
        file_name
            .strip_prefix(&self.prefix)?
            .strip_prefix('_')?
            .strip_suffix(".json")?
            .parse()
            .ok()
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, step: usize, beam: &StoryBeam) -> Result<(), StorageError> {
        std::fs::create_dir_all(&self.directory)?;
        let path = self.path_for(step);
        let temp = path.with_extension("json.tmp");
        std::fs::write(&temp, serde_json::to_vec(beam)?)?;
        std::fs::rename(&temp, &path)?;
        debug!(path = %path.display(), "Saved checkpoint");
        Ok(())
    }

    fn load(&self, step: usize) -> Result<Option<StoryBeam>, StorageError> {
        let path = self.path_for(step);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, step: usize) -> Result<(), StorageError> {
        match std::fs::remove_file(self.path_for(step)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn steps(&self) -> Result<Vec<usize>, StorageError> {
        let entries = match std::fs::read_dir(&self.directory) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut steps = Vec::new();
        for entry in entries {
            let entry = entry?;
            if let Some(step) = entry.file_name().to_str().and_then(|n| self.parse_step(n)) {
                steps.push(step);
            }
        }
        steps.sort_unstable();
        Ok(steps)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn ignores_unrelated_files() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), "beam");
        for name in ["beam_3.json", "beam_x.json", "other_4.json", "beam_5.json.tmp", "beam_12.json"] {
            std::fs::write(dir.path().join(name), "[]").unwrap();
        }
        assert_eq!(store.steps().unwrap(), vec![3, 12]);
    }

    #[test]
    fn corrupt_latest_falls_back_to_earlier_step() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path(), "beam");
        store.save(1, &StoryBeam::new(Vec::new()).unwrap()).unwrap();
        std::fs::write(store.path_for(2), "not json").unwrap();
        let (step, beam) = store.latest().unwrap().unwrap();
        assert_eq!(step, 1);
        assert!(beam.is_empty());
    }

    #[test]
    fn missing_directory_has_no_steps() {
        let dir = TempDir::new().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("absent"), "beam");
        assert!(store.steps().unwrap().is_empty());
        assert!(store.load(0).unwrap().is_none());
    }
}
