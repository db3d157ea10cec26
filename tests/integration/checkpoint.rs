//! Integration tests for checkpoint backends selected through configuration

use storyloom::checkpoint::{open_store, CheckpointStore};
use storyloom::config::{CheckpointBackend, CheckpointConfig};
use storyloom::plan::NodeId;
use storyloom::story::{Passage, PassageList, Story, StoryBeam};
use tempfile::TempDir;

fn beam(texts: &[&str]) -> StoryBeam {
    let stories = texts
        .iter()
        .map(|text| {
            Story::new()
                .copy_append_list(PassageList::new(NodeId::from("node-1")))
                .copy_append_passage(Passage::new(*text))
                .unwrap()
        })
        .collect();
    StoryBeam::new(stories).unwrap()
}

fn config(backend: CheckpointBackend) -> CheckpointConfig {
    CheckpointConfig {
        backend,
        directory: "checkpoints".into(),
        prefix: "run".to_string(),
        ..CheckpointConfig::default()
    }
}

fn round_trip(backend: CheckpointBackend) {
    let dir = TempDir::new().unwrap();
    {
        let store = open_store(&config(backend), dir.path()).unwrap();
        store.save(0, &beam(&[" One."])).unwrap();
        store.save(1, &beam(&[" Two.", " Deux."])).unwrap();
        store.delete(0).unwrap();
        store.delete(0).unwrap();
    }
    // A second handle sees what the first one wrote.
    let store = open_store(&config(backend), dir.path()).unwrap();
    assert_eq!(store.steps().unwrap(), vec![1]);
    let (step, latest) = store.latest().unwrap().unwrap();
    assert_eq!(step, 1);
    assert_eq!(latest, beam(&[" Two.", " Deux."]));
    assert!(dir.path().join("checkpoints").exists());
}

#[test]
fn file_backend_round_trip() {
    round_trip(CheckpointBackend::File);
}

#[test]
fn sled_backend_round_trip() {
    round_trip(CheckpointBackend::Sled);
}

#[test]
fn file_names_carry_prefix_and_step() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&config(CheckpointBackend::File), dir.path()).unwrap();
    store.save(4, &beam(&[" Four."])).unwrap();
    assert!(dir.path().join("checkpoints").join("run_4.json").exists());
}

#[test]
fn prefixes_do_not_see_each_other() {
    let dir = TempDir::new().unwrap();
    let first = open_store(&config(CheckpointBackend::File), dir.path()).unwrap();
    let other = open_store(
        &CheckpointConfig {
            prefix: "other".to_string(),
            ..config(CheckpointBackend::File)
        },
        dir.path(),
    )
    .unwrap();
    first.save(2, &beam(&[" Two."])).unwrap();
    assert!(other.latest().unwrap().is_none());
}
