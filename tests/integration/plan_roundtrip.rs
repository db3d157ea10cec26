//! Integration tests for plan persistence and validation

use storyloom::error::ApiError;
use storyloom::plan::{Entity, Plan, Premise};
use tempfile::TempDir;

fn sample_plan() -> Plan {
    let mut plan = Plan::new(Premise::new("Salt", "A keeper hides a smuggler."));
    plan.setting = "A rocky island in 1911.".to_string();
    plan.entities.push(Entity::new("Ines Varga", "The keeper."));
    plan.entities.push(Entity::new("Rook Halden", "The smuggler."));
    let root = plan.outline.root();
    let first = plan.outline.add_child(root, "A storm arrives.");
    plan.outline.node_mut(first).scene = "the cliffs".to_string();
    plan.outline.node_mut(first).set_entities(["Ines Varga"]);
    let nested = plan.outline.add_child(first, "Ines finds Rook.");
    plan.outline.node_mut(nested).set_entities(["Ines Varga", "Rook Halden"]);
    plan.outline.add_child(root, "The storm breaks.");
    plan
}

#[test]
fn plan_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("nested").join("plan.json");
    let plan = sample_plan();
    plan.save(&path).unwrap();

    let loaded = Plan::load(&path).unwrap();
    assert_eq!(loaded.premise, plan.premise);
    assert_eq!(loaded.setting, plan.setting);
    assert_eq!(loaded.entities, plan.entities);
    assert_eq!(loaded.outline.to_document(), plan.outline.to_document());
    assert_eq!(loaded.to_string(), plan.to_string());
}

#[test]
fn loading_rejects_unknown_entity_references() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.json");
    let mut plan = sample_plan();
    let root = plan.outline.root();
    let stray = plan.outline.add_child(root, "A stranger appears.");
    plan.outline.node_mut(stray).set_entities(["Nobody Known"]);
    plan.save(&path).unwrap();

    let err = Plan::load(&path).unwrap_err();
    assert!(matches!(err, ApiError::InvalidPlan(ref msg) if msg.contains("Nobody Known")));
}

#[test]
fn premise_survives_save_and_load() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("premise.json");
    let premise = Premise::new("Salt", "A keeper hides a smuggler.");
    premise.save(&path).unwrap();
    assert_eq!(Premise::load(&path).unwrap(), premise);
}

#[test]
fn corrupt_plan_is_a_storage_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("plan.json");
    std::fs::write(&path, "{ not json").unwrap();
    assert!(matches!(Plan::load(&path), Err(ApiError::StorageError(_))));
}
