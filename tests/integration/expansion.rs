//! Integration tests for premise, entity and outline generation

use super::test_utils::{context, reply, ScriptedGenerator, EVENTS};
use std::sync::Arc;
use storyloom::config::{OutlineConfig, PlanConfig, PremiseConfig};
use storyloom::error::ApiError;
use storyloom::expansion::ExpansionEngine;
use storyloom::plan::{Plan, Premise};
use storyloom::planner::{generate_plan, generate_premise};

fn small_plan_config() -> PlanConfig {
    let mut config = PlanConfig::default();
    config.outline.max_depth = 3;
    config.outline.min_children = 2;
    config.outline.max_children = 2;
    config
}

#[tokio::test]
async fn premise_then_plan_builds_a_complete_outline() {
    let generator = Arc::new(ScriptedGenerator::story_world());
    let ctx = context(Arc::clone(&generator));

    let premise = generate_premise(&ctx, &PremiseConfig::default()).await.unwrap();
    assert_eq!(premise.title, "The Salt Lamp");

    let plan = generate_plan(&ctx, &small_plan_config(), premise).await.unwrap();
    assert!(!plan.setting.is_empty());
    assert_eq!(plan.entities.len(), 3);

    // Root, two beats, and two sub-beats under each.
    let outline = &plan.outline;
    assert_eq!(outline.len(), 7);
    for ix in outline.depth_first(outline.root(), false, None) {
        let node = outline.node(ix);
        assert!(node.text.ends_with('.'));
        assert!(!node.scene.is_empty());
        assert!(node.entities.iter().any(|e| e == "Ines Varga"));
        assert!(node.entities.iter().any(|e| e == "Rook Halden"));
        assert!(node.entities.iter().all(|e| plan.entities.contains(e)));
        assert!(outline.depth(ix) <= 2);
    }
    let texts: Vec<&str> = outline
        .depth_first(outline.root(), false, None)
        .map(|ix| outline.node(ix).text.as_str())
        .collect();
    assert_eq!(texts.len(), 6);
    assert!(texts.iter().all(|t| EVENTS.contains(t)));
    assert!(plan.validate().is_ok());
}

#[tokio::test]
async fn near_duplicate_events_are_resampled() {
    let generator = Arc::new(ScriptedGenerator::new(|prompt, _, n| {
        match prompt.template.as_str() {
            // The second beat first repeats the first one almost verbatim.
            "plan.outline.event_depth_0" => match n {
                0 => reply("A storm cuts the island off from the mainland."),
                1 => reply("A storm cuts the island off from the mainland!"),
                _ => reply("Ines finds a wounded stranger below the cliffs."),
            },
            "plan.outline.scene" => reply("the cliffs"),
            _ => reply("Ines Varga."),
        }
    }));
    let ctx = context(Arc::clone(&generator));
    let mut plan = Plan::new(Premise::new("Salt", "A keeper."));
    plan.entities.push(storyloom::plan::Entity::new("Ines Varga", "The keeper."));

    let config = OutlineConfig {
        max_depth: 2,
        min_children: 2,
        max_children: 2,
        ..OutlineConfig::default()
    };
    ExpansionEngine::new(&ctx, &config).run(&mut plan).await.unwrap();

    let children = plan.outline.children(plan.outline.root()).to_vec();
    assert_eq!(children.len(), 2);
    assert_eq!(
        plan.outline.node(children[1]).text,
        "Ines finds a wounded stranger below the cliffs."
    );
    assert_eq!(generator.calls_to("plan.outline.event_depth_0"), 3);
}

#[tokio::test]
async fn exhausted_outline_attempts_abort_the_plan() {
    let generator = Arc::new(ScriptedGenerator::new(|prompt, _, n| {
        match prompt.template.as_str() {
            "plan.setting" => reply("An island."),
            "plan.entity.name" => reply(["Ines Varga", "Rook Halden", "Marta Sousa"][n % 3]),
            "plan.entity.description" => reply("A local."),
            // Every event is rejected by the outline's forbidden characters.
            _ => reply("[TODO: write this]"),
        }
    }));
    let ctx = context(Arc::clone(&generator));
    let mut config = small_plan_config();
    config.outline.max_attempts = 2;
    config.outline.event_depth_0.max_attempts = 2;

    let err = generate_plan(&ctx, &config, Premise::new("Salt", "A keeper."))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        ApiError::RetriesExhausted { ref operation, attempts: 2 } if operation == "outline"
    ));
    assert_eq!(generator.calls_to("plan.outline.event_depth_0"), 4);
}
