//! Integration tests for beam-search rendering, endings and resume

use super::test_utils::{context, distinct_passage, reply, ScriptedGenerator};
use std::sync::Arc;
use storyloom::checkpoint::{CheckpointStore, FileCheckpointStore};
use storyloom::config::{EndingPolicy, PlanConfig, ScoreConfig, ScorerKind, StoryConfig};
use storyloom::error::ApiError;
use storyloom::plan::{Entity, Plan, Premise};
use storyloom::planner::generate_plan;
use storyloom::provider::{Completion, GenerationOutput};
use storyloom::render::BeamSearchRenderer;
use tempfile::TempDir;

fn three_leaf_plan() -> Plan {
    let mut plan = Plan::new(Premise::new("Salt", "A keeper hides a smuggler."));
    plan.setting = "A rocky island.".to_string();
    plan.entities.push(Entity::new("Ines Varga", "The keeper."));
    let root = plan.outline.root();
    for beat in [
        "A storm cuts the island off.",
        "Ines finds a stranger below the cliffs.",
        "The patrol arrives at dawn.",
    ] {
        let ix = plan.outline.add_child(root, beat);
        plan.outline.node_mut(ix).scene = "the cliffs".to_string();
        plan.outline.node_mut(ix).set_entities(["Ines Varga"]);
    }
    plan
}

fn length_only(ending_policy: EndingPolicy) -> StoryConfig {
    StoryConfig {
        ending_policy,
        min_passages_per_node: 1,
        max_passages_per_node: 1,
        score: ScoreConfig {
            scorers: vec![ScorerKind::Length],
            ..ScoreConfig::default()
        },
        ..StoryConfig::default()
    }
}

fn passages(n: usize, count: usize) -> Result<GenerationOutput, ApiError> {
    Ok(GenerationOutput::new(
        (0..count)
            .map(|i| Completion::new(distinct_passage(n * count + i)))
            .collect(),
    ))
}

#[tokio::test]
async fn generated_plan_renders_into_a_scored_beam() {
    let generator = Arc::new(ScriptedGenerator::story_world());
    let ctx = context(Arc::clone(&generator));
    let mut plan_config = PlanConfig::default();
    plan_config.outline.max_depth = 3;
    plan_config.outline.min_children = 2;
    plan_config.outline.max_children = 2;
    let plan = generate_plan(&ctx, &plan_config, Premise::new("Salt", "A keeper."))
        .await
        .unwrap();

    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path(), "beam");
    let config = StoryConfig::default();
    let beam = BeamSearchRenderer::new(&ctx, &plan, &config)
        .with_checkpoints(&store, false)
        .run()
        .await
        .unwrap();

    assert!(!beam.is_empty());
    assert!(beam.len() <= config.outline_node_beam_width);
    let leaves = plan.outline.leaves(plan.outline.root()).len();
    for story in beam.stories() {
        // One list per leaf plus the appended conclusion node.
        assert_eq!(story.len(), leaves + 1);
        for passage in story.passages() {
            for key in [
                "coherence_score",
                "relevance_score",
                "commentary_score",
                "length_score",
                "score",
            ] {
                assert!(passage.scores.contains_key(key), "missing {}", key);
            }
        }
    }
    let scores: Vec<f64> = beam
        .stories()
        .iter()
        .map(|s| s.final_score().unwrap_or(f64::NEG_INFINITY))
        .collect();
    assert!(scores.windows(2).all(|pair| pair[0] >= pair[1]));
    assert!(store.steps().unwrap().is_empty());
    assert!(generator.calls_to("story.score.coherence") > 0);
}

#[tokio::test]
async fn interrupted_run_resumes_from_checkpoint() {
    let plan = three_leaf_plan();
    let config = length_only(EndingPolicy::None);
    let dir = TempDir::new().unwrap();
    let store = FileCheckpointStore::new(dir.path(), "beam");

    // Node one takes one call, node two one per surviving story; then the key is revoked.
    let failing = Arc::new(ScriptedGenerator::new(|prompt, sampling, n| {
        match prompt.template.as_str() {
            "story.passage" if n >= 3 => {
                Err(ApiError::ProviderAuthFailed("key revoked".to_string()))
            }
            "story.passage" => passages(n, sampling.n.unwrap_or(1) as usize),
            _ => reply("Summary."),
        }
    }));
    let ctx = context(Arc::clone(&failing));
    let err = BeamSearchRenderer::new(&ctx, &plan, &config)
        .with_checkpoints(&store, false)
        .run()
        .await
        .unwrap_err();
    assert!(matches!(err, ApiError::ProviderAuthFailed(_)));
    assert_eq!(store.steps().unwrap(), vec![1]);

    let working = Arc::new(ScriptedGenerator::new(|prompt, sampling, n| {
        match prompt.template.as_str() {
            "story.passage" => passages(n + 100, sampling.n.unwrap_or(1) as usize),
            _ => reply("Summary."),
        }
    }));
    let ctx = context(Arc::clone(&working));
    let beam = BeamSearchRenderer::new(&ctx, &plan, &config)
        .with_checkpoints(&store, false)
        .run()
        .await
        .unwrap();

    // Only the third node was rendered, once per story in the resumed beam.
    assert_eq!(working.calls_to("story.passage"), 2);
    for story in beam.stories() {
        assert_eq!(story.len(), 3);
    }
    assert!(store.steps().unwrap().is_empty());
}

#[tokio::test]
async fn appended_ending_passage_is_cut_at_the_stop_marker() {
    let plan = three_leaf_plan();
    let config = StoryConfig {
        ending_stop: Some("THE END".to_string()),
        ..length_only(EndingPolicy::AppendPassage)
    };
    let generator = Arc::new(ScriptedGenerator::new(|prompt, sampling, n| {
        match prompt.template.as_str() {
            "story.passage" if prompt.as_text().contains("should end the story") => {
                reply("They slept at last. THE END Afterword by the author.")
            }
            "story.passage" => passages(n, sampling.n.unwrap_or(1) as usize),
            _ => reply("Summary."),
        }
    }));
    let ctx = context(Arc::clone(&generator));
    let beam = BeamSearchRenderer::new(&ctx, &plan, &config)
        .run()
        .await
        .unwrap();

    for story in beam.stories() {
        assert_eq!(story.len(), 3);
        assert_eq!(story.last_list().unwrap().len(), 2);
        assert!(story.text().ends_with(" They slept at last."));
        let ending = story.last_passage().unwrap();
        assert_eq!(ending.scores["length_score"], 100.0);
    }
}
