//! Shared test utilities for integration tests
//!
//! A scripted text generator that answers every prompt template the pipeline
//! renders, plus environment isolation for config loading.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use storyloom::error::ApiError;
use storyloom::filter::FilterFactory;
use storyloom::generation::GenerationContext;
use storyloom::prompt::PromptSet;
use storyloom::provider::{
    Completion, GenerationOutput, RenderedPrompt, SamplingConfig, TextGenerator,
};
use tempfile::TempDir;

type Handler = dyn Fn(&RenderedPrompt, &SamplingConfig, usize) -> Result<GenerationOutput, ApiError>
    + Send
    + Sync;

/// Answers calls through a handler that also receives how many times the
/// same template was called before.
pub struct ScriptedGenerator {
    handler: Box<Handler>,
    calls: Mutex<Vec<String>>,
    per_template: Mutex<HashMap<String, usize>>,
}

impl ScriptedGenerator {
    pub fn new<F>(handler: F) -> Self
    where
        F: Fn(&RenderedPrompt, &SamplingConfig, usize) -> Result<GenerationOutput, ApiError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
            per_template: Mutex::new(HashMap::new()),
        }
    }

    /// Coherent answers for every template: a small island story.
    pub fn story_world() -> Self {
        Self::new(|prompt, sampling, n| story_world_reply(prompt, sampling, n))
    }

    pub fn calls_to(&self, template: &str) -> usize {
        self.calls.lock().iter().filter(|t| t.as_str() == template).count()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl TextGenerator for ScriptedGenerator {
    async fn generate(
        &self,
        prompt: &RenderedPrompt,
        sampling: &SamplingConfig,
    ) -> Result<GenerationOutput, ApiError> {
        self.calls.lock().push(prompt.template.clone());
        let n = {
            let mut counts = self.per_template.lock();
            let count = counts.entry(prompt.template.clone()).or_insert(0);
            *count += 1;
            *count - 1
        };
        (self.handler)(prompt, sampling, n)
    }

    fn provider_name(&self) -> &str {
        "scripted"
    }
}

pub const NAMES: &[&str] = &["Ines Varga", "Rook Halden", "Marta Sousa", "Tomas Reyes"];

pub const EVENTS: &[&str] = &[
    "A storm cuts the island off from the mainland.",
    "Ines finds a wounded stranger below the cliffs.",
    "Rook admits he carries stolen customs papers.",
    "The harbor patrol arrives asking questions.",
    "Marta hides the papers inside the lamp housing.",
    "A fire breaks out in the boathouse at midnight.",
    "Tomas bargains with the patrol captain.",
    "The lamp fails just as a ship nears the rocks.",
    "Ines climbs the tower to relight the beacon.",
    "Dawn reveals the wreck of the patrol cutter.",
    "Rook rows away alone before the tide turns.",
    "Marta burns the last of the evidence.",
    "The mainland ferry returns with a new inspector.",
    "Old debts surface in a letter from Lisbon.",
    "Gulls scatter as a gunshot echoes over the bay.",
    "A child from the village goes missing in fog.",
];

pub fn reply(text: &str) -> Result<GenerationOutput, ApiError> {
    Ok(GenerationOutput::new(vec![Completion::new(text)]))
}

/// A one-token judge answer with alternatives for both yes/no and A/B questions.
pub fn judge_reply() -> Result<GenerationOutput, ApiError> {
    let mut completion = Completion::new("Yes");
    completion.top_logprobs = vec![vec![
        ("Yes".to_string(), -0.1),
        ("No".to_string(), -2.3),
        ("A".to_string(), -0.2),
        ("B".to_string(), -2.0),
    ]];
    Ok(GenerationOutput::new(vec![completion]))
}

/// Passage text that never resembles another call's text.
pub fn distinct_passage(n: usize) -> String {
    let low = char::from(b'a' + (n % 26) as u8).to_string();
    let high = char::from(b'a' + (n / 26 % 26) as u8).to_string();
    format!("{}{} {}.", low.repeat(5), high.repeat(5), low.repeat(3))
}

fn story_world_reply(
    prompt: &RenderedPrompt,
    sampling: &SamplingConfig,
    n: usize,
) -> Result<GenerationOutput, ApiError> {
    match prompt.template.as_str() {
        "premise.title" => reply(" \"The Salt Lamp\""),
        "premise.premise" => reply(" A lighthouse keeper shelters a smuggler during a storm."),
        "plan.setting" => reply(" A rocky island off the Portuguese coast in 1911."),
        "plan.entity.name" => reply(NAMES[n % NAMES.len()]),
        "plan.entity.description" => reply(" Someone who knows every path on the island."),
        "plan.outline.event_depth_0" => reply(EVENTS[n % EVENTS.len()]),
        "plan.outline.event" => reply(EVENTS[(n + 6) % EVENTS.len()]),
        "plan.outline.scene" => reply(" the lamp room at the top of the tower"),
        "plan.outline.entity_depth_0" | "plan.outline.entity" => reply(" Ines Varga, Rook Halden."),
        "story.summary" => reply(" Things happened on the island."),
        key if key.starts_with("story.score.") => judge_reply(),
        "story.passage" => {
            let count = sampling.n.unwrap_or(1) as usize;
            let completions = (0..count)
                .map(|i| Completion::new(distinct_passage(n * count + i)))
                .collect();
            Ok(GenerationOutput::new(completions))
        }
        other => Err(ApiError::ConfigError(format!("unexpected template {}", other))),
    }
}

/// Generation context over `generator` with the built-in prompts.
pub fn context(generator: Arc<ScriptedGenerator>) -> GenerationContext {
    let generator: Arc<dyn TextGenerator> = generator;
    GenerationContext::new(
        generator,
        PromptSet::default_set().unwrap(),
        FilterFactory::new("whitespace"),
    )
    .unwrap()
}

/// Global mutex to serialize environment variable access across all tests
static ENV_MUTEX: Mutex<()> = parking_lot::const_mutex(());

/// Run `f` with HOME and XDG_CONFIG_HOME pointed into a fresh temp dir,
/// restoring the previous values afterwards.
pub fn with_isolated_home<F, R>(f: F) -> R
where
    F: FnOnce(&TempDir) -> R,
{
    let _guard = ENV_MUTEX.lock();
    let dir = TempDir::new().unwrap();
    let home = std::env::var("HOME").ok();
    let xdg = std::env::var("XDG_CONFIG_HOME").ok();
    std::env::set_var("HOME", dir.path().join("home"));
    std::env::set_var("XDG_CONFIG_HOME", dir.path().join("xdg"));

    let result = f(&dir);

    match home {
        Some(home) => std::env::set_var("HOME", home),
        None => std::env::remove_var("HOME"),
    }
    match xdg {
        Some(xdg) => std::env::set_var("XDG_CONFIG_HOME", xdg),
        None => std::env::remove_var("XDG_CONFIG_HOME"),
    }
    result
}
