//! Configuration System
//!
//! Layered configuration for plan and story generation. Sources, lowest
//! precedence first: built-in defaults, the user's global config file, the
//! workspace `config/config.toml`, `config/{STORYLOOM_ENV}.toml`, and finally
//! `STORYLOOM__SECTION__KEY` environment variables. Every policy name is a
//! closed enum so a misspelled policy fails at load time, not mid-run.

use crate::filter::DEFAULT_NOVELTY_THRESHOLD;
use crate::logging::LoggingConfig;
use crate::plan::ContextPolicy;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

mod facade;
mod merge;
mod sources;

pub use crate::provider::{PromptFormat, SamplingConfig, ServerConfig, ServerType};
pub use facade::ConfigLoader;

/// Root configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StoryloomConfig {
    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub server: ServerConfig,

    #[serde(default)]
    pub paths: PathsConfig,

    #[serde(default)]
    pub premise: PremiseConfig,

    #[serde(default)]
    pub plan: PlanConfig,

    #[serde(default)]
    pub story: StoryConfig,

    #[serde(default)]
    pub checkpoint: CheckpointConfig,
}

/// Input and output locations, relative to the workspace root unless absolute
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathsConfig {
    #[serde(default = "default_premise_path")]
    pub premise: PathBuf,

    #[serde(default = "default_plan_path")]
    pub plan: PathBuf,

    /// Plain-text story output
    #[serde(default = "default_story_path")]
    pub story: PathBuf,

    /// Final beam, for inspection
    #[serde(default = "default_story_beam_path")]
    pub story_beam: PathBuf,

    /// Prompt template override; the built-in set is used when unset
    #[serde(default)]
    pub prompts: Option<PathBuf>,
}

fn default_premise_path() -> PathBuf {
    PathBuf::from("output/premise.json")
}

fn default_plan_path() -> PathBuf {
    PathBuf::from("output/plan.json")
}

fn default_story_path() -> PathBuf {
    PathBuf::from("output/story.txt")
}

fn default_story_beam_path() -> PathBuf {
    PathBuf::from("output/story_beam.json")
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            premise: default_premise_path(),
            plan: default_plan_path(),
            story: default_story_path(),
            story_beam: default_story_beam_path(),
            prompts: None,
        }
    }
}

impl PathsConfig {
    /// `path` joined onto `workspace_root` unless already absolute.
    pub fn resolve(workspace_root: &Path, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            workspace_root.join(path)
        }
    }
}

fn sampling(max_tokens: u32, temperature: f32) -> SamplingConfig {
    SamplingConfig::with_max_tokens(max_tokens).temperature(temperature)
}

fn default_max_attempts() -> usize {
    crate::retry::DEFAULT_MAX_ATTEMPTS
}

fn default_novelty_threshold() -> f64 {
    DEFAULT_NOVELTY_THRESHOLD
}

/// Title and premise generation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PremiseConfig {
    #[serde(default = "default_title_sampling")]
    pub title: SamplingConfig,

    #[serde(default = "default_premise_sampling")]
    pub premise: SamplingConfig,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_title_sampling() -> SamplingConfig {
    sampling(32, 1.0).stop(&["\n"])
}

fn default_premise_sampling() -> SamplingConfig {
    sampling(256, 1.0)
}

impl Default for PremiseConfig {
    fn default() -> Self {
        Self {
            title: default_title_sampling(),
            premise: default_premise_sampling(),
            max_attempts: default_max_attempts(),
        }
    }
}

/// Setting, entity and outline generation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanConfig {
    #[serde(default)]
    pub setting: SettingConfig,

    #[serde(default)]
    pub entity: EntityConfig,

    #[serde(default)]
    pub outline: OutlineConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettingConfig {
    #[serde(default = "default_setting_sampling")]
    pub sampling: SamplingConfig,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_setting_sampling() -> SamplingConfig {
    sampling(128, 1.0).stop(&["\n"])
}

impl Default for SettingConfig {
    fn default() -> Self {
        Self {
            sampling: default_setting_sampling(),
            max_attempts: default_max_attempts(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityConfig {
    #[serde(default = "default_entity_name_sampling")]
    pub name: SamplingConfig,

    #[serde(default = "default_entity_description_sampling")]
    pub description: SamplingConfig,

    #[serde(default = "default_min_entities")]
    pub min_entities: usize,

    #[serde(default = "default_max_entities")]
    pub max_entities: usize,

    /// Whole-list attempts before the plan command gives up
    #[serde(default = "default_outer_attempts")]
    pub max_attempts: usize,
}

fn default_entity_name_sampling() -> SamplingConfig {
    sampling(16, 1.0).stop(&["\n"])
}

fn default_entity_description_sampling() -> SamplingConfig {
    sampling(96, 1.0)
}

fn default_min_entities() -> usize {
    3
}

fn default_max_entities() -> usize {
    8
}

fn default_outer_attempts() -> usize {
    3
}

impl Default for EntityConfig {
    fn default() -> Self {
        Self {
            name: default_entity_name_sampling(),
            description: default_entity_description_sampling(),
            min_entities: default_min_entities(),
            max_entities: default_max_entities(),
            max_attempts: default_outer_attempts(),
        }
    }
}

/// How the next node to expand is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExpansionPolicy {
    #[default]
    BreadthFirst,
}

/// One generation step of outline expansion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageConfig {
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Which other nodes are shown in the prompt
    #[serde(default = "default_stage_context")]
    pub context: ContextPolicy,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
}

fn default_stage_context() -> ContextPolicy {
    ContextPolicy::AncestorsWithSiblingsChildren
}

impl StageConfig {
    fn new(sampling: SamplingConfig, max_attempts: usize) -> Self {
        Self {
            sampling,
            context: default_stage_context(),
            max_attempts,
        }
    }
}

impl Default for StageConfig {
    fn default() -> Self {
        Self::new(SamplingConfig::default(), default_max_attempts())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutlineConfig {
    #[serde(default)]
    pub expansion_policy: ExpansionPolicy,

    /// Tree levels including the root; beats are created down to depth `max_depth - 1`
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,

    #[serde(default = "default_min_children")]
    pub min_children: usize,

    #[serde(default = "default_max_children")]
    pub max_children: usize,

    /// Soft target mentioned in the prompt
    #[serde(default = "default_preferred_max_children")]
    pub preferred_max_children: usize,

    #[serde(default = "default_novelty_threshold")]
    pub novelty_threshold: f64,

    /// Whole-outline attempts before the plan command gives up
    #[serde(default = "default_outer_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_event_stage")]
    pub event_depth_0: StageConfig,

    #[serde(default = "default_event_stage")]
    pub event: StageConfig,

    #[serde(default = "default_scene_stage")]
    pub scene: StageConfig,

    #[serde(default = "default_entity_stage")]
    pub entity_depth_0: StageConfig,

    #[serde(default = "default_entity_stage")]
    pub entity: StageConfig,
}

fn default_max_depth() -> usize {
    4
}

fn default_min_children() -> usize {
    2
}

fn default_max_children() -> usize {
    5
}

fn default_preferred_max_children() -> usize {
    4
}

fn default_event_stage() -> StageConfig {
    StageConfig::new(sampling(64, 1.0), default_max_attempts())
}

fn default_scene_stage() -> StageConfig {
    StageConfig::new(sampling(32, 1.0).stop(&["\n"]), default_max_attempts())
}

fn default_entity_stage() -> StageConfig {
    StageConfig::new(sampling(64, 1.0).stop(&["\n"]), 20)
}

impl Default for OutlineConfig {
    fn default() -> Self {
        Self {
            expansion_policy: ExpansionPolicy::default(),
            max_depth: default_max_depth(),
            min_children: default_min_children(),
            max_children: default_max_children(),
            preferred_max_children: default_preferred_max_children(),
            novelty_threshold: default_novelty_threshold(),
            max_attempts: default_outer_attempts(),
            event_depth_0: default_event_stage(),
            event: default_event_stage(),
            scene: default_scene_stage(),
            entity_depth_0: default_entity_stage(),
            entity: default_entity_stage(),
        }
    }
}

/// Which outline nodes get prose, and in what order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderingPolicy {
    /// Every node, depth-first
    All,
    /// Leaves only, in narrative order
    #[default]
    Leaves,
}

/// What happens after the last outline node is rendered
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum EndingPolicy {
    None,
    AppendPassage,
    #[default]
    AppendNode,
}

/// Source of the summary of the previous node's text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SummaryContext {
    #[default]
    PreviousNode,
    None,
}

/// Raw text the passage prompt continues from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AutoregressiveContext {
    #[default]
    CurrentNode,
}

/// Named scorers summed into a passage's total score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScorerKind {
    Coherence,
    Relevance,
    Commentary,
    Length,
}

impl ScorerKind {
    /// Key under which the scorer's contribution is stored on a passage.
    pub fn score_key(self) -> &'static str {
        match self {
            ScorerKind::Coherence => "coherence_score",
            ScorerKind::Relevance => "relevance_score",
            ScorerKind::Commentary => "commentary_score",
            ScorerKind::Length => "length_score",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoherenceConfig {
    #[serde(default = "default_judge_sampling")]
    pub sampling: SamplingConfig,

    /// How many preceding passages the judge sees
    #[serde(default = "default_max_prefix_passages")]
    pub max_prefix_passages: usize,
}

fn default_judge_sampling() -> SamplingConfig {
    sampling(1, 0.0).logprobs(5)
}

fn default_max_prefix_passages() -> usize {
    3
}

impl Default for CoherenceConfig {
    fn default() -> Self {
        Self {
            sampling: default_judge_sampling(),
            max_prefix_passages: default_max_prefix_passages(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreConfig {
    #[serde(default = "default_scorers")]
    pub scorers: Vec<ScorerKind>,

    #[serde(default)]
    pub coherence: CoherenceConfig,

    #[serde(default = "default_judge_sampling")]
    pub relevance: SamplingConfig,

    #[serde(default = "default_judge_sampling")]
    pub commentary: SamplingConfig,
}

fn default_scorers() -> Vec<ScorerKind> {
    vec![
        ScorerKind::Coherence,
        ScorerKind::Relevance,
        ScorerKind::Commentary,
        ScorerKind::Length,
    ]
}

impl Default for ScoreConfig {
    fn default() -> Self {
        Self {
            scorers: default_scorers(),
            coherence: CoherenceConfig::default(),
            relevance: default_judge_sampling(),
            commentary: default_judge_sampling(),
        }
    }
}

/// Beam-search rendering
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoryConfig {
    #[serde(default)]
    pub rendering_policy: RenderingPolicy,

    /// Stories kept between outline nodes
    #[serde(default = "default_beam_width")]
    pub outline_node_beam_width: usize,

    /// Stories kept between passages of one node
    #[serde(default = "default_beam_width")]
    pub passage_beam_width: usize,

    /// Size of the best-so-far pool; defaults to `passage_beam_width`
    #[serde(default)]
    pub best_beam_width: Option<usize>,

    #[serde(default = "default_min_passages_per_node")]
    pub min_passages_per_node: usize,

    #[serde(default = "default_max_passages_per_node")]
    pub max_passages_per_node: usize,

    #[serde(default = "default_true")]
    pub ancestor_nodes_in_premise: bool,

    #[serde(default = "default_true")]
    pub previous_node_entity_descriptions: bool,

    #[serde(default = "default_true")]
    pub collapse_previous_events: bool,

    #[serde(default)]
    pub previous_summary_context: SummaryContext,

    /// Literal preceding beats quoted in the passage instruction
    #[serde(default = "default_one")]
    pub include_previous_events: usize,

    /// Literal following beats quoted in the passage instruction
    #[serde(default = "default_one")]
    pub include_next_events: usize,

    #[serde(default)]
    pub autoregressive_context: AutoregressiveContext,

    #[serde(default = "default_true")]
    pub include_prefix_space: bool,

    #[serde(default)]
    pub ending_policy: EndingPolicy,

    /// Stop marker; everything after its last occurrence is cut from the final story
    #[serde(default)]
    pub ending_stop: Option<String>,

    #[serde(default)]
    pub allow_delete_passage_lists: bool,

    #[serde(default = "default_chapter_header")]
    pub chapter_header: String,

    /// Case-insensitive words that disqualify a passage
    #[serde(default = "default_forbidden_words")]
    pub forbidden_words: Vec<String>,

    #[serde(default = "default_novelty_threshold")]
    pub novelty_threshold: f64,

    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,

    #[serde(default = "default_passage_sampling")]
    pub passage: SamplingConfig,

    #[serde(default = "default_summary_sampling")]
    pub summary: SamplingConfig,

    #[serde(default)]
    pub score: ScoreConfig,
}

fn default_true() -> bool {
    true
}

fn default_one() -> usize {
    1
}

fn default_beam_width() -> usize {
    2
}

fn default_min_passages_per_node() -> usize {
    1
}

fn default_max_passages_per_node() -> usize {
    3
}

fn default_chapter_header() -> String {
    "Chapter 1\n\n".to_string()
}

fn default_forbidden_words() -> Vec<String> {
    vec!["passage".to_string()]
}

fn default_passage_sampling() -> SamplingConfig {
    sampling(256, 0.9).candidates(4).stop(&["Chapter", "THE END"])
}

fn default_summary_sampling() -> SamplingConfig {
    sampling(128, 0.7)
}

impl Default for StoryConfig {
    fn default() -> Self {
        Self {
            rendering_policy: RenderingPolicy::default(),
            outline_node_beam_width: default_beam_width(),
            passage_beam_width: default_beam_width(),
            best_beam_width: None,
            min_passages_per_node: default_min_passages_per_node(),
            max_passages_per_node: default_max_passages_per_node(),
            ancestor_nodes_in_premise: true,
            previous_node_entity_descriptions: true,
            collapse_previous_events: true,
            previous_summary_context: SummaryContext::default(),
            include_previous_events: default_one(),
            include_next_events: default_one(),
            autoregressive_context: AutoregressiveContext::default(),
            include_prefix_space: true,
            ending_policy: EndingPolicy::default(),
            ending_stop: None,
            allow_delete_passage_lists: false,
            chapter_header: default_chapter_header(),
            forbidden_words: default_forbidden_words(),
            novelty_threshold: default_novelty_threshold(),
            max_attempts: default_max_attempts(),
            passage: default_passage_sampling(),
            summary: default_summary_sampling(),
            score: ScoreConfig::default(),
        }
    }
}

impl StoryConfig {
    pub fn best_beam_width(&self) -> usize {
        self.best_beam_width.unwrap_or(self.passage_beam_width)
    }
}

/// Checkpoint storage backend
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckpointBackend {
    #[default]
    File,
    Sled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckpointConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default)]
    pub backend: CheckpointBackend,

    /// Directory holding checkpoint files or the sled database
    #[serde(default = "default_checkpoint_directory")]
    pub directory: PathBuf,

    #[serde(default = "default_checkpoint_prefix")]
    pub prefix: String,

    /// Keep superseded checkpoints instead of deleting them
    #[serde(default)]
    pub retain: bool,
}

fn default_checkpoint_directory() -> PathBuf {
    PathBuf::from(".storyloom/checkpoints")
}

fn default_checkpoint_prefix() -> String {
    "beam".to_string()
}

impl Default for CheckpointConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CheckpointBackend::default(),
            directory: default_checkpoint_directory(),
            prefix: default_checkpoint_prefix(),
            retain: false,
        }
    }
}

/// Configuration validation errors
#[derive(Debug, Clone)]
pub enum ValidationError {
    Server(String),
    Premise(String),
    Plan(String),
    Story(String),
    Checkpoint(String),
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationError::Server(msg) => write!(f, "Server: {}", msg),
            ValidationError::Premise(msg) => write!(f, "Premise: {}", msg),
            ValidationError::Plan(msg) => write!(f, "Plan: {}", msg),
            ValidationError::Story(msg) => write!(f, "Story: {}", msg),
            ValidationError::Checkpoint(msg) => write!(f, "Checkpoint: {}", msg),
        }
    }
}

impl std::error::Error for ValidationError {}

impl StoryloomConfig {
    /// Validate numeric invariants across all sections
    pub fn validate(&self) -> Result<(), Vec<ValidationError>> {
        let mut errors = Vec::new();

        if let Err(e) = self.server.validate() {
            errors.push(ValidationError::Server(e));
        }

        if self.premise.max_attempts == 0 {
            errors.push(ValidationError::Premise("max_attempts must be at least 1".to_string()));
        }

        let entity = &self.plan.entity;
        if entity.min_entities > entity.max_entities {
            errors.push(ValidationError::Plan(format!(
                "entity.min_entities ({}) exceeds entity.max_entities ({})",
                entity.min_entities, entity.max_entities
            )));
        }
        if entity.max_entities == 0 {
            errors.push(ValidationError::Plan("entity.max_entities must be at least 1".to_string()));
        }

        let outline = &self.plan.outline;
        if outline.max_depth < 2 {
            errors.push(ValidationError::Plan(format!(
                "outline.max_depth must be at least 2, got {}",
                outline.max_depth
            )));
        }
        if outline.max_children == 0 || outline.min_children > outline.max_children {
            errors.push(ValidationError::Plan(format!(
                "outline children bounds invalid: min {} max {}",
                outline.min_children, outline.max_children
            )));
        }
        if !(0.0..=1.0).contains(&outline.novelty_threshold) {
            errors.push(ValidationError::Plan(
                "outline.novelty_threshold must lie in [0, 1]".to_string(),
            ));
        }
        for (name, stage) in [
            ("event_depth_0", &outline.event_depth_0),
            ("event", &outline.event),
            ("scene", &outline.scene),
            ("entity_depth_0", &outline.entity_depth_0),
            ("entity", &outline.entity),
        ] {
            if stage.max_attempts == 0 {
                errors.push(ValidationError::Plan(format!(
                    "outline.{}.max_attempts must be at least 1",
                    name
                )));
            }
        }

        let story = &self.story;
        if story.outline_node_beam_width == 0
            || story.passage_beam_width == 0
            || story.best_beam_width() == 0
        {
            errors.push(ValidationError::Story("beam widths must be at least 1".to_string()));
        }
        if story.max_passages_per_node == 0
            || story.min_passages_per_node > story.max_passages_per_node
        {
            errors.push(ValidationError::Story(format!(
                "passages per node invalid: min {} max {}",
                story.min_passages_per_node, story.max_passages_per_node
            )));
        }
        if story.score.scorers.is_empty() {
            errors.push(ValidationError::Story("at least one scorer is required".to_string()));
        }
        if story.score.coherence.max_prefix_passages == 0 {
            errors.push(ValidationError::Story(
                "score.coherence.max_prefix_passages must be at least 1".to_string(),
            ));
        }
        if matches!(&story.ending_stop, Some(stop) if stop.is_empty()) {
            errors.push(ValidationError::Story("ending_stop cannot be empty".to_string()));
        }

        if self.checkpoint.prefix.is_empty() || self.checkpoint.prefix.contains('/') {
            errors.push(ValidationError::Checkpoint(format!(
                "prefix must be a plain file name, got '{}'",
                self.checkpoint.prefix
            )));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }
}
