//! CLI route: single route table and run context. Dispatches to the planner,
//! the renderer and presentation.

use crate::checkpoint::{open_store, CheckpointStore};
use crate::cli::output::{
    format_checkpoint_rows, format_cleared, format_config, format_plan, CheckpointRow,
};
use crate::cli::parse::Commands;
use crate::config::{ConfigLoader, PathsConfig, StoryloomConfig};
use crate::error::ApiError;
use crate::filter::FilterFactory;
use crate::generation::GenerationContext;
use crate::plan::{Plan, Premise};
use crate::planner::{generate_plan, generate_premise};
use crate::prompt::PromptSet;
use crate::provider::GeneratorFactory;
use crate::render::BeamSearchRenderer;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{info, warn};

/// Runtime context for CLI execution: workspace and validated configuration.
pub struct RunContext {
    workspace_root: PathBuf,
    config: StoryloomConfig,
}

impl RunContext {
    /// Create run context from workspace root and optional config path.
    pub fn new(workspace_root: PathBuf, config_path: Option<PathBuf>) -> Result<Self, ApiError> {
        let config = ConfigLoader::load_validated(&workspace_root, config_path.as_deref())?;
        Ok(Self::with_config(workspace_root, config))
    }

    pub fn with_config(workspace_root: PathBuf, config: StoryloomConfig) -> Self {
        Self {
            workspace_root,
            config,
        }
    }

    pub fn config(&self) -> &StoryloomConfig {
        &self.config
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        PathsConfig::resolve(&self.workspace_root, path)
    }

    /// The path given on the command line, else the configured default.
    fn path_or(&self, explicit: &Option<PathBuf>, configured: &Path) -> PathBuf {
        self.resolve(explicit.as_deref().unwrap_or(configured))
    }

    fn generation_context(&self) -> Result<GenerationContext, ApiError> {
        let generator = GeneratorFactory::create(&self.config.server)?;
        let prompt_path = self.config.paths.prompts.as_deref().map(|p| self.resolve(p));
        let prompts = PromptSet::load_or_default(prompt_path.as_deref())?;
        GenerationContext::new(generator, prompts, FilterFactory::new(&self.config.server.tokenizer))
    }

    fn checkpoint_store(&self) -> Result<Box<dyn CheckpointStore>, ApiError> {
        Ok(open_store(&self.config.checkpoint, &self.workspace_root)?)
    }

    fn runtime() -> Result<tokio::runtime::Runtime, ApiError> {
        tokio::runtime::Runtime::new()
            .map_err(|e| ApiError::ConfigError(format!("Failed to create runtime: {}", e)))
    }

    /// Execute a CLI command via the single route table.
    pub fn execute(&self, command: &Commands) -> Result<String, ApiError> {
        let started = Instant::now();
        let result = self.execute_inner(command);
        let elapsed_ms = started.elapsed().as_millis() as u64;
        match &result {
            Ok(_) => info!(command = command.name(), elapsed_ms, "Command finished"),
            Err(e) => warn!(command = command.name(), elapsed_ms, error = %e, "Command failed"),
        }
        result
    }

    fn execute_inner(&self, command: &Commands) -> Result<String, ApiError> {
        match command {
            Commands::Premise { output } => {
                let output = self.path_or(output, &self.config.paths.premise);
                self.handle_premise(&output)
            }
            Commands::Plan { premise, output } => {
                let premise = self.path_or(premise, &self.config.paths.premise);
                let output = self.path_or(output, &self.config.paths.plan);
                self.handle_plan(&premise, &output)
            }
            Commands::Story {
                plan,
                output,
                fresh,
            } => {
                let plan = self.path_or(plan, &self.config.paths.plan);
                let output = self.path_or(output, &self.config.paths.story);
                self.handle_story(&plan, &output, *fresh)
            }
            Commands::Show { plan, format } => {
                let plan = Plan::load(&self.path_or(plan, &self.config.paths.plan))?;
                format_plan(&plan, format)
            }
            Commands::Config { format } => format_config(&self.config, format),
            Commands::Checkpoints { clear, format } => self.handle_checkpoints(*clear, format),
        }
    }

    fn handle_premise(&self, output: &Path) -> Result<String, ApiError> {
        let ctx = self.generation_context()?;
        let premise = Self::runtime()?.block_on(generate_premise(&ctx, &self.config.premise))?;
        premise.save(output)?;
        info!(path = %output.display(), "Wrote premise");
        Ok(premise.to_string())
    }

    fn handle_plan(&self, premise: &Path, output: &Path) -> Result<String, ApiError> {
        let premise = Premise::load(premise)?;
        let ctx = self.generation_context()?;
        let plan = Self::runtime()?.block_on(generate_plan(&ctx, &self.config.plan, premise))?;
        plan.save(output)?;
        info!(path = %output.display(), nodes = plan.outline.len(), "Wrote plan");
        Ok(plan.to_string())
    }

    fn handle_story(&self, plan: &Path, output: &Path, fresh: bool) -> Result<String, ApiError> {
        let plan = Plan::load(plan)?;
        let ctx = self.generation_context()?;
        let story_config = &self.config.story;

        let store = if self.config.checkpoint.enabled {
            let store = self.checkpoint_store()?;
            if fresh {
                clear_store(store.as_ref())?;
            }
            Some(store)
        } else {
            None
        };

        let mut renderer = BeamSearchRenderer::new(&ctx, &plan, story_config);
        if let Some(store) = store.as_deref() {
            renderer = renderer.with_checkpoints(store, self.config.checkpoint.retain);
        }
        let beam = Self::runtime()?.block_on(renderer.run())?;

        let best = beam
            .best()
            .ok_or_else(|| ApiError::BeamInvariant("rendering produced an empty beam".to_string()))?;
        let text = format!("{}{}", story_config.chapter_header, best.text().trim_start());
        write_text(output, &text)?;
        crate::plan::write_json(&self.resolve(&self.config.paths.story_beam), &beam)?;
        info!(
            path = %output.display(),
            score = best.final_score().unwrap_or(f64::NEG_INFINITY),
            "Wrote story"
        );
        Ok(text)
    }

    fn handle_checkpoints(&self, clear: bool, format: &str) -> Result<String, ApiError> {
        let store = self.checkpoint_store()?;
        if clear {
            let removed = clear_store(store.as_ref())?;
            return format_cleared(&removed, format);
        }
        let mut rows = Vec::new();
        for step in store.steps()? {
            match store.load(step) {
                Ok(Some(beam)) => rows.push(CheckpointRow::from_beam(step, &beam)),
                Ok(None) => {}
                Err(e) => warn!(step, error = %e, "Skipping unreadable checkpoint"),
            }
        }
        format_checkpoint_rows(&rows, format)
    }
}

fn clear_store(store: &dyn CheckpointStore) -> Result<Vec<usize>, ApiError> {
    let steps = store.steps()?;
    for step in &steps {
        store.delete(*step)?;
    }
    Ok(steps)
}

fn write_text(path: &Path, text: &str) -> Result<(), ApiError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    std::fs::write(path, text)?;
    Ok(())
}
