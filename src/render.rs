//! Beam-Search Rendering
//!
//! Turns a finished plan into prose. Outline nodes are rendered one at a
//! time in the order the rendering policy picks. For each node, every story
//! in the beam is offered continuations; all forks are scored, merged and
//! pruned. After each node the surviving beam is checkpointed so an
//! interrupted run resumes where it stopped.

pub mod context;
pub mod scoring;

pub use context::{select_node_to_render, PassageContext};
pub use scoring::{extract_choice_logprobs, log_softmax, score_passage, Candidate};

use crate::checkpoint::CheckpointStore;
use crate::config::{EndingPolicy, StoryConfig, SummaryContext};
use crate::error::ApiError;
use crate::filter::{forbidden_words_ignore_case, non_empty, novelty};
use crate::generation::GenerationContext;
use crate::plan::{NodeIndex, Plan};
use crate::prompt::PromptVars;
use crate::retry::{each, RetryPolicy};
use crate::story::{Passage, PassageList, Story, StoryBeam};
use futures::future::try_join_all;
use tracing::{debug, info, instrument, warn};

/// Beat text of the synthetic node appended by [`EndingPolicy::AppendNode`].
pub const ENDING_NODE_TEXT: &str = "The conclusion of the story.";

pub struct BeamSearchRenderer<'a> {
    ctx: &'a GenerationContext,
    plan: &'a Plan,
    config: &'a StoryConfig,
    checkpoints: Option<&'a dyn CheckpointStore>,
    retain_checkpoints: bool,
}

impl<'a> BeamSearchRenderer<'a> {
    pub fn new(ctx: &'a GenerationContext, plan: &'a Plan, config: &'a StoryConfig) -> Self {
        Self {
            ctx,
            plan,
            config,
            checkpoints: None,
            retain_checkpoints: false,
        }
    }

    /// Checkpoint after every step; superseded entries are deleted unless `retain`.
    pub fn with_checkpoints(mut self, store: &'a dyn CheckpointStore, retain: bool) -> Self {
        self.checkpoints = Some(store);
        self.retain_checkpoints = retain;
        self
    }

    pub fn select_node_to_render(&self, beam: &StoryBeam) -> Option<NodeIndex> {
        select_node_to_render(
            &self.plan.outline,
            self.config.rendering_policy,
            &beam.rendered_nodes(),
        )
    }

    /// Render the whole outline, run the ending policy and truncate at the
    /// ending stop marker. The returned beam is best-first.
    #[instrument(skip_all, fields(title = %self.plan.premise.title))]
    pub async fn run(&self) -> Result<StoryBeam, ApiError> {
        let (mut step, mut beam) = self.resume();

        while let Some(node) = self.select_node_to_render(&beam) {
            info!(step, node = %self.plan.outline.node(node).text, "Rendering node");
            beam = self.render_step(self.plan, &beam, node, false).await?;
            if let Some(best) = beam.best() {
                debug!(story = %best, "Best story so far");
            }
            self.checkpoint(step, &beam)?;
            step += 1;
        }

        let beam = self.end_story(beam).await?;
        if let Some(previous) = step.checked_sub(1) {
            self.discard_checkpoint(previous);
        }
        Ok(beam)
    }

    fn resume(&self) -> (usize, StoryBeam) {
        let fresh = (0, StoryBeam::single(Story::new()));
        let Some(store) = self.checkpoints else {
            return fresh;
        };
        match store.latest() {
            Ok(Some((step, beam))) if !beam.is_empty() => {
                info!(step, stories = beam.len(), "Resuming from checkpoint");
                (step + 1, beam)
            }
            Ok(_) => fresh,
            Err(e) => {
                warn!(error = %e, "Could not read checkpoints; starting from the beginning");
                fresh
            }
        }
    }

    fn checkpoint(&self, step: usize, beam: &StoryBeam) -> Result<(), ApiError> {
        if let Some(store) = self.checkpoints {
            store.save(step, beam)?;
            if let Some(previous) = step.checked_sub(1) {
                self.discard_checkpoint(previous);
            }
        }
        Ok(())
    }

    fn discard_checkpoint(&self, step: usize) {
        if self.retain_checkpoints {
            return;
        }
        if let Some(store) = self.checkpoints {
            if let Err(e) = store.delete(step) {
                warn!(step, error = %e, "Failed to delete superseded checkpoint");
            }
        }
    }

    /// Render `node` for every story in `beam` and keep the best
    /// `outline_node_beam_width` results.
    async fn render_step(
        &self,
        plan: &Plan,
        beam: &StoryBeam,
        node: NodeIndex,
        ending: bool,
    ) -> Result<StoryBeam, ApiError> {
        let rendered = try_join_all(
            beam.stories()
                .iter()
                .map(|story| self.render_node(plan, story, node, ending)),
        )
        .await?;
        let candidates: Vec<Story> = rendered
            .into_iter()
            .flat_map(StoryBeam::into_stories)
            .collect();
        Ok(StoryBeam::new(candidates)?.prune(self.config.outline_node_beam_width))
    }

    /// Grow one story through `node`, returning the best stories found.
    pub async fn render_node(
        &self,
        plan: &Plan,
        story: &Story,
        node: NodeIndex,
        ending: bool,
    ) -> Result<StoryBeam, ApiError> {
        let base = story.copy_append_list(PassageList::new(plan.outline.node(node).id().clone()));
        let mut beam = StoryBeam::single(base.clone());
        let mut best = StoryBeam::single(base);

        for i in 0..self.config.max_passages_per_node {
            let forks = try_join_all(beam.stories().iter().map(|story| async move {
                let passages = self.render_passage(plan, story, node, ending).await?;
                passages
                    .into_iter()
                    .map(|passage| story.copy_append_passage(passage))
                    .collect::<Result<Vec<_>, ApiError>>()
            }))
            .await?;
            let forks: Vec<Story> = forks.into_iter().flatten().collect();
            if forks.is_empty() {
                debug!(passages = i, "No story could grow; node finished");
                break;
            }
            beam = StoryBeam::new(forks)?.prune(self.config.passage_beam_width);

            best = if i < self.config.min_passages_per_node {
                beam.clone()
            } else {
                let mut pool = best.into_stories();
                pool.splice(0..0, beam.stories().iter().cloned());
                StoryBeam::new(pool)?.prune(self.config.best_beam_width())
            };
        }

        if best.stories().iter().all(|s| s.final_score().is_none()) {
            warn!(node = %plan.outline.node(node).text, "Node rendered without any passage");
        }
        Ok(best)
    }

    /// Sample and score candidate passages continuing `story` at `node`.
    /// May return no passages when every candidate is filtered out.
    pub async fn render_passage(
        &self,
        plan: &Plan,
        story: &Story,
        node: NodeIndex,
        ending: bool,
    ) -> Result<Vec<Passage>, ApiError> {
        let previous_summary = self.previous_summary(story).await?;
        let vars = PassageContext::new(plan, story, node, self.config, ending)
            .prompt_vars(&previous_summary);

        let references: Vec<String> = story.last_passage().map(|p| p.text.clone()).into_iter().collect();
        let filter = non_empty()
            .and(forbidden_words_ignore_case(&self.config.forbidden_words))
            .and(novelty(references, self.config.novelty_threshold))
            .on_first::<bool>();
        let include_prefix_space = self.config.include_prefix_space;

        let accepted = self
            .ctx
            .generate(
                "story.passage",
                &vars,
                &self.config.passage,
                |texts, output| {
                    texts
                        .into_iter()
                        .zip(&output.completions)
                        .map(|(text, completion)| {
                            (prepare_passage(&text, include_prefix_space), completion.stopped_at_length())
                        })
                        .collect()
                },
                &filter,
                &RetryPolicy::attempts(self.config.max_attempts).allow_empty(),
            )
            .await?;

        let node_event = &plan.outline.node(node).text;
        let mut passages = Vec::with_capacity(accepted.items.len());
        for (text, stopped_at_length) in accepted.items {
            let candidate = Candidate {
                story,
                node_event,
                text: &text,
                stopped_at_length,
                ending,
            };
            let scores = score_passage(self.ctx, self.config, &candidate).await;
            debug!(score = scores.get("score").copied().unwrap_or_default(), "Scored passage");
            passages.push(Passage::with_scores(text, scores));
        }
        Ok(passages)
    }

    /// Summary of the previous node's text, or `N/A`.
    async fn previous_summary(&self, story: &Story) -> Result<String, ApiError> {
        let raw_context = match (self.config.previous_summary_context, story.previous_list()) {
            (SummaryContext::PreviousNode, Some(list)) => list.text(),
            _ => return Ok("N/A".to_string()),
        };
        let filter = self
            .ctx
            .filters
            .min_max_tokens(0, self.config.summary.max_tokens_or(128) as usize)?
            .map(String::as_str);
        self.ctx
            .generate_one(
                "story.summary",
                &PromptVars::new().set("raw_context", raw_context),
                &self.config.summary,
                each(|text: String| text.trim().to_string()),
                &filter,
                &RetryPolicy::default(),
            )
            .await
    }

    /// Apply the ending policy, then truncate at the ending stop marker.
    pub async fn end_story(&self, beam: StoryBeam) -> Result<StoryBeam, ApiError> {
        let last_rendered = beam
            .rendered_nodes()
            .last()
            .and_then(|id| self.plan.outline.find(id));
        let beam = match (self.config.ending_policy, last_rendered) {
            (EndingPolicy::None, _) | (_, None) => beam,
            (EndingPolicy::AppendPassage, Some(last)) => {
                let mut stories = Vec::with_capacity(beam.len());
                for story in beam.stories() {
                    let passages = self.render_passage(self.plan, story, last, true).await?;
                    match passages.into_iter().next() {
                        Some(passage) => stories.push(story.copy_append_passage(passage)?),
                        None => {
                            warn!("No ending passage survived the filters; story left without one");
                            stories.push(story.clone());
                        }
                    }
                }
                StoryBeam::new(stories)?
            }
            (EndingPolicy::AppendNode, Some(last)) => {
                let mut plan = self.plan.clone();
                let root = plan.outline.root();
                let end = plan.outline.add_child(root, ENDING_NODE_TEXT);
                let (scene, entities) = {
                    let previous = self.plan.outline.node(last);
                    (previous.scene.clone(), previous.entities.clone())
                };
                plan.outline.node_mut(end).scene = scene;
                plan.outline.node_mut(end).set_entities(entities);
                info!("Rendering ending node");
                self.render_step(&plan, &beam, end, true).await?
            }
        };

        Ok(match &self.config.ending_stop {
            Some(stop) => beam.right_truncated(stop, self.config.allow_delete_passage_lists),
            None => beam,
        })
    }
}

/// Trim trailing whitespace and optionally force a single leading space.
fn prepare_passage(text: &str, include_prefix_space: bool) -> String {
    let text = text.trim_end();
    if include_prefix_space && !text.starts_with(' ') {
        format!(" {}", text).replace("  ", " ")
    } else {
        text.to_string()
    }
}
