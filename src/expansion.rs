//! Outline Expansion
//!
//! Grows an outline tree breadth-first. Each expansion round picks the first
//! leaf whose children would still fit under the depth limit and asks the
//! model for its sub-events one at a time. Every new event then gets a scene
//! and a list of participating entities.

use crate::config::{ExpansionPolicy, OutlineConfig, StageConfig};
use crate::error::ApiError;
use crate::filter::{forbidden_substrings, non_empty, novelty, Filter};
use crate::generation::GenerationContext;
use crate::plan::{EntityList, NodeIndex, OutlineTree, Plan};
use crate::prompt::PromptVars;
use crate::retry::{each, RetryPolicy};
use tracing::{debug, info, warn};

const OUTLINE_FORBIDDEN: &[&str] = &["[", "TODO", "]", ":"];

const STORY_CONCLUSION_INFO: &str =
    "The upcoming event(s) are the conclusion of the whole story, so make sure to wrap things up nicely.";

/// Drives expansion of one plan's outline.
pub struct ExpansionEngine<'a> {
    ctx: &'a GenerationContext,
    config: &'a OutlineConfig,
}

impl<'a> ExpansionEngine<'a> {
    pub fn new(ctx: &'a GenerationContext, config: &'a OutlineConfig) -> Self {
        Self { ctx, config }
    }

    /// First node, in breadth-first order, that is still a leaf and whose
    /// children would sit no deeper than `max_depth - 1`.
    pub fn select_node_to_expand(&self, tree: &OutlineTree) -> Option<NodeIndex> {
        match self.config.expansion_policy {
            ExpansionPolicy::BreadthFirst => {
                let deepest_parent = self.config.max_depth.checked_sub(2)?;
                tree.breadth_first(tree.root(), true, Some(deepest_parent))
                    .find(|ix| tree.node(*ix).is_leaf())
            }
        }
    }

    /// Replace the plan's outline with a freshly expanded one.
    pub async fn run(&self, plan: &mut Plan) -> Result<(), ApiError> {
        plan.outline = OutlineTree::new();
        while let Some(node) = self.select_node_to_expand(&plan.outline) {
            self.expand_node(plan, node).await?;
            debug!(outline = %plan.outline, "Outline after expansion round");
        }
        info!(nodes = plan.outline.len(), "Outline expanded");
        Ok(())
    }

    /// Generate the children of `parent` until the model stops or the child
    /// limit is reached.
    pub async fn expand_node(&self, plan: &mut Plan, parent: NodeIndex) -> Result<(), ApiError> {
        let depth_0 = plan.outline.depth(parent) == 0;
        let mut has_next = true;
        while has_next {
            let child = plan.outline.add_child(parent, "");
            let n_children = plan.outline.children(parent).len();

            let (event, model_has_next) = self.generate_event(plan, parent, child, depth_0).await?;
            plan.outline.node_mut(child).set_text(&event);

            let scene = self.generate_scene(plan, child).await?;
            plan.outline.node_mut(child).scene = scene;

            let entities = self.generate_entities(plan, child, depth_0).await?;
            plan.outline.node_mut(child).set_entities(entities);

            debug!(node = %plan.outline.format_node(child), "Added outline node");

            has_next = if n_children < self.config.min_children {
                true
            } else if n_children >= self.config.max_children {
                if model_has_next {
                    warn!(
                        max_children = self.config.max_children,
                        "Model wanted another sibling past the child limit; stopping"
                    );
                }
                false
            } else {
                model_has_next
            };
        }
        Ok(())
    }

    fn node_vars(&self, plan: &Plan, node: NodeIndex, stage: &StageConfig) -> PromptVars {
        let outline = &plan.outline;
        let (context_prefix, context_suffix) = outline.context(node, stage.context);
        PromptVars::new()
            .set("title", &plan.premise.title)
            .set("premise", &plan.premise.premise)
            .set("setting", &plan.setting)
            .set("entities", &plan.entities)
            .set("formatted_current_number", outline.number(node, 0, 0).trim_end())
            .set("stripped_current_number", outline.number(node, 0, 0).trim())
            .set("context_prefix", context_prefix)
            .set("context_suffix", context_suffix)
            .set("current_event", &outline.node(node).text)
            .set("current_scene", &outline.node(node).scene)
    }

    async fn generate_event(
        &self,
        plan: &Plan,
        parent: NodeIndex,
        child: NodeIndex,
        depth_0: bool,
    ) -> Result<(String, bool), ApiError> {
        let (stage, key) = if depth_0 {
            (&self.config.event_depth_0, "plan.outline.event_depth_0")
        } else {
            (&self.config.event, "plan.outline.event")
        };
        let outline = &plan.outline;

        let predecessor_text = outline
            .predecessor(child)
            .map(|p| outline.node(p).text.clone())
            .unwrap_or_default();
        let predecessor_info = if outline.children(parent).len() == 1 {
            format!("describing the beginning of \"{}\"", predecessor_text)
        } else {
            format!(
                "describing the conclusion of \"{}\" after \"{}\"",
                outline.node(parent).text,
                predecessor_text
            )
        };
        let successor_info = match outline.successor(child) {
            Some(successor) => format!("but before \"{}\"", outline.node(successor).text),
            None => STORY_CONCLUSION_INFO.to_string(),
        };

        let vars = self
            .node_vars(plan, child, stage)
            .set("predecessor_info", predecessor_info)
            .set("successor_info", successor_info)
            .set("preferred_max_children", self.config.preferred_max_children);

        let marker = format!("\n{}", outline.number(child, 0, 1).trim());
        let current_number = outline.number(child, 0, 0).trim().to_string();

        let existing: Vec<String> = outline
            .depth_first(outline.root(), false, None)
            .map(|ix| outline.node(ix).text.clone())
            .collect();
        let max_tokens = stage.sampling.max_tokens_or(64) as usize;
        let filter = self
            .ctx
            .filters
            .token_band(0, max_tokens)?
            .and(forbidden_substrings(OUTLINE_FORBIDDEN))
            .and(novelty(existing, self.config.novelty_threshold))
            .and(non_empty())
            .on_first::<bool>();

        self.ctx
            .generate_one(
                key,
                &vars,
                &stage.sampling,
                each(|text: String| postprocess_event(&text, &marker, &current_number)),
                &filter,
                &RetryPolicy::attempts(stage.max_attempts),
            )
            .await
    }

    async fn generate_scene(&self, plan: &Plan, node: NodeIndex) -> Result<String, ApiError> {
        let stage = &self.config.scene;
        let vars = self.node_vars(plan, node, stage);
        let max_tokens = stage.sampling.max_tokens_or(32) as usize;
        let filter = self
            .ctx
            .filters
            .min_max_tokens(0, max_tokens)?
            .and(forbidden_substrings(OUTLINE_FORBIDDEN))
            .map(String::as_str);
        self.ctx
            .generate_one(
                "plan.outline.scene",
                &vars,
                &stage.sampling,
                each(|text: String| postprocess_scene(&text)),
                &filter,
                &RetryPolicy::attempts(stage.max_attempts),
            )
            .await
    }

    /// Entities appearing in the event. Falls back to the predecessor's list
    /// when the retry budget runs out.
    async fn generate_entities(
        &self,
        plan: &Plan,
        node: NodeIndex,
        depth_0: bool,
    ) -> Result<Vec<String>, ApiError> {
        let (stage, key) = if depth_0 {
            (&self.config.entity_depth_0, "plan.outline.entity_depth_0")
        } else {
            (&self.config.entity, "plan.outline.entity")
        };
        let detected = plan.entities.detect_in(&plan.outline.node(node).text);
        let detected_entities = if detected.is_empty() {
            String::new()
        } else {
            format!(" {}", detected.join(", "))
        };
        let vars = self
            .node_vars(plan, node, stage)
            .set("detected_entities", detected_entities);
        let filter: Filter<Vec<String>> = Filter::new(|names: &Vec<String>| !names.is_empty());

        let result = self
            .ctx
            .generate_one(
                key,
                &vars,
                &stage.sampling,
                each(|text: String| postprocess_entities(&text, &plan.entities, &detected)),
                &filter,
                &RetryPolicy::attempts(stage.max_attempts),
            )
            .await;

        match result {
            Ok(names) => Ok(names),
            Err(ApiError::RetriesExhausted { attempts, .. }) => {
                let fallback = plan
                    .outline
                    .predecessor(node)
                    .map(|p| plan.outline.node(p).entities.clone())
                    .unwrap_or_default();
                warn!(
                    attempts,
                    fallback = ?fallback,
                    "No valid entity list; reusing the previous node's entities"
                );
                Ok(fallback)
            }
            Err(e) => Err(e),
        }
    }
}

/// Clean a raw event completion. Returns the event text and whether the model
/// started another sibling (`marker` is the next sibling's number).
pub fn postprocess_event(raw: &str, marker: &str, current_number: &str) -> (String, bool) {
    let mut event = raw.to_string();
    while event.contains("\n ") || event.contains("\n\t") {
        event = event.replace("\n ", "\n").replace("\n\t", "\n");
    }
    let has_next = event.contains(marker);
    let mut event = event
        .split(marker)
        .next()
        .unwrap_or_default()
        .trim_end()
        .to_string();

    let trimmed = event.trim_start();
    if trimmed.starts_with('[') {
        if let Some(close) = trimmed.find(']') {
            event = trimmed[close + 1..].to_string();
        }
    }
    let event = event.trim_start().trim_start_matches(':').trim_start();
    let event = event.lines().next().unwrap_or_default();
    let event = cut_at(event, "(");
    let event = cut_at(event, "Scene:");
    let event = cut_at(event, "Characters:");
    let mut event = event.trim().to_string();

    if let Some(last) = event.chars().last() {
        if !matches!(last, '.' | '?' | '!') {
            if last.is_ascii_punctuation() {
                event.clear();
            } else {
                event.push('.');
            }
        }
    }

    if let Some(first_word) = event.split_whitespace().next() {
        if first_word.contains(current_number) {
            event = event[first_word.len()..].trim_start().to_string();
        }
    }
    (event, has_next)
}

/// Clean a raw scene completion to one short location phrase.
pub fn postprocess_scene(raw: &str) -> String {
    let scene = raw.trim_start().lines().next().unwrap_or_default();
    let scene = cut_at(scene, "Characters:");
    let scene = scene.rsplit("Scene:").next().unwrap_or_default();
    let scene = cut_at(scene, "\"");
    scene.trim().to_string()
}

/// Parse a comma-separated entity list, keeping known names only. Names
/// already detected in the event text come first.
pub fn postprocess_entities(raw: &str, entities: &EntityList, detected: &[String]) -> Vec<String> {
    let line = raw.trim().lines().next().unwrap_or_default().trim_end();
    let line = line.strip_suffix('.').unwrap_or(line);
    let mut names: Vec<String> = detected.to_vec();
    for name in line.split(", ").map(str::trim) {
        if entities.contains(name) && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

fn cut_at<'s>(text: &'s str, pattern: &str) -> &'s str {
    text.split(pattern).next().unwrap_or_default().trim_end()
}
