//! Prompt context for passage generation.
//!
//! Everything here is a pure function of the plan, the story so far and the
//! node being rendered. The summary of the previous node needs a model call
//! and is passed in by the renderer.

use crate::config::{RenderingPolicy, StoryConfig};
use crate::plan::{NodeId, NodeIndex, OutlineTree, Plan};
use crate::prompt::PromptVars;
use crate::story::Story;
use std::collections::HashSet;

const ENDING_INFO: &str = " This passage should end the story.";
const CONTINUING_INFO: &str =
    " Do NOT write any extra comments, suggestions, or questions at the end.";

/// Next node the rendering policy wants that has not been rendered yet.
/// The root carries no beat and is never rendered.
pub fn select_node_to_render(
    outline: &OutlineTree,
    policy: RenderingPolicy,
    rendered: &[NodeId],
) -> Option<NodeIndex> {
    let rendered: HashSet<&NodeId> = rendered.iter().collect();
    let root = outline.root();
    let unrendered = |ix: &NodeIndex| *ix != root && !rendered.contains(outline.node(*ix).id());
    match policy {
        RenderingPolicy::All => outline.depth_first(root, false, None).find(unrendered),
        RenderingPolicy::Leaves => outline.leaves(root).into_iter().find(unrendered),
    }
}

/// Context for rendering one more passage of `node` onto `story`, whose last
/// passage list already belongs to `node`.
pub struct PassageContext<'a> {
    plan: &'a Plan,
    story: &'a Story,
    node: NodeIndex,
    config: &'a StoryConfig,
    ending: bool,
}

impl<'a> PassageContext<'a> {
    pub fn new(
        plan: &'a Plan,
        story: &'a Story,
        node: NodeIndex,
        config: &'a StoryConfig,
        ending: bool,
    ) -> Self {
        Self {
            plan,
            story,
            node,
            config,
            ending,
        }
    }

    fn outline(&self) -> &'a OutlineTree {
        &self.plan.outline
    }

    /// Nodes rendered before the current one, in render order.
    fn previous_nodes(&self) -> Vec<NodeIndex> {
        let rendered = self.story.rendered_nodes();
        let count = rendered.len().saturating_sub(1);
        rendered[..count]
            .iter()
            .filter_map(|id| self.outline().find(id))
            .collect()
    }

    pub fn ancestors(&self) -> String {
        if !self.config.ancestor_nodes_in_premise {
            return String::new();
        }
        let outline = self.outline();
        let joined = outline
            .ancestors(self.node, false)
            .into_iter()
            .map(|ix| outline.node(ix).text.as_str())
            .collect::<Vec<_>>()
            .join(" ");
        let joined = joined.trim();
        if joined.is_empty() {
            String::new()
        } else {
            format!("at a high level, {} More concretely, ", joined)
        }
    }

    /// Descriptions of the current node's entities, preceded by those of the
    /// previous node when configured.
    pub fn entity_descriptions(&self) -> String {
        let current = &self.outline().node(self.node).entities;
        let previous = self
            .previous_nodes()
            .last()
            .filter(|_| self.config.previous_node_entity_descriptions)
            .map(|ix| self.outline().node(*ix).entities.clone());
        let names = match previous {
            Some(mut names) => {
                for name in current {
                    if !names.contains(name) {
                        names.push(name.clone());
                    }
                }
                names
            }
            None => current.clone(),
        };
        self.plan.entity_descriptions(&names).join(" ")
    }

    /// Beats of every earlier node, collapsed to fully rendered ancestors
    /// when configured.
    pub fn previous_node_events(&self) -> String {
        let previous = self.previous_nodes();
        if previous.is_empty() {
            return "N/A".to_string();
        }
        let nodes = if self.config.collapse_previous_events {
            collapse(self.outline(), &previous)
        } else {
            previous
        };
        nodes
            .iter()
            .map(|ix| self.outline().node(*ix).text.as_str())
            .collect::<Vec<_>>()
            .join(" ")
    }

    pub fn previous_scene_info(&self) -> String {
        match self.previous_nodes().last() {
            Some(ix) => format!(" The setting is previously {}", self.outline().node(*ix).scene),
            None => String::new(),
        }
    }

    /// The last few beats before the current one, oldest first, each followed
    /// by a space.
    pub fn previous_events(&self) -> String {
        let previous = self.previous_nodes();
        let start = previous.len().saturating_sub(self.config.include_previous_events);
        previous[start..]
            .iter()
            .map(|ix| format!("{} ", self.outline().node(*ix).text))
            .collect()
    }

    /// The next beats the rendering policy would pick, assuming the current
    /// node is finished.
    pub fn future_events(&self) -> String {
        let mut rendered = self.story.rendered_nodes();
        let mut upcoming = Vec::new();
        for _ in 0..self.config.include_next_events {
            let Some(next) =
                select_node_to_render(self.outline(), self.config.rendering_policy, &rendered)
            else {
                break;
            };
            let node = self.outline().node(next);
            upcoming.push(node.text.clone());
            rendered.push(node.id().clone());
        }
        if upcoming.is_empty() {
            String::new()
        } else {
            format!(" {}", upcoming.join(" "))
        }
    }

    /// Raw text the model continues: the chapter header for the first
    /// passage, the tail of the previous node at the start of a new node,
    /// and the current node's text otherwise.
    pub fn autoregressive_context(&self) -> String {
        match self.story.last_list() {
            Some(list) if !list.is_empty() => list.text(),
            _ => match self.story.last_passage() {
                Some(passage) => passage.text.clone(),
                None => self.config.chapter_header.clone(),
            },
        }
    }

    pub fn ending_info(&self) -> &'static str {
        if self.ending {
            ENDING_INFO
        } else {
            CONTINUING_INFO
        }
    }

    /// Variables for the `story.passage` template.
    pub fn prompt_vars(&self, previous_summary: &str) -> PromptVars {
        let node = self.outline().node(self.node);
        PromptVars::new()
            .set("premise", &self.plan.premise.premise)
            .set("ancestors", self.ancestors())
            .set("entity_descriptions", self.entity_descriptions())
            .set("previous_node_events", self.previous_node_events())
            .set("previous_summary", previous_summary)
            .set("previous_events", self.previous_events())
            .set("previous_scene_info", self.previous_scene_info())
            .set("current_event", &node.text)
            .set("future_events", self.future_events())
            .set("current_scene", &node.scene)
            .set("current_entities", node.entities.join(", "))
            .set("autoregressive_context", self.autoregressive_context())
            .set("ending_info", self.ending_info())
    }
}

/// Replace runs of rendered nodes by their highest ancestor whose leaves are
/// all rendered. A node with no such ancestor is kept as is.
fn collapse(outline: &OutlineTree, previous: &[NodeIndex]) -> Vec<NodeIndex> {
    let rendered: HashSet<NodeIndex> = previous.iter().copied().collect();
    let fully_rendered =
        |ix: NodeIndex| outline.leaves(ix).iter().all(|leaf| rendered.contains(leaf));
    let mut emitted = Vec::new();
    for &node in previous {
        let target = outline
            .ancestors(node, true)
            .into_iter()
            .filter(|ix| *ix != outline.root())
            .find(|ix| fully_rendered(*ix))
            .unwrap_or(node);
        if !emitted.contains(&target) {
            emitted.push(target);
        }
    }
    emitted
}
