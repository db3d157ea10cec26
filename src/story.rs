//! Story Model
//!
//! Passages grouped per rendered outline node. Stories are persistent values:
//! appending returns a new story that shares every earlier passage list with
//! its source through `Arc`, so forking a beam costs one vector of pointers.

pub mod beam;

pub use beam::StoryBeam;

use crate::error::ApiError;
use crate::plan::NodeId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Key of the combined score in [`Passage::scores`].
pub const TOTAL_SCORE: &str = "score";

/// One block of generated prose and its scorer outputs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Passage {
    pub text: String,
    #[serde(default)]
    pub scores: BTreeMap<String, f64>,
}

impl Passage {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            scores: BTreeMap::new(),
        }
    }

    pub fn with_scores(text: impl Into<String>, scores: BTreeMap<String, f64>) -> Self {
        Self {
            text: text.into(),
            scores,
        }
    }

    /// The combined score, zero when unscored.
    pub fn score(&self) -> f64 {
        self.scores.get(TOTAL_SCORE).copied().unwrap_or(0.0)
    }
}

/// Passages rendered for one outline node.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PassageList {
    pub node: NodeId,
    #[serde(default)]
    pub passages: Vec<Arc<Passage>>,
}

impl PassageList {
    pub fn new(node: NodeId) -> Self {
        Self {
            node,
            passages: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.passages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passages.is_empty()
    }

    pub fn text(&self) -> String {
        self.passages.iter().map(|p| p.text.as_str()).collect()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Story {
    #[serde(default)]
    passage_lists: Vec<Arc<PassageList>>,
}

impl Story {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rendered nodes.
    pub fn len(&self) -> usize {
        self.passage_lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.passage_lists.is_empty()
    }

    pub fn passage_lists(&self) -> &[Arc<PassageList>] {
        &self.passage_lists
    }

    pub fn last_list(&self) -> Option<&PassageList> {
        self.passage_lists.last().map(|l| l.as_ref())
    }

    /// The list before the one currently being rendered.
    pub fn previous_list(&self) -> Option<&PassageList> {
        self.passage_lists
            .len()
            .checked_sub(2)
            .map(|i| self.passage_lists[i].as_ref())
    }

    pub fn copy_append_list(&self, list: PassageList) -> Story {
        let mut passage_lists = self.passage_lists.clone();
        passage_lists.push(Arc::new(list));
        Story { passage_lists }
    }

    /// A new story with `passage` added to the last passage list.
    pub fn copy_append_passage(&self, passage: Passage) -> Result<Story, ApiError> {
        let (last, earlier) = self.passage_lists.split_last().ok_or_else(|| {
            ApiError::BeamInvariant("cannot append a passage to a story with no passage lists".to_string())
        })?;
        let mut passages = last.passages.clone();
        passages.push(Arc::new(passage));
        let mut passage_lists = earlier.to_vec();
        passage_lists.push(Arc::new(PassageList {
            node: last.node.clone(),
            passages,
        }));
        Ok(Story { passage_lists })
    }

    /// Ids of rendered nodes, in render order.
    pub fn rendered_nodes(&self) -> Vec<NodeId> {
        self.passage_lists.iter().map(|l| l.node.clone()).collect()
    }

    pub fn passages(&self) -> impl Iterator<Item = &Passage> {
        self.passage_lists
            .iter()
            .flat_map(|l| l.passages.iter().map(|p| p.as_ref()))
    }

    pub fn last_passage(&self) -> Option<&Passage> {
        self.passages().last()
    }

    /// Combined score of the last passage of the current node, if it has one.
    pub fn final_score(&self) -> Option<f64> {
        self.last_list()
            .and_then(|list| list.passages.last())
            .map(|p| p.score())
    }

    pub fn text(&self) -> String {
        self.passages().map(|p| p.text.as_str()).collect()
    }

    /// A copy with everything after the last occurrence of `stop` removed.
    ///
    /// Passages are scanned from the end. Without `allow_delete_lists` the
    /// search stays inside the last passage list; with it, earlier lists are
    /// searched too and the lists after the match are dropped. When `stop`
    /// is never found the story is returned unchanged.
    pub fn right_truncated(&self, stop: &str, allow_delete_lists: bool) -> Story {
        for i in (0..self.passage_lists.len()).rev() {
            let list = &self.passage_lists[i];
            for j in (0..list.passages.len()).rev() {
                let passage = &list.passages[j];
                if let Some(cut) = passage.text.rfind(stop) {
                    let mut truncated = Passage::clone(passage);
                    truncated.text = passage.text[..cut].trim_end().to_string();
                    let mut passages = list.passages[..j].to_vec();
                    passages.push(Arc::new(truncated));
                    let mut passage_lists = self.passage_lists[..i].to_vec();
                    passage_lists.push(Arc::new(PassageList {
                        node: list.node.clone(),
                        passages,
                    }));
                    return Story { passage_lists };
                }
            }
            if !allow_delete_lists {
                break;
            }
        }
        debug!(stop, "Stop marker not found; story left as is");
        self.clone()
    }
}

impl fmt::Display for Story {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for passage in self.passages() {
            f.write_str(&passage.text)?;
        }
        Ok(())
    }
}
