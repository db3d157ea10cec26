//! Story beams: populations of stories at the same rendering progress.

use super::Story;
use crate::error::ApiError;
use crate::plan::NodeId;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// Stories that have all rendered the same number of outline nodes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<Story>", into = "Vec<Story>")]
pub struct StoryBeam {
    stories: Vec<Story>,
}

impl StoryBeam {
    /// Fails if the stories differ in rendered-node count.
    pub fn new(stories: Vec<Story>) -> Result<Self, ApiError> {
        if let Some(first) = stories.first() {
            if let Some(other) = stories.iter().find(|s| s.len() != first.len()) {
                return Err(ApiError::BeamInvariant(format!(
                    "beam mixes stories with {} and {} rendered nodes",
                    first.len(),
                    other.len()
                )));
            }
        }
        Ok(Self { stories })
    }

    pub fn single(story: Story) -> Self {
        Self {
            stories: vec![story],
        }
    }

    pub fn len(&self) -> usize {
        self.stories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stories.is_empty()
    }

    pub fn stories(&self) -> &[Story] {
        &self.stories
    }

    pub fn into_stories(self) -> Vec<Story> {
        self.stories
    }

    /// Highest-ranked story; beams are kept in descending score order.
    pub fn best(&self) -> Option<&Story> {
        self.stories.first()
    }

    /// Rendered node ids shared by every story in the beam.
    pub fn rendered_nodes(&self) -> Vec<NodeId> {
        self.best().map(Story::rendered_nodes).unwrap_or_default()
    }

    /// Keep the `width` highest-scoring stories. The sort is stable, so ties
    /// keep their original order. A single-story beam is returned as is.
    pub fn prune(self, width: usize) -> StoryBeam {
        if self.stories.len() <= 1 {
            return self;
        }
        let mut stories = self.stories;
        stories.sort_by(|a, b| compare_scores(b.final_score(), a.final_score()));
        stories.truncate(width);
        StoryBeam { stories }
    }

    /// Right-truncate every story at `stop`.
    pub fn right_truncated(&self, stop: &str, allow_delete_lists: bool) -> StoryBeam {
        StoryBeam {
            stories: self
                .stories
                .iter()
                .map(|s| s.right_truncated(stop, allow_delete_lists))
                .collect(),
        }
    }
}

fn compare_scores(a: Option<f64>, b: Option<f64>) -> Ordering {
    let a = a.unwrap_or(f64::NEG_INFINITY);
    let b = b.unwrap_or(f64::NEG_INFINITY);
    a.partial_cmp(&b).unwrap_or(Ordering::Equal)
}

impl TryFrom<Vec<Story>> for StoryBeam {
    type Error = ApiError;

    fn try_from(stories: Vec<Story>) -> Result<Self, Self::Error> {
        StoryBeam::new(stories)
    }
}

impl From<StoryBeam> for Vec<Story> {
    fn from(beam: StoryBeam) -> Self {
        beam.stories
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::story::{Passage, PassageList, TOTAL_SCORE};
    use std::collections::BTreeMap;

    fn story(texts_and_scores: &[(&str, f64)]) -> Story {
        let mut story = Story::new().copy_append_list(PassageList::new(NodeId::from("n0")));
        for (text, score) in texts_and_scores {
            let scores = BTreeMap::from([(TOTAL_SCORE.to_string(), *score)]);
            story = story
                .copy_append_passage(Passage::with_scores(*text, scores))
                .unwrap();
        }
        story
    }

    #[test]
    fn mixed_progress_is_rejected() {
        let short = story(&[("a", 1.0)]);
        let long = short.copy_append_list(PassageList::new(NodeId::from("n1")));
        let err = StoryBeam::new(vec![short, long]).unwrap_err();
        assert!(matches!(err, ApiError::BeamInvariant(_)));
    }

    #[test]
    fn prune_is_stable_and_bounded() {
        let beam = StoryBeam::new(vec![
            story(&[("low", -5.0)]),
            story(&[("tie-first", 2.0)]),
            story(&[("high", 9.0)]),
            story(&[("tie-second", 2.0)]),
        ])
        .unwrap();
        let pruned = beam.prune(3);
        let texts: Vec<String> = pruned.stories().iter().map(Story::text).collect();
        assert_eq!(texts, vec!["high", "tie-first", "tie-second"]);
    }

    #[test]
    fn deserializing_checks_the_invariant() {
        let short = story(&[("a", 1.0)]);
        let long = short.copy_append_list(PassageList::new(NodeId::from("n1")));
        let json = serde_json::to_string(&vec![short, long]).unwrap();
        assert!(serde_json::from_str::<StoryBeam>(&json).is_err());

        let beam = StoryBeam::single(story(&[("a", 1.0)]));
        let json = serde_json::to_string(&beam).unwrap();
        assert_eq!(serde_json::from_str::<StoryBeam>(&json).unwrap(), beam);
    }
}
