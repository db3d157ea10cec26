//! Story Plan
//!
//! A plan ties together a premise, a setting, the entity list and the outline
//! tree. It is the handoff between the plan phase and the story phase and is
//! persisted as one JSON document.

pub mod entity;
pub mod outline;
pub mod premise;

pub use entity::{Entity, EntityList};
pub use outline::{ContextPolicy, NodeId, NodeIndex, OutlineDocument, OutlineNode, OutlineTree};
pub use premise::Premise;

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Plan {
    pub premise: Premise,
    #[serde(default)]
    pub setting: String,
    #[serde(default)]
    pub entities: EntityList,
    #[serde(default)]
    pub outline: OutlineTree,
}

impl Plan {
    /// A plan with only a premise; everything else is generated later.
    pub fn new(premise: Premise) -> Self {
        Self {
            premise,
            ..Self::default()
        }
    }

    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path)?;
        let plan: Plan = serde_json::from_str(&contents)?;
        plan.validate()?;
        Ok(plan)
    }

    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        write_json(path, self)
    }

    /// Every entity referenced by an outline node must exist in the entity list.
    pub fn validate(&self) -> Result<(), ApiError> {
        for ix in self.outline.all_nodes() {
            let node = self.outline.node(ix);
            if let Some(missing) = node.entities.iter().find(|e| !self.entities.contains(e)) {
                return Err(ApiError::InvalidPlan(format!(
                    "outline node {} references unknown entity '{}'",
                    node.id(),
                    missing
                )));
            }
        }
        Ok(())
    }

    /// Descriptions for the named entities, in the given order; unknown names are skipped.
    pub fn entity_descriptions(&self, names: &[String]) -> Vec<String> {
        names
            .iter()
            .filter_map(|name| self.entities.get(name))
            .map(|entity| entity.description.clone())
            .collect()
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}\n\nSetting: {}\n\n\n\nCharacters and Entities:\n\n{}\n\n\n\nOutline:\n\n{}",
            self.premise, self.setting, self.entities, self.outline
        )
    }
}

/// Pretty-print `value` as JSON to `path`, creating parent directories.
pub(crate) fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<(), ApiError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let contents = serde_json::to_string_pretty(value)?;
    std::fs::write(path, contents)?;
    Ok(())
}
