//! Story premise: a title and a free-text pitch.

use crate::error::ApiError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Premise {
    pub title: String,
    pub premise: String,
}

impl Premise {
    pub fn new(title: impl Into<String>, premise: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            premise: premise.into(),
        }
    }

    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&contents)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), ApiError> {
        super::write_json(path, self)
    }
}

impl fmt::Display for Premise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Title: {}\n\nPremise: {}", self.title, self.premise)
    }
}
