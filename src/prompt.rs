//! Prompt Templates
//!
//! Templates are loaded from a nested JSON document. Any object carrying an
//! `instruction` key is a template; the path of keys leading to it becomes its
//! dotted name (`plan.outline.event`). `{name}` placeholders are filled from a
//! [`PromptVars`] map and the result is laid out for the configured
//! [`PromptFormat`].

use crate::error::ApiError;
use crate::provider::{ChatMessage, MessageRole, PromptBody, PromptFormat, RenderedPrompt};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::warn;

const DEFAULT_PROMPTS: &str = include_str!("../prompts/default.json");

/// Every template key the generation pipeline renders.
pub const REQUIRED_TEMPLATES: &[&str] = &[
    "premise.title",
    "premise.premise",
    "plan.setting",
    "plan.entity.name",
    "plan.entity.description",
    "plan.outline.event_depth_0",
    "plan.outline.event",
    "plan.outline.scene",
    "plan.outline.entity_depth_0",
    "plan.outline.entity",
    "story.summary",
    "story.passage",
    "story.score.coherence",
    "story.score.relevance",
    "story.score.commentary",
];

/// One prompt template
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct PromptTemplate {
    pub instruction: String,
    #[serde(default)]
    pub system_message: Option<String>,
    /// Text the response is expected to start with
    #[serde(default)]
    pub response_prefix: Option<String>,
    /// Text prepended to every completion after generation
    #[serde(default)]
    pub output_prefix: Option<String>,
}

/// Placeholder values for a template.
#[derive(Debug, Clone, Default)]
pub struct PromptVars(BTreeMap<String, String>);

impl PromptVars {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, name: &str, value: impl ToString) -> Self {
        self.0.insert(name.to_string(), value.to_string());
        self
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.0.get(name).map(String::as_str)
    }
}

/// Substitute `{name}` placeholders. `{{` and `}}` are literal braces; unknown
/// placeholders are left untouched.
pub fn fill(template: &str, vars: &PromptVars) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(pos) = rest.find(['{', '}']) {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];
        if tail.starts_with("{{") {
            out.push('{');
            rest = &tail[2..];
        } else if tail.starts_with("}}") {
            out.push('}');
            rest = &tail[2..];
        } else if tail.starts_with('{') {
            match tail[1..].find('}') {
                Some(end) => {
                    let name = &tail[1..end + 1];
                    let is_ident = !name.is_empty()
                        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
                    match vars.get(name) {
                        Some(value) if is_ident => out.push_str(value),
                        _ => out.push_str(&tail[..end + 2]),
                    }
                    rest = &tail[end + 2..];
                }
                None => {
                    out.push_str(tail);
                    rest = "";
                }
            }
        } else {
            out.push('}');
            rest = &tail[1..];
        }
    }
    out.push_str(rest);
    out
}

/// A loaded, flattened set of templates.
#[derive(Debug)]
pub struct PromptSet {
    templates: BTreeMap<String, PromptTemplate>,
    warned_response_prefix: AtomicBool,
}

impl PromptSet {
    /// The built-in templates.
    pub fn default_set() -> Result<Self, ApiError> {
        Self::from_json_str(DEFAULT_PROMPTS)
    }

    pub fn load(path: &Path) -> Result<Self, ApiError> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            ApiError::ConfigError(format!("Failed to read prompt file {}: {}", path.display(), e))
        })?;
        Self::from_json_str(&contents)
    }

    /// Built-in templates unless an override file is given.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self, ApiError> {
        match path {
            Some(path) => Self::load(path),
            None => Self::default_set(),
        }
    }

    pub fn from_json_str(json: &str) -> Result<Self, ApiError> {
        let document: serde_json::Value = serde_json::from_str(json)
            .map_err(|e| ApiError::ConfigError(format!("Invalid prompt document: {}", e)))?;
        let mut templates = BTreeMap::new();
        collect_templates(&document, "", &mut templates)?;
        Ok(Self {
            templates,
            warned_response_prefix: AtomicBool::new(false),
        })
    }

    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn get(&self, key: &str) -> Result<&PromptTemplate, ApiError> {
        self.templates
            .get(key)
            .ok_or_else(|| ApiError::ConfigError(format!("Missing prompt template '{}'", key)))
    }

    /// Fail unless every key in `keys` has a template.
    pub fn require(&self, keys: &[&str]) -> Result<(), ApiError> {
        let missing: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|k| !self.templates.contains_key(*k))
            .collect();
        if missing.is_empty() {
            Ok(())
        } else {
            Err(ApiError::ConfigError(format!(
                "Missing prompt templates: {}",
                missing.join(", ")
            )))
        }
    }

    /// Fill the template at `key` and lay it out for `format`.
    pub fn render(
        &self,
        key: &str,
        vars: &PromptVars,
        format: PromptFormat,
    ) -> Result<RenderedPrompt, ApiError> {
        let template = self.get(key)?;
        let instruction = fill(&template.instruction, vars);
        let system_message = template.system_message.as_ref().map(|s| fill(s, vars));
        let response_prefix = template.response_prefix.as_ref().map(|s| fill(s, vars));
        let output_prefix = template.output_prefix.as_ref().map(|s| fill(s, vars));

        let body = match format {
            PromptFormat::OpenAiChat => {
                let mut prompt = instruction.trim_start().to_string();
                if let Some(prefix) = &response_prefix {
                    if !self.warned_response_prefix.swap(true, Ordering::Relaxed) {
                        warn!(
                            "Response prefix is not supported for prompt format openai-chat; \
                             appending it to the instruction instead"
                        );
                    }
                    prompt.push_str(
                        "\n\n\n\nThe output is already partially generated. Continue from:\n\n",
                    );
                    prompt.push_str(prefix);
                }
                let mut messages = Vec::new();
                if let Some(system) = &system_message {
                    messages.push(ChatMessage {
                        role: MessageRole::System,
                        content: system.clone(),
                    });
                }
                messages.push(ChatMessage {
                    role: MessageRole::User,
                    content: prompt,
                });
                PromptBody::Chat(messages)
            }
            PromptFormat::Llama2Chat => {
                let mut prompt = String::from("[INST]");
                match &system_message {
                    Some(system) => {
                        prompt.push_str(" <<SYS>>\n");
                        prompt.push_str(system);
                        prompt.push_str("\n<</SYS>>\n\n");
                    }
                    None => prompt.push(' '),
                }
                prompt.push_str(&instruction);
                prompt.push_str(if instruction.ends_with(' ') {
                    "[/INST]"
                } else {
                    " [/INST]"
                });
                if let Some(prefix) = &response_prefix {
                    if !prefix.starts_with(' ') {
                        prompt.push(' ');
                    }
                    prompt.push_str(prefix);
                }
                PromptBody::Text(prompt)
            }
            PromptFormat::None => {
                let mut prompt = instruction.trim_start().to_string();
                if let Some(system) = &system_message {
                    prompt = format!("{}\n\n\n\n{}", system, prompt);
                }
                if let Some(prefix) = &response_prefix {
                    prompt = format!("{}\n\n\n\n{}", prompt, prefix);
                }
                PromptBody::Text(prompt)
            }
        };

        Ok(RenderedPrompt {
            template: key.to_string(),
            body,
            response_prefix,
            output_prefix,
        })
    }
}

fn collect_templates(
    value: &serde_json::Value,
    path: &str,
    out: &mut BTreeMap<String, PromptTemplate>,
) -> Result<(), ApiError> {
    let object = value.as_object().ok_or_else(|| {
        ApiError::ConfigError(format!(
            "Prompt entry '{}' must be an object",
            if path.is_empty() { "<root>" } else { path }
        ))
    })?;
    if object.contains_key("instruction") {
        let template: PromptTemplate = serde_json::from_value(value.clone()).map_err(|e| {
            ApiError::ConfigError(format!("Invalid prompt template '{}': {}", path, e))
        })?;
        out.insert(path.to_string(), template);
        return Ok(());
    }
    for (key, child) in object {
        let child_path = if path.is_empty() {
            key.clone()
        } else {
            format!("{}.{}", path, key)
        };
        collect_templates(child, &child_path, out)?;
    }
    Ok(())
}
