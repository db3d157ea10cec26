//! Text Generation Provider
//!
//! The remote text-generation service is the sole source of story content.
//! Everything above this module talks to it through the [`TextGenerator`]
//! trait: a fully rendered prompt plus a sampling configuration in, an ordered
//! list of candidate completions out. A single call may fail transiently;
//! callers apply their own retry budget (see [`crate::retry`]).

use crate::error::ApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

pub mod openai;

#[cfg(test)]
pub(crate) mod mock;

pub use openai::OpenAiCompatibleGenerator;

/// Kind of server behind the OpenAI-compatible endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ServerType {
    #[serde(rename = "openai")]
    OpenAI,
    #[serde(rename = "vllm")]
    Vllm,
}

/// Connection settings for the text-generation service
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_type")]
    pub server_type: ServerType,

    /// Host of a self-hosted server, scheme included (vllm only)
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    /// Base URL used for the hosted OpenAI API
    #[serde(default = "default_openai_base_url")]
    pub openai_base_url: String,

    /// Environment variable holding the API key (openai only)
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,

    /// Model used when a sampling section names none
    #[serde(default = "default_model")]
    pub default_model: String,

    /// Per-call time limit in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Tokenizer used for token-count filters: `whitespace` or a BPE encoding name
    #[serde(default = "default_tokenizer")]
    pub tokenizer: String,
}

fn default_server_type() -> ServerType {
    ServerType::OpenAI
}

fn default_host() -> String {
    "http://localhost".to_string()
}

fn default_port() -> u16 {
    8000
}

fn default_openai_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}

fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}

fn default_model() -> String {
    "gpt-3.5-turbo-instruct".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_tokenizer() -> String {
    "gpt2".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            server_type: default_server_type(),
            host: default_host(),
            port: default_port(),
            openai_base_url: default_openai_base_url(),
            api_key_env: default_api_key_env(),
            default_model: default_model(),
            timeout_secs: default_timeout_secs(),
            tokenizer: default_tokenizer(),
        }
    }
}

impl ServerConfig {
    /// Root of the `/v1` API for this server.
    pub fn base_url(&self) -> String {
        match self.server_type {
            ServerType::OpenAI => self.openai_base_url.trim_end_matches('/').to_string(),
            ServerType::Vllm => format!("{}:{}/v1", self.host.trim_end_matches('/'), self.port),
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.default_model.trim().is_empty() {
            return Err("default_model cannot be empty".to_string());
        }
        if self.timeout_secs == 0 {
            return Err("timeout_secs must be at least 1".to_string());
        }
        if self.server_type == ServerType::Vllm
            && !(self.host.starts_with("http://") || self.host.starts_with("https://"))
        {
            return Err(format!("host must include a scheme, got '{}'", self.host));
        }
        Ok(())
    }
}

/// How a filled template is laid out for the model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PromptFormat {
    #[serde(rename = "openai-chat")]
    OpenAiChat,
    #[serde(rename = "llama2-chat")]
    Llama2Chat,
    #[default]
    #[serde(rename = "none")]
    None,
}

/// Chat message role
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    System,
    User,
    Assistant,
}

/// Chat message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: MessageRole,
    pub content: String,
}

/// Request body handed to the generator.
#[derive(Debug, Clone, PartialEq)]
pub enum PromptBody {
    Text(String),
    Chat(Vec<ChatMessage>),
}

/// A prompt ready to send, plus the bits needed to clean up its completions.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedPrompt {
    /// Dotted template key this prompt was rendered from
    pub template: String,
    pub body: PromptBody,
    pub response_prefix: Option<String>,
    pub output_prefix: Option<String>,
}

impl RenderedPrompt {
    /// Plain text prompt with no prefixes, mostly for ad-hoc calls.
    pub fn text(template: &str, text: impl Into<String>) -> Self {
        Self {
            template: template.to_string(),
            body: PromptBody::Text(text.into()),
            response_prefix: None,
            output_prefix: None,
        }
    }

    /// Full prompt text, chat messages concatenated.
    pub fn as_text(&self) -> String {
        match &self.body {
            PromptBody::Text(text) => text.clone(),
            PromptBody::Chat(messages) => messages
                .iter()
                .map(|m| m.content.as_str())
                .collect::<Vec<_>>()
                .join("\n\n"),
        }
    }

    /// Strip an echoed response prefix (chat prompts only), then apply the output prefix.
    pub fn finish_completion(&self, text: &str) -> String {
        let mut text = text.to_string();
        if let (PromptBody::Chat(_), Some(prefix)) = (&self.body, &self.response_prefix) {
            if let Some(rest) = text.strip_prefix(prefix.as_str()) {
                text = rest.to_string();
            }
        }
        if let Some(prefix) = &self.output_prefix {
            text = format!("{} {}", prefix.trim_end(), text.trim_start());
        }
        text
    }
}

/// Sampling parameters for one generation call
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct SamplingConfig {
    /// Target model; falls back to the server's default model
    #[serde(default)]
    pub model: Option<String>,

    #[serde(default)]
    pub prompt_format: PromptFormat,

    #[serde(default)]
    pub max_tokens: Option<u32>,

    #[serde(default)]
    pub temperature: Option<f32>,

    #[serde(default)]
    pub top_p: Option<f32>,

    #[serde(default)]
    pub frequency_penalty: Option<f32>,

    #[serde(default)]
    pub presence_penalty: Option<f32>,

    #[serde(default)]
    pub stop: Option<Vec<String>>,

    /// Number of candidates per call
    #[serde(default)]
    pub n: Option<u32>,

    /// Token id -> bias. Not every backend supports it.
    #[serde(default)]
    pub logit_bias: Option<BTreeMap<String, f32>>,

    /// Number of top alternatives to return per generated token
    #[serde(default)]
    pub logprobs: Option<u32>,
}

impl SamplingConfig {
    pub fn with_max_tokens(max_tokens: u32) -> Self {
        Self {
            max_tokens: Some(max_tokens),
            ..Self::default()
        }
    }

    pub fn temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn candidates(mut self, n: u32) -> Self {
        self.n = Some(n);
        self
    }

    pub fn stop(mut self, stop: &[&str]) -> Self {
        self.stop = Some(stop.iter().map(|s| s.to_string()).collect());
        self
    }

    pub fn logprobs(mut self, logprobs: u32) -> Self {
        self.logprobs = Some(logprobs);
        self
    }

    /// Max tokens, or `fallback` when unset.
    pub fn max_tokens_or(&self, fallback: u32) -> u32 {
        self.max_tokens.unwrap_or(fallback)
    }
}

/// One candidate completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Completion {
    pub text: String,

    /// `length` when the generation hit its token cap
    pub finish_reason: Option<String>,

    /// Per generated token position, the top alternatives and their log-probabilities
    #[serde(default)]
    pub top_logprobs: Vec<Vec<(String, f64)>>,
}

impl Completion {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            finish_reason: Some("stop".to_string()),
            top_logprobs: Vec::new(),
        }
    }

    pub fn stopped_at_length(&self) -> bool {
        self.finish_reason.as_deref() == Some("length")
    }
}

/// Completions of one call, in service order, plus the raw response body.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationOutput {
    pub completions: Vec<Completion>,
    pub raw: serde_json::Value,
}

impl GenerationOutput {
    pub fn new(completions: Vec<Completion>) -> Self {
        Self {
            completions,
            raw: serde_json::Value::Null,
        }
    }

    pub fn texts(&self) -> Vec<String> {
        self.completions.iter().map(|c| c.text.clone()).collect()
    }
}

/// Text generation service
#[async_trait]
pub trait TextGenerator: Send + Sync {
    /// Generate candidate completions for a rendered prompt.
    async fn generate(
        &self,
        prompt: &RenderedPrompt,
        sampling: &SamplingConfig,
    ) -> Result<GenerationOutput, ApiError>;

    /// Get the provider name
    fn provider_name(&self) -> &str;
}

/// Builds the generator named by the server configuration.
pub struct GeneratorFactory;

impl GeneratorFactory {
    pub fn create(server: &ServerConfig) -> Result<Arc<dyn TextGenerator>, ApiError> {
        let api_key = match server.server_type {
            ServerType::OpenAI => std::env::var(&server.api_key_env).map_err(|_| {
                ApiError::ProviderAuthFailed(format!(
                    "Environment variable {} is not set",
                    server.api_key_env
                ))
            })?,
            ServerType::Vllm => "EMPTY".to_string(),
        };
        Ok(Arc::new(OpenAiCompatibleGenerator::new(server, api_key)?))
    }
}
