//! OpenAI-compatible HTTP generator
//!
//! Speaks the `/v1/completions` and `/v1/chat/completions` protocol used by
//! both the hosted OpenAI API and self-hosted vllm servers.

use super::{
    ChatMessage, Completion, GenerationOutput, MessageRole, PromptBody, RenderedPrompt,
    SamplingConfig, ServerConfig, ServerType, TextGenerator,
};
use crate::error::ApiError;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, warn};

const HTTP_CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HTTP_REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    #[serde(flatten)]
    params: SamplingParams<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<u32>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage<'a>>,
    #[serde(flatten)]
    params: SamplingParams<'a>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logprobs: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_logprobs: Option<u32>,
}

#[derive(Serialize)]
struct SamplingParams<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    frequency_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    presence_penalty: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    n: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    logit_bias: Option<&'a BTreeMap<String, f32>>,
}

#[derive(Serialize)]
struct WireMessage<'a> {
    role: &'static str,
    content: &'a str,
}

#[derive(Deserialize)]
struct CompletionResponse {
    choices: Vec<CompletionChoice>,
}

#[derive(Deserialize)]
struct CompletionChoice {
    text: String,
    finish_reason: Option<String>,
    #[serde(default)]
    logprobs: Option<CompletionLogprobs>,
}

#[derive(Deserialize)]
struct CompletionLogprobs {
    #[serde(default)]
    top_logprobs: Vec<Option<BTreeMap<String, f64>>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
    finish_reason: Option<String>,
    #[serde(default)]
    logprobs: Option<ChatLogprobs>,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct ChatLogprobs {
    #[serde(default)]
    content: Option<Vec<ChatTokenLogprob>>,
}

#[derive(Deserialize)]
struct ChatTokenLogprob {
    #[serde(default)]
    top_logprobs: Vec<TopLogprob>,
}

#[derive(Deserialize)]
struct TopLogprob {
    token: String,
    logprob: f64,
}

fn role_to_string(role: MessageRole) -> &'static str {
    match role {
        MessageRole::System => "system",
        MessageRole::User => "user",
        MessageRole::Assistant => "assistant",
    }
}

fn map_http_error(error: reqwest::Error) -> ApiError {
    if let Some(status) = error.status() {
        map_status(status, &error.to_string())
    } else if error.is_timeout() {
        ApiError::ProviderRequestFailed(format!("Request timeout: {}", error))
    } else if error.is_connect() {
        ApiError::ProviderRequestFailed(format!("Connection error: {}", error))
    } else {
        ApiError::ProviderError(format!("HTTP error: {}", error))
    }
}

fn map_status(status: StatusCode, body: &str) -> ApiError {
    match status.as_u16() {
        401 => ApiError::ProviderAuthFailed(format!("Authentication failed: {}", body)),
        429 => ApiError::ProviderRateLimit(format!("Rate limit exceeded: {}", body)),
        404 => ApiError::ProviderModelNotFound(format!("Model not found: {}", body)),
        _ => ApiError::ProviderRequestFailed(format!(
            "Request failed with status {}: {}",
            status, body
        )),
    }
}

fn build_http_client() -> Result<Client, ApiError> {
    Client::builder()
        .no_proxy()
        .connect_timeout(HTTP_CONNECT_TIMEOUT)
        .timeout(HTTP_REQUEST_TIMEOUT)
        .build()
        .map_err(|e| ApiError::ProviderError(format!("Failed to create HTTP client: {}", e)))
}

/// Generator for OpenAI-compatible servers
pub struct OpenAiCompatibleGenerator {
    client: Client,
    base_url: String,
    api_key: String,
    default_model: String,
    server_type: ServerType,
    time_limit: Duration,
    warned_logit_bias: AtomicBool,
}

impl OpenAiCompatibleGenerator {
    pub fn new(server: &ServerConfig, api_key: String) -> Result<Self, ApiError> {
        Ok(Self {
            client: build_http_client()?,
            base_url: server.base_url(),
            api_key,
            default_model: server.default_model.clone(),
            server_type: server.server_type,
            time_limit: Duration::from_secs(server.timeout_secs),
            warned_logit_bias: AtomicBool::new(false),
        })
    }

    fn sampling_params<'a>(&self, sampling: &'a SamplingConfig) -> SamplingParams<'a> {
        let mut logit_bias = sampling.logit_bias.as_ref();
        if self.server_type == ServerType::Vllm && logit_bias.is_some() {
            if !self.warned_logit_bias.swap(true, Ordering::Relaxed) {
                warn!("Logit bias is not supported for vllm servers; ignoring it");
            }
            logit_bias = None;
        }
        SamplingParams {
            max_tokens: sampling.max_tokens,
            temperature: sampling.temperature,
            top_p: sampling.top_p,
            frequency_penalty: sampling.frequency_penalty,
            presence_penalty: sampling.presence_penalty,
            stop: sampling.stop.as_deref(),
            n: sampling.n,
            logit_bias,
        }
    }

    async fn post(&self, path: &str, body: &impl Serialize) -> Result<serde_json::Value, ApiError> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .map_err(map_http_error)?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            return Err(map_status(status, &error_text));
        }

        response
            .json()
            .await
            .map_err(|e| ApiError::ProviderError(format!("Failed to parse response: {}", e)))
    }

    async fn complete_text(
        &self,
        model: &str,
        prompt: &str,
        sampling: &SamplingConfig,
    ) -> Result<GenerationOutput, ApiError> {
        let request = CompletionRequest {
            model,
            prompt,
            params: self.sampling_params(sampling),
            logprobs: sampling.logprobs,
        };
        let raw = self.post("completions", &request).await?;
        let parsed: CompletionResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::ProviderError(format!("Unexpected completion body: {}", e)))?;

        let completions = parsed
            .choices
            .into_iter()
            .map(|choice| Completion {
                text: choice.text,
                finish_reason: choice.finish_reason,
                top_logprobs: choice
                    .logprobs
                    .map(|lp| {
                        lp.top_logprobs
                            .into_iter()
                            .map(|position| position.unwrap_or_default().into_iter().collect())
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        Ok(GenerationOutput { completions, raw })
    }

    async fn complete_chat(
        &self,
        model: &str,
        messages: &[ChatMessage],
        sampling: &SamplingConfig,
    ) -> Result<GenerationOutput, ApiError> {
        let request = ChatRequest {
            model,
            messages: messages
                .iter()
                .map(|m| WireMessage {
                    role: role_to_string(m.role),
                    content: &m.content,
                })
                .collect(),
            params: self.sampling_params(sampling),
            logprobs: sampling.logprobs.map(|_| true),
            top_logprobs: sampling.logprobs,
        };
        let raw = self.post("chat/completions", &request).await?;
        let parsed: ChatResponse = serde_json::from_value(raw.clone())
            .map_err(|e| ApiError::ProviderError(format!("Unexpected chat body: {}", e)))?;

        let completions = parsed
            .choices
            .into_iter()
            .map(|choice| Completion {
                text: choice.message.content.unwrap_or_default(),
                finish_reason: choice.finish_reason,
                top_logprobs: choice
                    .logprobs
                    .and_then(|lp| lp.content)
                    .map(|tokens| {
                        tokens
                            .into_iter()
                            .map(|t| {
                                t.top_logprobs
                                    .into_iter()
                                    .map(|alt| (alt.token, alt.logprob))
                                    .collect()
                            })
                            .collect()
                    })
                    .unwrap_or_default(),
            })
            .collect();
        Ok(GenerationOutput { completions, raw })
    }
}

#[async_trait]
impl TextGenerator for OpenAiCompatibleGenerator {
    async fn generate(
        &self,
        prompt: &RenderedPrompt,
        sampling: &SamplingConfig,
    ) -> Result<GenerationOutput, ApiError> {
        let model = sampling.model.as_deref().unwrap_or(&self.default_model);
        debug!(template = %prompt.template, model, prompt = %prompt.as_text(), "Sending prompt");

        let call = async {
            match &prompt.body {
                PromptBody::Text(text) => self.complete_text(model, text, sampling).await,
                PromptBody::Chat(messages) => self.complete_chat(model, messages, sampling).await,
            }
        };
        let output = tokio::time::timeout(self.time_limit, call)
            .await
            .map_err(|_| ApiError::ProviderTimeout(self.time_limit.as_secs()))??;

        if let Some(first) = output.completions.first() {
            debug!(template = %prompt.template, completion = %first.text, "Received completion");
        }
        Ok(output)
    }

    fn provider_name(&self) -> &str {
        match self.server_type {
            ServerType::OpenAI => "openai",
            ServerType::Vllm => "vllm",
        }
    }
}
