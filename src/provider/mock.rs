//! Mock generator for unit tests.

use super::{Completion, GenerationOutput, RenderedPrompt, SamplingConfig, TextGenerator};
use crate::error::ApiError;
use async_trait::async_trait;
use parking_lot::Mutex;

type Handler =
    dyn Fn(&RenderedPrompt, &SamplingConfig) -> Result<GenerationOutput, ApiError> + Send + Sync;

/// Answers every call through a handler closure and records what it was asked.
pub struct MockGenerator {
    handler: Box<Handler>,
    calls: Mutex<Vec<(RenderedPrompt, SamplingConfig)>>,
}

impl MockGenerator {
    pub fn with_handler<F>(handler: F) -> Self
    where
        F: Fn(&RenderedPrompt, &SamplingConfig) -> Result<GenerationOutput, ApiError>
            + Send
            + Sync
            + 'static,
    {
        Self {
            handler: Box::new(handler),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Replays `responses` in order, one call each; errors once they run out.
    pub fn scripted(responses: Vec<Vec<&str>>) -> Self {
        let queue: Mutex<std::collections::VecDeque<Vec<String>>> = Mutex::new(
            responses
                .into_iter()
                .map(|texts| texts.into_iter().map(str::to_string).collect())
                .collect(),
        );
        Self::with_handler(move |_, _| match queue.lock().pop_front() {
            Some(texts) => Ok(GenerationOutput::new(
                texts.into_iter().map(Completion::new).collect(),
            )),
            None => Err(ApiError::ProviderRequestFailed("script exhausted".to_string())),
        })
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Template keys of every call so far, in order.
    pub fn templates(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .map(|(prompt, _)| prompt.template.clone())
            .collect()
    }

    pub fn prompts_for(&self, template: &str) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter(|(prompt, _)| prompt.template == template)
            .map(|(prompt, _)| prompt.as_text())
            .collect()
    }
}

#[async_trait]
impl TextGenerator for MockGenerator {
    async fn generate(
        &self,
        prompt: &RenderedPrompt,
        sampling: &SamplingConfig,
    ) -> Result<GenerationOutput, ApiError> {
        self.calls.lock().push((prompt.clone(), sampling.clone()));
        (self.handler)(prompt, sampling)
    }

    fn provider_name(&self) -> &str {
        "mock"
    }
}
