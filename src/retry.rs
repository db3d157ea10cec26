//! Bounded Retry
//!
//! One combinator for "generate, post-process, filter; retry up to N times".
//! Transport failures, timeouts and calls whose every candidate was filtered
//! out each consume one attempt. Non-transient errors (bad credentials,
//! unknown model) are returned at once since retrying cannot fix them.

use crate::error::ApiError;
use crate::filter::Filter;
use crate::provider::{GenerationOutput, RenderedPrompt, SamplingConfig, TextGenerator};
use std::time::Duration;
use tracing::{debug, error, warn};

/// Default attempt budget for a single generation step.
pub const DEFAULT_MAX_ATTEMPTS: usize = 5;

/// Retry budget and acceptance rules for one call site
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    /// Accept a call even when every candidate was filtered out
    pub empty_ok: bool,
    /// Per-call limit on top of the generator's own
    pub time_limit: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            empty_ok: false,
            time_limit: None,
        }
    }
}

impl RetryPolicy {
    pub fn attempts(max_attempts: usize) -> Self {
        Self {
            max_attempts,
            ..Self::default()
        }
    }

    pub fn allow_empty(mut self) -> Self {
        self.empty_ok = true;
        self
    }

    pub fn with_time_limit(mut self, limit: Duration) -> Self {
        self.time_limit = Some(limit);
        self
    }
}

/// Candidates that survived post-processing and filtering, plus the call that produced them.
#[derive(Debug, Clone)]
pub struct Accepted<T> {
    pub items: Vec<T>,
    pub output: GenerationOutput,
}

impl<T> Accepted<T> {
    /// The first accepted candidate. Only empty under an `empty_ok` policy.
    pub fn into_first(self, operation: &str) -> Result<T, ApiError> {
        self.items
            .into_iter()
            .next()
            .ok_or_else(|| ApiError::RetriesExhausted {
                operation: operation.to_string(),
                attempts: 1,
            })
    }
}

/// Post-processor that maps each completion text independently.
pub fn each<T, F>(f: F) -> impl Fn(Vec<String>, &GenerationOutput) -> Vec<T>
where
    F: Fn(String) -> T,
{
    move |texts, _| texts.into_iter().map(&f).collect()
}

/// Post-processor that keeps the texts as they are.
pub fn identity() -> impl Fn(Vec<String>, &GenerationOutput) -> Vec<String> {
    |texts, _| texts
}

/// Generate with `generator`, then post-process and filter, retrying per `policy`.
pub async fn call_with_retry<T, P>(
    generator: &dyn TextGenerator,
    prompt: &RenderedPrompt,
    sampling: &SamplingConfig,
    postprocess: P,
    filter: &Filter<T>,
    policy: &RetryPolicy,
) -> Result<Accepted<T>, ApiError>
where
    T: 'static,
    P: Fn(Vec<String>, &GenerationOutput) -> Vec<T>,
{
    for attempt in 1..=policy.max_attempts {
        let call = generator.generate(prompt, sampling);
        let result = match policy.time_limit {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result,
                Err(_) => Err(ApiError::ProviderTimeout(limit.as_secs())),
            },
            None => call.await,
        };

        let output = match result {
            Ok(output) => output,
            Err(e) if e.is_transient() => {
                warn!(
                    template = %prompt.template,
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %e,
                    "Generation call failed, retrying"
                );
                continue;
            }
            Err(e) => return Err(e),
        };

        let texts: Vec<String> = output
            .completions
            .iter()
            .map(|c| prompt.finish_completion(&c.text))
            .collect();
        let items: Vec<T> = postprocess(texts, &output)
            .into_iter()
            .filter(|item| filter.check(item))
            .collect();

        if !items.is_empty() || policy.empty_ok {
            debug!(template = %prompt.template, attempt, accepted = items.len(), "Accepted candidates");
            return Ok(Accepted { items, output });
        }
        warn!(
            template = %prompt.template,
            attempt,
            max_attempts = policy.max_attempts,
            "No candidate passed the filters, retrying"
        );
    }

    error!(
        template = %prompt.template,
        attempts = policy.max_attempts,
        "Failed to get a valid completion"
    );
    Err(ApiError::RetriesExhausted {
        operation: prompt.template.clone(),
        attempts: policy.max_attempts,
    })
}
