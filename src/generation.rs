//! Shared generation plumbing: the generator, prompt templates and filter
//! factory used by every phase, plus a render-then-retry shortcut.

use crate::error::ApiError;
use crate::filter::{Filter, FilterFactory};
use crate::prompt::{PromptSet, PromptVars, REQUIRED_TEMPLATES};
use crate::provider::{GenerationOutput, SamplingConfig, TextGenerator};
use crate::retry::{call_with_retry, Accepted, RetryPolicy};
use std::sync::Arc;

#[derive(Clone)]
pub struct GenerationContext {
    pub generator: Arc<dyn TextGenerator>,
    pub prompts: Arc<PromptSet>,
    pub filters: Arc<FilterFactory>,
}

impl GenerationContext {
    /// Fails when the prompt set lacks any template the pipeline renders.
    pub fn new(
        generator: Arc<dyn TextGenerator>,
        prompts: PromptSet,
        filters: FilterFactory,
    ) -> Result<Self, ApiError> {
        prompts.require(REQUIRED_TEMPLATES)?;
        Ok(Self {
            generator,
            prompts: Arc::new(prompts),
            filters: Arc::new(filters),
        })
    }

    /// Render the template at `key` and run it through the bounded retry loop.
    pub async fn generate<T, P>(
        &self,
        key: &str,
        vars: &PromptVars,
        sampling: &SamplingConfig,
        postprocess: P,
        filter: &Filter<T>,
        policy: &RetryPolicy,
    ) -> Result<Accepted<T>, ApiError>
    where
        T: 'static,
        P: Fn(Vec<String>, &GenerationOutput) -> Vec<T>,
    {
        let prompt = self.prompts.render(key, vars, sampling.prompt_format)?;
        call_with_retry(
            self.generator.as_ref(),
            &prompt,
            sampling,
            postprocess,
            filter,
            policy,
        )
        .await
    }

    /// Like [`generate`](Self::generate) but returns the first accepted candidate.
    pub async fn generate_one<T, P>(
        &self,
        key: &str,
        vars: &PromptVars,
        sampling: &SamplingConfig,
        postprocess: P,
        filter: &Filter<T>,
        policy: &RetryPolicy,
    ) -> Result<T, ApiError>
    where
        T: 'static,
        P: Fn(Vec<String>, &GenerationOutput) -> Vec<T>,
    {
        self.generate(key, vars, sampling, postprocess, filter, policy)
            .await?
            .into_first(key)
    }
}
