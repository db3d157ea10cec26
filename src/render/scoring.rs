//! Passage scorers.
//!
//! Each configured scorer adds one value to a passage's total. Judge scorers
//! ask the model a two-choice question and read the log-probability of the
//! preferred answer; a failed judge call scores [`FAILED_SCORE`] instead of
//! failing the render.

use crate::config::{ScorerKind, StoryConfig};
use crate::error::ApiError;
use crate::filter::non_empty;
use crate::generation::GenerationContext;
use crate::prompt::PromptVars;
use crate::provider::{Completion, SamplingConfig};
use crate::retry::{identity, RetryPolicy};
use crate::story::{Story, TOTAL_SCORE};
use std::collections::BTreeMap;
use tracing::warn;

/// Score for a passage whose judge call failed or that already contains a stop marker.
pub const FAILED_SCORE: f64 = -1e10;

/// Fallback raw log-probabilities when no choice token is found.
pub const DEFAULT_CHOICE_LOGPROBS: [f64; 2] = [-1e8, -1e7];

const LENGTH_REWARD: f64 = 100.0;

/// One candidate passage to score.
pub struct Candidate<'a> {
    /// Story before the candidate is appended
    pub story: &'a Story,
    pub node_event: &'a str,
    pub text: &'a str,
    pub stopped_at_length: bool,
    pub ending: bool,
}

/// Run every configured scorer; the result holds each scorer's value and the total.
pub async fn score_passage(
    ctx: &GenerationContext,
    config: &StoryConfig,
    candidate: &Candidate<'_>,
) -> BTreeMap<String, f64> {
    let mut scores = BTreeMap::new();
    let mut total = 0.0;
    for scorer in &config.score.scorers {
        let value = match scorer {
            ScorerKind::Coherence => coherence(ctx, config, candidate).await,
            ScorerKind::Relevance => relevance(ctx, config, candidate).await,
            ScorerKind::Commentary => commentary(ctx, config, candidate).await,
            ScorerKind::Length => length_score(candidate.stopped_at_length, candidate.ending),
        };
        total += value;
        scores.insert(scorer.score_key().to_string(), value);
    }
    scores.insert(TOTAL_SCORE.to_string(), total);
    scores
}

/// Penalize hitting the length cap while the story goes on; reward a natural
/// stop when the passage is meant to end the story.
pub fn length_score(stopped_at_length: bool, ending: bool) -> f64 {
    match (ending, stopped_at_length) {
        (false, true) => -LENGTH_REWARD,
        (true, false) => LENGTH_REWARD,
        _ => 0.0,
    }
}

async fn coherence(ctx: &GenerationContext, config: &StoryConfig, candidate: &Candidate<'_>) -> f64 {
    let passages: Vec<&str> = candidate.story.passages().map(|p| p.text.as_str()).collect();
    if passages.is_empty() {
        return 0.0;
    }
    let start = passages.len().saturating_sub(config.score.coherence.max_prefix_passages);
    let prefix: String = passages[start..].concat();
    let vars = PromptVars::new()
        .set("prefix", prefix.trim())
        .set("continuation", candidate.text.trim());
    judge(
        ctx,
        "story.score.coherence",
        &vars,
        &config.score.coherence.sampling,
        &["yes", "no"],
        false,
    )
    .await
    .unwrap_or_else(|e| failed("coherence", candidate.text, e))
}

async fn relevance(ctx: &GenerationContext, config: &StoryConfig, candidate: &Candidate<'_>) -> f64 {
    let mut continuation = candidate
        .story
        .last_list()
        .map(|list| list.text())
        .unwrap_or_default();
    continuation.push_str(candidate.text);
    let vars = PromptVars::new()
        .set("node_event", candidate.node_event.trim())
        .set("continuation", continuation.trim());
    judge(
        ctx,
        "story.score.relevance",
        &vars,
        &config.score.relevance,
        &["yes", "no"],
        false,
    )
    .await
    .unwrap_or_else(|e| failed("relevance", candidate.text, e))
}

async fn commentary(ctx: &GenerationContext, config: &StoryConfig, candidate: &Candidate<'_>) -> f64 {
    if config
        .passage
        .stop
        .iter()
        .flatten()
        .any(|stop| candidate.text.contains(stop.as_str()))
    {
        return FAILED_SCORE;
    }
    let last_paragraph = candidate.text.rsplit('\n').next().unwrap_or_default().trim();
    let vars = PromptVars::new().set("last_paragraph", last_paragraph);
    judge(
        ctx,
        "story.score.commentary",
        &vars,
        &config.score.commentary,
        &["A", "B"],
        true,
    )
    .await
    .unwrap_or_else(|e| failed("commentary", candidate.text, e))
}

fn failed(scorer: &str, text: &str, error: ApiError) -> f64 {
    warn!(scorer, error = %error, passage = text, "Failed to score passage");
    FAILED_SCORE
}

/// Ask a two-choice question; the score is the normalized log-probability of
/// the first choice.
async fn judge(
    ctx: &GenerationContext,
    key: &str,
    vars: &PromptVars,
    sampling: &SamplingConfig,
    choices: &[&str],
    case_sensitive: bool,
) -> Result<f64, ApiError> {
    let filter = non_empty().map(String::as_str);
    let accepted = ctx
        .generate(key, vars, sampling, identity(), &filter, &RetryPolicy::default())
        .await?;
    let completion = accepted
        .output
        .completions
        .first()
        .ok_or_else(|| ApiError::ProviderError(format!("{} returned no completions", key)))?;
    let logprobs = extract_choice_logprobs(completion, choices, &DEFAULT_CHOICE_LOGPROBS, case_sensitive);
    Ok(logprobs[0])
}

/// Log-probabilities of `choices` at the first generated position whose top
/// alternatives mention any of them, renormalized over the choices.
///
/// A token matches a choice when it contains it. Choices missing at that
/// position, or everywhere, take their value from `defaults`.
pub fn extract_choice_logprobs(
    completion: &Completion,
    choices: &[&str],
    defaults: &[f64],
    case_sensitive: bool,
) -> Vec<f64> {
    let mut values: Vec<f64> = (0..choices.len())
        .map(|i| defaults.get(i).copied().unwrap_or(f64::NEG_INFINITY))
        .collect();
    for position in &completion.top_logprobs {
        let mut found = false;
        for (token, logprob) in position {
            for (i, choice) in choices.iter().enumerate() {
                let matches = token.contains(choice)
                    || (!case_sensitive && token.to_lowercase().contains(&choice.to_lowercase()));
                if matches {
                    found = true;
                    values[i] = *logprob;
                }
            }
        }
        if found {
            break;
        }
    }
    log_softmax(&values)
}

pub fn log_softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    if !max.is_finite() {
        return values.to_vec();
    }
    let log_sum = values.iter().map(|v| (v - max).exp()).sum::<f64>().ln() + max;
    values.iter().map(|v| v - log_sum).collect()
}
