//! Candidate Filters
//!
//! Composable boolean predicates over generated candidates. Composition is
//! conjunctive. Tokenizers used for token-count bands are cached by the
//! [`FilterFactory`] that builds the filters.

use crate::error::ApiError;
use parking_lot::Mutex;
use regex::Regex;
use std::collections::HashMap;
use std::sync::Arc;
use tiktoken_rs::CoreBPE;
use tracing::debug;

/// Similarity at or above which a candidate counts as a near-duplicate.
pub const DEFAULT_NOVELTY_THRESHOLD: f64 = 0.8;

/// A shareable predicate over `T`.
pub struct Filter<T: ?Sized>(Arc<dyn Fn(&T) -> bool + Send + Sync>);

impl<T: ?Sized> Clone for Filter<T> {
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl<T: ?Sized + 'static> Filter<T> {
    pub fn new<F>(predicate: F) -> Self
    where
        F: Fn(&T) -> bool + Send + Sync + 'static,
    {
        Self(Arc::new(predicate))
    }

    pub fn accept_all() -> Self {
        Self::new(|_| true)
    }

    pub fn check(&self, item: &T) -> bool {
        (self.0)(item)
    }

    /// Both filters must accept.
    pub fn and(self, other: Filter<T>) -> Filter<T> {
        Filter::new(move |item: &T| self.check(item) && other.check(item))
    }

    /// Apply this filter to a projection of another type.
    pub fn map<U: ?Sized + 'static>(self, project: fn(&U) -> &T) -> Filter<U> {
        Filter::new(move |item: &U| self.check(project(item)))
    }
}

impl Filter<str> {
    /// Apply a text filter to the text half of a `(text, flag)` candidate.
    pub fn on_first<B: 'static>(self) -> Filter<(String, B)> {
        Filter::new(move |pair: &(String, B)| self.check(&pair.0))
    }
}

/// Rejects blank text.
pub fn non_empty() -> Filter<str> {
    Filter::new(|s: &str| !s.trim().is_empty())
}

/// Rejects text containing any of `words` (case-sensitive substring match).
pub fn forbidden_substrings(words: &[&str]) -> Filter<str> {
    let words: Vec<String> = words.iter().map(|w| w.to_string()).collect();
    Filter::new(move |s: &str| !words.iter().any(|w| s.contains(w.as_str())))
}

/// Rejects text containing any of `words`, ignoring case.
pub fn forbidden_words_ignore_case(words: &[String]) -> Filter<str> {
    let words: Vec<String> = words.iter().map(|w| w.to_lowercase()).collect();
    Filter::new(move |s: &str| {
        let lower = s.to_lowercase();
        !words.iter().any(|w| lower.contains(w.as_str()))
    })
}

/// Rejects text whose normalized Levenshtein similarity to any reference is
/// at or above `threshold`. Empty references are ignored.
pub fn novelty(references: Vec<String>, threshold: f64) -> Filter<str> {
    let references: Vec<String> = references
        .into_iter()
        .filter(|r| !r.trim().is_empty())
        .collect();
    Filter::new(move |s: &str| {
        references
            .iter()
            .all(|reference| strsim::normalized_levenshtein(s, reference) < threshold)
    })
}

/// Rejects a list number such as `4.` that is not at the start of a line,
/// which signals the model ran two list items together.
pub fn list_numbering_artifact() -> Result<Filter<str>, ApiError> {
    let pattern = Regex::new(r"[^\n]\d+\.")
        .map_err(|e| ApiError::ConfigError(format!("Invalid list-number pattern: {}", e)))?;
    Ok(Filter::new(move |s: &str| !pattern.is_match(s)))
}

/// Token counter used by length filters.
pub enum Tokenizer {
    Whitespace,
    Bpe(CoreBPE),
}

impl Tokenizer {
    pub fn count(&self, text: &str) -> usize {
        match self {
            Tokenizer::Whitespace => text.split_whitespace().count(),
            Tokenizer::Bpe(bpe) => bpe.encode_ordinary(text).len(),
        }
    }
}

fn load_tokenizer(name: &str) -> Result<Tokenizer, ApiError> {
    let bpe = match name {
        "whitespace" => return Ok(Tokenizer::Whitespace),
        "gpt2" | "r50k_base" => tiktoken_rs::r50k_base(),
        "p50k_base" => tiktoken_rs::p50k_base(),
        "cl100k_base" => tiktoken_rs::cl100k_base(),
        "o200k_base" => tiktoken_rs::o200k_base(),
        other => {
            return Err(ApiError::ConfigError(format!(
                "Unknown tokenizer '{}'",
                other
            )))
        }
    };
    bpe.map(Tokenizer::Bpe)
        .map_err(|e| ApiError::ConfigError(format!("Failed to load tokenizer '{}': {}", name, e)))
}

/// Builds filters and owns the tokenizer cache they share.
pub struct FilterFactory {
    tokenizer_name: String,
    tokenizers: Mutex<HashMap<String, Arc<Tokenizer>>>,
}

impl FilterFactory {
    pub fn new(tokenizer_name: &str) -> Self {
        Self {
            tokenizer_name: tokenizer_name.to_string(),
            tokenizers: Mutex::new(HashMap::new()),
        }
    }

    pub fn tokenizer_name(&self) -> &str {
        &self.tokenizer_name
    }

    /// Load (once) and return the named tokenizer.
    pub fn tokenizer(&self, name: &str) -> Result<Arc<Tokenizer>, ApiError> {
        let mut cache = self.tokenizers.lock();
        if let Some(tokenizer) = cache.get(name) {
            return Ok(Arc::clone(tokenizer));
        }
        debug!(tokenizer = name, "Loading tokenizer");
        let tokenizer = Arc::new(load_tokenizer(name)?);
        cache.insert(name.to_string(), Arc::clone(&tokenizer));
        Ok(tokenizer)
    }

    pub fn count_tokens(&self, text: &str) -> Result<usize, ApiError> {
        Ok(self.tokenizer(&self.tokenizer_name)?.count(text))
    }

    /// Accepts text whose trimmed token count lies in `[min, max]`; blank text
    /// is rejected as well.
    pub fn min_max_tokens(&self, min: usize, max: usize) -> Result<Filter<str>, ApiError> {
        Ok(self.token_band(min, max)?.and(non_empty()))
    }

    /// Token-count band without the blank-text check.
    pub fn token_band(&self, min: usize, max: usize) -> Result<Filter<str>, ApiError> {
        let tokenizer = self.tokenizer(&self.tokenizer_name)?;
        Ok(Filter::new(move |s: &str| {
            let count = tokenizer.count(s.trim());
            min <= count && count <= max
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_band_keeps_short_candidates() {
        let factory = FilterFactory::new("whitespace");
        let filter = factory.min_max_tokens(0, 5).unwrap();
        let candidates = ["ok", "this has far too many tokens in it"];
        let kept: Vec<&str> = candidates.into_iter().filter(|c| filter.check(c)).collect();
        assert_eq!(kept, vec!["ok"]);
    }

    #[test]
    fn min_max_tokens_rejects_blank_text() {
        let factory = FilterFactory::new("whitespace");
        assert!(!factory.min_max_tokens(0, 5).unwrap().check("   "));
        assert!(factory.token_band(0, 5).unwrap().check("   "));
    }

    #[test]
    fn bpe_tokenizer_is_cached() {
        let factory = FilterFactory::new("gpt2");
        let first = factory.tokenizer("gpt2").unwrap();
        let second = factory.tokenizer("gpt2").unwrap();
        assert!(Arc::ptr_eq(&first, &second));
        assert!(factory.count_tokens("hello world").unwrap() >= 2);
    }

    #[test]
    fn unknown_tokenizer_is_config_error() {
        let factory = FilterFactory::new("sentencepiece");
        assert!(matches!(
            factory.count_tokens("x"),
            Err(ApiError::ConfigError(_))
        ));
    }

    #[test]
    fn forbidden_substrings_are_case_sensitive() {
        let filter = forbidden_substrings(&["[", "TODO"]);
        assert!(!filter.check("[Scene 1] A storm"));
        assert!(!filter.check("TODO fill in"));
        assert!(filter.check("todo is fine"));
        assert!(!forbidden_words_ignore_case(&["passage".to_string()]).check("In this Passage"));
    }

    #[test]
    fn novelty_rejects_near_duplicates() {
        let filter = novelty(
            vec!["Mara finds the map.".to_string(), String::new()],
            DEFAULT_NOVELTY_THRESHOLD,
        );
        assert!(!filter.check("Mara finds the map!"));
        assert!(filter.check("The ship leaves the harbor at dawn."));
    }

    #[test]
    fn list_numbering_artifact_detects_inline_numbers() {
        let filter = list_numbering_artifact().unwrap();
        assert!(filter.check("A brave sailor."));
        assert!(filter.check("A brave sailor.\n2. Another"));
        assert!(!filter.check("A brave sailor. 2. Another"));
    }

    #[test]
    fn combinators_compose() {
        let short = FilterFactory::new("whitespace").min_max_tokens(0, 3).unwrap();
        let combined = short.and(forbidden_substrings(&["TODO"])).on_first::<bool>();
        assert!(combined.check(&("Ada sails.".to_string(), true)));
        assert!(!combined.check(&("TODO".to_string(), false)));

        fn text_of(pair: &(String, bool)) -> &str {
            &pair.0
        }
        let projected: Filter<(String, bool)> = non_empty().map(text_of);
        assert!(!projected.check(&(String::new(), true)));
    }
}
