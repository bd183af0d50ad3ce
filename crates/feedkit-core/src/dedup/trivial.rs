//! Filters out representatives that carry no analyzable signal.
//!
//! Trivial comments are never dispatched, but they still get a `FinalRow`
//! with a neutral analysis so the output has one row per input row.

use std::collections::HashSet;

use super::normalize::normalize;
use crate::model::Comment;

/// Acknowledgements and non-answers that are not worth an LLM call.
pub const DEFAULT_TRIVIAL_PHRASES: &[&str] = &[
    "ok",
    "okay",
    "si",
    "no",
    "yes",
    "bien",
    "mal",
    "bueno",
    "malo",
    "gracias",
    "thanks",
    "none",
    "nada",
    "nothing",
    "n/a",
    "na",
    "sin comentarios",
    "sin comentario",
    "no comment",
    "ninguno",
];

/// Minimum normalized length (in chars) of an analyzable comment.
const MIN_SIGNAL_LEN: usize = 3;

#[derive(Debug, Clone)]
pub struct TrivialFilter {
    phrases: HashSet<String>,
}

impl Default for TrivialFilter {
    fn default() -> Self {
        Self::new(&[])
    }
}

impl TrivialFilter {
    /// Build a filter from the default phrase set plus `extra_phrases`.
    ///
    /// Phrases are normalized the same way as comments, so `"Sin comentarios."`
    /// and `"sin comentarios"` are the same entry.
    pub fn new(extra_phrases: &[String]) -> Self {
        let phrases = DEFAULT_TRIVIAL_PHRASES
            .iter()
            .map(|p| normalize(p))
            .chain(extra_phrases.iter().map(|p| normalize(p)))
            .filter(|p| !p.is_empty())
            .collect();
        Self { phrases }
    }

    pub fn is_trivial(&self, text: &str) -> bool {
        let normalized = normalize(text);

        if normalized.chars().count() < MIN_SIGNAL_LEN {
            return true;
        }
        // Punctuation, digits and whitespace only
        if !normalized.chars().any(char::is_alphabetic) {
            return true;
        }
        self.phrases.contains(&normalized)
    }

    /// Split representatives into `(kept, trivial)`, both in input order.
    pub fn filter(&self, comments: &[Comment], representatives: &[usize]) -> (Vec<usize>, Vec<usize>) {
        let (trivial, kept): (Vec<usize>, Vec<usize>) = representatives
            .iter()
            .copied()
            .partition(|&idx| self.is_trivial(&comments[idx].text));

        tracing::debug!(kept = kept.len(), trivial = trivial.len(), "trivial filter applied");
        (kept, trivial)
    }
}
