//! # Batching
//!
//! Greedy packing of representative comments into LLM requests bounded by an
//! item count and an estimated token budget. Each `BatchItem` keeps the
//! comment's `original_index`, so the position of a result inside a batch
//! maps straight back to the comment arena.

use serde::{Deserialize, Serialize};

use crate::model::Comment;

/// Packing limits for the batcher.
#[derive(Debug, Clone)]
pub struct BatchOptions {
    pub max_items_per_batch: usize,
    pub max_tokens_per_batch: usize,
    /// Tokens set aside for the system prompt and schema.
    pub reserved_prompt_tokens: usize,
    /// Comments longer than this (in chars) are truncated before estimation.
    pub max_comment_chars: usize,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            max_items_per_batch: 50,
            max_tokens_per_batch: 3000,
            reserved_prompt_tokens: 2000,
            max_comment_chars: 1500,
        }
    }
}

impl BatchOptions {
    /// Token budget left for comment text, never below 1.
    pub fn effective_token_budget(&self) -> usize {
        self.max_tokens_per_batch
            .saturating_sub(self.reserved_prompt_tokens)
            .max(1)
    }
}

/// One comment as it will be sent to the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchItem {
    pub index: usize,
    pub text: String,
    pub estimated_tokens: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Batch {
    pub id: usize,
    pub items: Vec<BatchItem>,
}

impl Batch {
    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Original indices in the order they were placed into the batch.
    pub fn indices(&self) -> Vec<usize> {
        self.items.iter().map(|item| item.index).collect()
    }

    pub fn estimated_tokens(&self) -> usize {
        self.items.iter().map(|item| item.estimated_tokens).sum()
    }
}

/// Rough token count: one token per four chars, at least one.
///
/// Monotone in text length and deterministic.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(4).max(1)
}

fn clip_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}

/// Pack the given representatives into batches.
///
/// `indices` are original indices into `comments`, in the order they should
/// be sent. A comment whose own estimate exceeds the budget gets a batch to
/// itself; nothing is dropped or split.
pub fn make_batches(comments: &[Comment], indices: &[usize], options: &BatchOptions) -> Vec<Batch> {
    let budget = options.effective_token_budget();
    let max_items = options.max_items_per_batch.max(1);

    let mut batches: Vec<Batch> = Vec::new();
    let mut current: Vec<BatchItem> = Vec::new();
    let mut current_tokens = 0usize;

    for &idx in indices {
        let text = clip_chars(&comments[idx].text, options.max_comment_chars);
        let item = BatchItem {
            index: idx,
            text: text.to_string(),
            estimated_tokens: estimate_tokens(text),
        };

        let fits = current_tokens + item.estimated_tokens <= budget && current.len() < max_items;
        if !fits && !current.is_empty() {
            batches.push(Batch {
                id: batches.len(),
                items: std::mem::take(&mut current),
            });
            current_tokens = 0;
        }

        current_tokens += item.estimated_tokens;
        current.push(item);
    }

    if !current.is_empty() {
        batches.push(Batch {
            id: batches.len(),
            items: current,
        });
    }

    tracing::debug!(
        comments = indices.len(),
        batches = batches.len(),
        budget,
        max_items,
        "batches planned"
    );

    batches
}
