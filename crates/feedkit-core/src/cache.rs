//! # Analysis Cache
//!
//! Per-comment results keyed by the normalized comment text, so a comment
//! seen in an earlier run skips the model entirely. Entries live in the
//! key-value store under `analysis:cache:<first 16 hex chars of sha256>`.
//!
//! Cache errors never fail a run: a broken entry is a miss, a failed write is
//! logged and dropped.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::dedup::{content_hash, normalize};
use crate::model::PerCommentAnalysis;
use crate::store::KeyValueStore;

const KEY_PREFIX: &str = "analysis:cache:";

/// Default lifetime of a cached analysis.
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(7 * 24 * 60 * 60);

pub struct AnalysisCache {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
    hits: AtomicUsize,
    misses: AtomicUsize,
}

impl AnalysisCache {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self {
            store,
            ttl,
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
        }
    }

    /// Store key for a comment text.
    pub fn key_for(text: &str) -> String {
        let hash = content_hash(&normalize(text));
        format!("{}{}", KEY_PREFIX, &hash[..16])
    }

    pub fn get(&self, text: &str) -> Option<PerCommentAnalysis> {
        let key = Self::key_for(text);
        let found = match self.store.get(&key) {
            Ok(Some(bytes)) => match serde_json::from_slice::<PerCommentAnalysis>(&bytes) {
                Ok(analysis) => Some(analysis),
                Err(e) => {
                    tracing::debug!(key, error = %e, "ignoring unreadable cache entry");
                    None
                }
            },
            Ok(None) => None,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache read failed");
                None
            }
        };

        match found {
            Some(_) => self.hits.fetch_add(1, Ordering::Relaxed),
            None => self.misses.fetch_add(1, Ordering::Relaxed),
        };
        found
    }

    /// Cache a model result. Fallback analyses are never cached.
    pub fn put(&self, text: &str, analysis: &PerCommentAnalysis) {
        if analysis.is_fallback {
            return;
        }
        let key = Self::key_for(text);
        let bytes = match serde_json::to_vec(analysis) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache entry not serializable");
                return;
            }
        };
        if let Err(e) = self.store.set(&key, &bytes, Some(self.ttl)) {
            tracing::warn!(key, error = %e, "cache write failed");
        }
    }

    pub fn hits(&self) -> usize {
        self.hits.load(Ordering::Relaxed)
    }

    pub fn misses(&self) -> usize {
        self.misses.load(Ordering::Relaxed)
    }
}

impl std::fmt::Debug for AnalysisCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AnalysisCache")
            .field("ttl", &self.ttl)
            .field("hits", &self.hits())
            .field("misses", &self.misses())
            .finish()
    }
}
