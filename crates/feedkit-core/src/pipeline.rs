//! # Batch-Analysis Pipeline
//!
//! One run, start to finish:
//!
//! 1. deduplicate the comment arena (exact hash, then bucketed near-duplicates)
//! 2. drop trivial representatives ("ok", "gracias", emoji-only, ...)
//! 3. answer what it can from the analysis cache
//! 4. pack the rest into token-bounded batches
//! 5. dispatch the batches concurrently through the orchestrator
//! 6. expand results back onto every input row and aggregate the report
//!
//! Per-batch failures are data, not errors: the run only fails when every
//! batch failed and the provider rejected at least one request outright
//! (bad key, malformed request), which no amount of retrying fixes.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::aggregate::{aggregate, AggregateReport, ReportOptions};
use crate::batch::{make_batches, BatchOptions};
use crate::cache::AnalysisCache;
use crate::config::FeedkitConfig;
use crate::dedup::trivial::TrivialFilter;
use crate::dedup::{deduplicate, DedupOptions, DedupStats};
use crate::dispatch::{BatchDispatcher, BatchOutcome, BatchStatus, RateLimiter};
use crate::error::{FeedkitError, Result};
use crate::expand::expand;
use crate::llm::CompletionClient;
use crate::model::{Comment, FinalRow, InputRow, PerCommentAnalysis};
use crate::orchestrate::{CancellationFlag, ConcurrencyOrchestrator, OrchestratorOptions};
use crate::store::KeyValueStore;

/// Receives `(percent, message)` as the run advances.
pub trait ProgressSink: Send + Sync {
    fn report(&self, percent: u8, message: &str);
}

impl<F> ProgressSink for F
where
    F: Fn(u8, &str) + Send + Sync,
{
    fn report(&self, percent: u8, message: &str) {
        self(percent, message)
    }
}

/// Discards progress.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoProgress;

impl ProgressSink for NoProgress {
    fn report(&self, _percent: u8, _message: &str) {}
}

/// Progress band covered by batch completion.
const DISPATCH_PROGRESS_START: usize = 40;
const DISPATCH_PROGRESS_SPAN: usize = 50;

#[derive(Debug, Clone, Default)]
pub struct PipelineOptions {
    pub dedup: DedupOptions,
    pub extra_trivial_phrases: Vec<String>,
    pub batching: BatchOptions,
    pub orchestrator: OrchestratorOptions,
    pub report: ReportOptions,
}

impl PipelineOptions {
    pub fn from_config(config: &FeedkitConfig) -> Self {
        Self {
            dedup: config.dedup_options(),
            extra_trivial_phrases: config.dedup.extra_trivial_phrases.clone(),
            batching: config.batch_options(),
            orchestrator: config.orchestrator_options(),
            report: config.report_options(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    /// Every batch succeeded.
    Completed,
    /// Some batches failed or timed out; their rows carry neutral defaults.
    Partial,
    /// Batches were dispatched and none succeeded.
    Failed,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounts {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub timed_out: usize,
}

impl BatchCounts {
    fn tally(outcomes: &[BatchOutcome]) -> Self {
        let mut counts = BatchCounts {
            total: outcomes.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.status {
                BatchStatus::Success => counts.succeeded += 1,
                BatchStatus::Failed => counts.failed += 1,
                BatchStatus::Timeout => counts.timed_out += 1,
            }
        }
        counts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_secs: f64,
    pub model: String,
    pub batches: BatchCounts,
    /// Representatives answered from the analysis cache.
    pub cache_hits: usize,
    pub dedup: DedupStats,
    pub status: RunStatus,
}

/// The document handed to exporters and written to the store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineResult {
    pub metadata: RunMetadata,
    pub report: AggregateReport,
    pub rows: Vec<FinalRow>,
}

/// Store key of a run's result document.
pub fn results_key(run_id: Uuid) -> String {
    format!("task_results:{}", run_id)
}

/// Store key of a run's staged input rows.
pub fn input_key(run_id: Uuid) -> String {
    format!("task_input:{}", run_id)
}

impl PipelineResult {
    /// Write the result document under `task_results:<run_id>`.
    pub fn persist(&self, store: &dyn KeyValueStore, ttl: std::time::Duration) -> Result<String> {
        let key = results_key(self.metadata.run_id);
        let bytes = serde_json::to_vec(self).map_err(|e| FeedkitError::Serialization {
            message: format!("Failed to serialize results for run {}: {}", self.metadata.run_id, e),
        })?;
        store.set(&key, &bytes, Some(ttl))?;
        tracing::info!(key, bytes = bytes.len(), "persisted run results");
        Ok(key)
    }

    /// Read a result document back, or `None` if missing or expired.
    pub fn load(store: &dyn KeyValueStore, run_id: Uuid) -> Result<Option<Self>> {
        let key = results_key(run_id);
        match store.get(&key)? {
            Some(bytes) => serde_json::from_slice(&bytes)
                .map(Some)
                .map_err(|e| FeedkitError::Serialization {
                    message: format!("Stored results under '{}' are unreadable: {}", key, e),
                }),
            None => Ok(None),
        }
    }
}

/// Stage uploaded rows under `task_input:<run_id>` until the run picks them up.
pub fn stage_input(
    store: &dyn KeyValueStore,
    run_id: Uuid,
    rows: &[InputRow],
    ttl: std::time::Duration,
) -> Result<String> {
    let key = input_key(run_id);
    let bytes = serde_json::to_vec(rows).map_err(|e| FeedkitError::Serialization {
        message: format!("Failed to serialize input rows: {}", e),
    })?;
    store.set(&key, &bytes, Some(ttl))?;
    Ok(key)
}

pub fn load_staged_input(store: &dyn KeyValueStore, run_id: Uuid) -> Result<Option<Vec<InputRow>>> {
    let key = input_key(run_id);
    match store.get(&key)? {
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| FeedkitError::Serialization {
                message: format!("Staged input under '{}' is unreadable: {}", key, e),
            }),
        None => Ok(None),
    }
}

#[derive(Debug)]
pub struct Pipeline {
    orchestrator: ConcurrencyOrchestrator,
    model: String,
    trivial: TrivialFilter,
    cache: Option<AnalysisCache>,
    options: PipelineOptions,
}

impl Pipeline {
    pub fn new(dispatcher: BatchDispatcher, options: PipelineOptions) -> Self {
        let model = dispatcher.model().to_string();
        Self {
            orchestrator: ConcurrencyOrchestrator::new(dispatcher, options.orchestrator.clone()),
            model,
            trivial: TrivialFilter::new(&options.extra_trivial_phrases),
            cache: None,
            options,
        }
    }

    /// Wire a pipeline from a parsed config. The rate limiter is created
    /// here and lives as long as the pipeline.
    pub fn from_config(client: Arc<dyn CompletionClient>, config: &FeedkitConfig) -> Result<Self> {
        let limiter = Arc::new(RateLimiter::new(config.dispatch.max_requests_per_second));
        let dispatcher = BatchDispatcher::new(
            client,
            limiter,
            config.retry_policy(),
            Arc::new(config.prompt_set()?),
            config.dispatch_options(),
        );
        Ok(Self::new(dispatcher, PipelineOptions::from_config(config)))
    }

    pub fn with_cache(mut self, cache: AnalysisCache) -> Self {
        self.cache = Some(cache);
        self
    }

    pub fn options(&self) -> &PipelineOptions {
        &self.options
    }

    pub async fn run(
        &self,
        comments: &[Comment],
        cancel: &CancellationFlag,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineResult> {
        self.run_with_id(Uuid::new_v4(), comments, cancel, progress).await
    }

    /// Run under a caller-chosen id (e.g. one already used to stage input).
    ///
    /// When batches were dispatched and none succeeded, the run returns
    /// `Err` instead of a result: `Cancelled` if the flag was set, otherwise
    /// `ProviderUnavailable` if any failure was non-transient. Analyses
    /// answered from the cache are not part of that error; they stay in the
    /// cache and are reused by the next run.
    pub async fn run_with_id(
        &self,
        run_id: Uuid,
        comments: &[Comment],
        cancel: &CancellationFlag,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineResult> {
        let started_at = Utc::now();
        let clock = Instant::now();
        tracing::info!(%run_id, comments = comments.len(), model = %self.model, "starting analysis run");

        let mut dedup = deduplicate(comments, &self.options.dedup);
        progress.report(
            10,
            &format!(
                "Deduplicated: {} unique of {}",
                dedup.stats.unique_count, dedup.stats.original_count
            ),
        );

        let (kept, trivial) = self.trivial.filter(comments, &dedup.representative_indices);
        dedup.apply_trivial(&trivial);
        tracing::info!(
            unique = dedup.stats.unique_count,
            duplicates = dedup.stats.duplicate_count,
            trivial = dedup.stats.trivial_count,
            "deduplication finished"
        );
        progress.report(20, &format!("Filtered {} trivial comments", dedup.stats.trivial_count));

        let mut cached: BTreeMap<usize, PerCommentAnalysis> = BTreeMap::new();
        let mut pending = Vec::with_capacity(kept.len());
        for index in kept {
            let hit = self
                .cache
                .as_ref()
                .and_then(|cache| cache.get(&comments[index].text));
            match hit {
                Some(analysis) => {
                    cached.insert(index, analysis);
                }
                None => pending.push(index),
            }
        }
        if !cached.is_empty() {
            tracing::info!(hits = cached.len(), "answered from analysis cache");
        }

        let batches = make_batches(comments, &pending, &self.options.batching);
        progress.report(30, &format!("Prepared {} batches", batches.len()));

        let total_batches = batches.len();
        progress.report(DISPATCH_PROGRESS_START as u8, "Dispatching batches");
        let outcomes = self
            .orchestrator
            .run(batches, cancel, |done, total| {
                let percent = DISPATCH_PROGRESS_START + done * DISPATCH_PROGRESS_SPAN / total.max(1);
                progress.report(percent as u8, &format!("Analysed {}/{} batches", done, total));
            })
            .await;

        let counts = BatchCounts::tally(&outcomes);
        tracing::info!(
            total = counts.total,
            succeeded = counts.succeeded,
            failed = counts.failed,
            timed_out = counts.timed_out,
            "dispatch finished"
        );

        if total_batches > 0 && counts.succeeded == 0 {
            if cancel.is_cancelled() {
                return Err(FeedkitError::Cancelled);
            }
            if let Some(err) = outcomes
                .iter()
                .filter_map(|o| o.error.as_ref())
                .find(|e| !e.is_transient())
            {
                return Err(FeedkitError::ProviderUnavailable {
                    failed_batches: counts.failed + counts.timed_out,
                    total_batches,
                    source: err.clone(),
                });
            }
        }

        if let Some(ref cache) = self.cache {
            for outcome in outcomes.iter().filter(|o| o.is_success()) {
                for (&index, analysis) in outcome.indices.iter().zip(&outcome.items) {
                    cache.put(&comments[index].text, analysis);
                }
            }
        }

        progress.report(95, "Aggregating results");
        let rows = expand(&outcomes, &cached, &dedup, comments);
        let report = aggregate(&rows, &self.options.report);

        let status = if counts.total > 0 && counts.succeeded == 0 {
            RunStatus::Failed
        } else if counts.failed + counts.timed_out > 0 {
            RunStatus::Partial
        } else {
            RunStatus::Completed
        };

        let metadata = RunMetadata {
            run_id,
            started_at,
            finished_at: Utc::now(),
            elapsed_secs: clock.elapsed().as_secs_f64(),
            model: self.model.clone(),
            batches: counts,
            cache_hits: cached.len(),
            dedup: dedup.stats.clone(),
            status,
        };
        tracing::info!(%run_id, status = ?status, elapsed_secs = metadata.elapsed_secs, "analysis run finished");
        progress.report(100, "Done");

        Ok(PipelineResult { metadata, report, rows })
    }

    /// Run from synchronous code on a fresh runtime that is dropped
    /// afterwards. Must not be called from inside a tokio runtime.
    pub fn run_blocking(
        &self,
        comments: &[Comment],
        cancel: &CancellationFlag,
        progress: &dyn ProgressSink,
    ) -> Result<PipelineResult> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .enable_all()
            .build()
            .map_err(|source| FeedkitError::Runtime { source })?;
        runtime.block_on(self.run(comments, cancel, progress))
    }
}
