use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::rate_limit::RateLimiter;
use super::retry::RetryPolicy;
use crate::batch::Batch;
use crate::error::{CompletionError, FeedkitError, Result};
use crate::llm::parse::parse_analyses;
use crate::llm::{validate_and_repair, CompletionClient, CompletionRequest, PromptSet};
use crate::model::PerCommentAnalysis;

/// Per-request limits passed through to the completion client.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    pub request_timeout: Duration,
    pub max_output_tokens: u32,
    pub temperature: f32,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(30),
            max_output_tokens: 4096,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
    Success,
    /// Retries exhausted or a non-transient provider error.
    Failed,
    /// The run deadline passed (or the run was cancelled) before the batch
    /// reported.
    Timeout,
}

/// How a batch ended. `indices` mirrors the batch's item order, and on
/// success `items[i]` is the analysis for `indices[i]`.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchOutcome {
    pub batch_id: usize,
    pub status: BatchStatus,
    pub indices: Vec<usize>,
    pub items: Vec<PerCommentAnalysis>,
    pub attempts: u32,
    /// Last completion error for failed batches.
    pub error: Option<CompletionError>,
    /// Problems found (and repaired) in the response text.
    pub issues: Vec<String>,
}

impl BatchOutcome {
    fn empty(batch: &Batch, status: BatchStatus) -> Self {
        Self {
            batch_id: batch.id,
            status,
            indices: batch.indices(),
            items: Vec::new(),
            attempts: 0,
            error: None,
            issues: Vec::new(),
        }
    }

    /// Placeholder for a batch that never reported.
    pub fn timed_out(batch: &Batch) -> Self {
        Self::empty(batch, BatchStatus::Timeout)
    }

    pub fn is_success(&self) -> bool {
        self.status == BatchStatus::Success
    }
}

/// Runs one batch end to end: rate limit, timed call, retry, repair, parse.
#[derive(Clone)]
pub struct BatchDispatcher {
    client: Arc<dyn CompletionClient>,
    limiter: Arc<RateLimiter>,
    retry: RetryPolicy,
    prompts: Arc<PromptSet>,
    options: DispatchOptions,
}

impl BatchDispatcher {
    pub fn new(
        client: Arc<dyn CompletionClient>,
        limiter: Arc<RateLimiter>,
        retry: RetryPolicy,
        prompts: Arc<PromptSet>,
        options: DispatchOptions,
    ) -> Self {
        Self {
            client,
            limiter,
            retry,
            prompts,
            options,
        }
    }

    pub fn model(&self) -> &str {
        self.client.model()
    }

    fn request_for(&self, batch: &Batch) -> CompletionRequest {
        CompletionRequest {
            system_prompt: self.prompts.system_prompt.clone(),
            user_prompt: self.prompts.user_prompt(batch),
            schema: self.prompts.schema.clone(),
            timeout: self.options.request_timeout,
            max_output_tokens: self.options.max_output_tokens,
            temperature: self.options.temperature,
        }
    }

    /// Dispatch a batch. Never returns an error; failures come back as a
    /// `Failed` outcome.
    pub async fn dispatch(&self, batch: &Batch) -> BatchOutcome {
        let request = self.request_for(batch);
        let max_attempts = self.retry.attempts();
        let mut attempt = 0u32;

        loop {
            self.limiter.acquire().await;
            attempt += 1;

            let result = match tokio::time::timeout(request.timeout, self.client.complete(&request)).await {
                Ok(result) => result,
                Err(_) => Err(CompletionError::Timeout),
            };

            match result {
                Ok(raw) => return self.success(batch, &raw, attempt),
                Err(err) if err.is_transient() && attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt - 1);
                    tracing::warn!(
                        batch_id = batch.id,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "transient completion failure, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    if err.is_transient() {
                        tracing::error!(batch_id = batch.id, attempts = attempt, error = %err, "retries exhausted");
                    } else {
                        tracing::error!(batch_id = batch.id, error = %err, "non-transient completion failure");
                    }
                    let mut outcome = BatchOutcome::empty(batch, BatchStatus::Failed);
                    outcome.attempts = attempt;
                    outcome.error = Some(err);
                    return outcome;
                }
            }
        }
    }

    fn success(&self, batch: &Batch, raw: &str, attempts: u32) -> BatchOutcome {
        let validation = validate_and_repair(raw, batch.len(), &self.prompts.results_key);
        if !validation.is_fully_valid {
            tracing::warn!(batch_id = batch.id, issues = ?validation.issues, "repaired model response");
        }

        let parsed = parse_analyses(&validation.text, batch.len(), &self.prompts.results_key);
        tracing::debug!(
            batch_id = batch.id,
            items = batch.len(),
            fallbacks = parsed.fallback_count,
            attempts,
            "batch analysed"
        );

        BatchOutcome {
            batch_id: batch.id,
            status: BatchStatus::Success,
            indices: batch.indices(),
            items: parsed.items,
            attempts,
            error: None,
            issues: validation.issues,
        }
    }

    /// Dispatch from synchronous code.
    ///
    /// Builds a fresh current-thread runtime for this one call and drops it
    /// afterwards, so a synchronous worker never shares a scheduler with
    /// anything else. Must not be called from inside a tokio runtime.
    pub fn dispatch_blocking(&self, batch: &Batch) -> Result<BatchOutcome> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(|source| FeedkitError::Runtime { source })?;
        Ok(runtime.block_on(self.dispatch(batch)))
    }
}

impl std::fmt::Debug for BatchDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BatchDispatcher")
            .field("model", &self.client.model())
            .field("retry", &self.retry)
            .field("options", &self.options)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use super::*;
    use crate::batch::BatchItem;
    use crate::model::NpsCategory;

    /// Replays a fixed list of results, one per call.
    struct Replay {
        responses: Mutex<Vec<std::result::Result<String, CompletionError>>>,
        calls: AtomicU32,
    }

    impl Replay {
        fn new(mut responses: Vec<std::result::Result<String, CompletionError>>) -> Arc<Self> {
            responses.reverse();
            Arc::new(Self {
                responses: Mutex::new(responses),
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl CompletionClient for Replay {
        async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.responses
                .lock()
                .unwrap()
                .pop()
                .unwrap_or(Err(CompletionError::Timeout))
        }

        fn model(&self) -> &str {
            "replay"
        }
    }

    fn batch(n: usize) -> Batch {
        Batch {
            id: 7,
            items: (0..n)
                .map(|i| BatchItem {
                    index: 100 + i,
                    text: format!("comentario {}", i),
                    estimated_tokens: 3,
                })
                .collect(),
        }
    }

    fn ok_response(n: usize) -> std::result::Result<String, CompletionError> {
        let items: Vec<_> = (0..n)
            .map(|_| serde_json::json!({"emotions": {}, "churn_risk": 0.9, "pain_points": ["precio"], "nps": "detractor"}))
            .collect();
        Ok(serde_json::json!({ "analyses": items }).to_string())
    }

    fn dispatcher(client: Arc<Replay>) -> BatchDispatcher {
        BatchDispatcher::new(
            client,
            Arc::new(RateLimiter::new(100)),
            RetryPolicy {
                jitter: false,
                ..Default::default()
            },
            Arc::new(PromptSet::default()),
            DispatchOptions::default(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_success_first_try() {
        let client = Replay::new(vec![ok_response(2)]);
        let outcome = dispatcher(client.clone()).dispatch(&batch(2)).await;

        assert_eq!(outcome.status, BatchStatus::Success);
        assert_eq!(outcome.batch_id, 7);
        assert_eq!(outcome.indices, vec![100, 101]);
        assert_eq!(outcome.items.len(), 2);
        assert_eq!(outcome.items[0].nps_category, NpsCategory::Detractor);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_errors_are_retried_with_backoff() {
        let client = Replay::new(vec![
            Err(CompletionError::Server {
                status: 503,
                body: "busy".into(),
            }),
            Err(CompletionError::RateLimited {
                message: "slow down".into(),
            }),
            ok_response(1),
        ]);
        let start = tokio::time::Instant::now();
        let outcome = dispatcher(client.clone()).dispatch(&batch(1)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.attempts, 3);
        // 1s after the first failure, 2s after the second
        assert_eq!(start.elapsed(), Duration::from_secs(3));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_exhausted_is_failed_outcome() {
        let client = Replay::new(vec![
            Err(CompletionError::Timeout),
            Err(CompletionError::Timeout),
            Err(CompletionError::Timeout),
            ok_response(1),
        ]);
        let outcome = dispatcher(client.clone()).dispatch(&batch(1)).await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.attempts, 3);
        assert_eq!(outcome.error, Some(CompletionError::Timeout));
        assert!(outcome.items.is_empty());
        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_transient_fails_immediately() {
        let client = Replay::new(vec![
            Err(CompletionError::Auth {
                message: "bad key".into(),
            }),
            ok_response(1),
        ]);
        let outcome = dispatcher(client.clone()).dispatch(&batch(1)).await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(client.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_truncated_response_gives_partial_credit() {
        let full = ok_response(3).unwrap();
        // Cut inside the third element
        let cut = full.rfind("churn_risk").unwrap();
        let client = Replay::new(vec![Ok(full[..cut].to_string())]);
        let outcome = dispatcher(client).dispatch(&batch(3)).await;

        assert!(outcome.is_success());
        assert_eq!(outcome.items.len(), 3);
        assert!(!outcome.items[0].is_fallback);
        assert!(!outcome.items[1].is_fallback);
        assert!(outcome.items[2].is_fallback);
        assert!(!outcome.issues.is_empty());
    }

    /// Never answers.
    struct Hang;

    #[async_trait]
    impl CompletionClient for Hang {
        async fn complete(&self, _request: &CompletionRequest) -> std::result::Result<String, CompletionError> {
            std::future::pending().await
        }

        fn model(&self) -> &str {
            "hang"
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_hanging_call_times_out_per_attempt() {
        let d = BatchDispatcher::new(
            Arc::new(Hang),
            Arc::new(RateLimiter::new(100)),
            RetryPolicy {
                max_attempts: 2,
                jitter: false,
                ..Default::default()
            },
            Arc::new(PromptSet::default()),
            DispatchOptions {
                request_timeout: Duration::from_secs(5),
                ..Default::default()
            },
        );
        let start = tokio::time::Instant::now();
        let outcome = d.dispatch(&batch(1)).await;

        assert_eq!(outcome.status, BatchStatus::Failed);
        assert_eq!(outcome.error, Some(CompletionError::Timeout));
        // two 5s timeouts plus one 1s backoff
        assert_eq!(start.elapsed(), Duration::from_secs(11));
    }

    #[test]
    fn test_dispatch_blocking_uses_its_own_runtime() {
        let client = Replay::new(vec![ok_response(2)]);
        let outcome = dispatcher(client).dispatch_blocking(&batch(2)).unwrap();
        assert!(outcome.is_success());
        assert_eq!(outcome.items.len(), 2);
    }
}
