//! # Concurrency Orchestrator
//!
//! Runs a fixed pool of workers over the batch list. Each worker takes the
//! next unclaimed batch, dispatches it to completion (retries included) and
//! records the outcome in that batch's slot. The caller side polls the slots
//! until every batch has reported, the overall deadline passes, or the run is
//! cancelled; whatever has not reported by then becomes a `Timeout` outcome.
//!
//! Outcomes are returned in submission order regardless of completion order.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{watch, Notify};
use tokio::task::JoinSet;
use tokio::time::Instant;

use crate::batch::Batch;
use crate::dispatch::{BatchDispatcher, BatchOutcome};

/// Shared cancellation signal for one pipeline run.
///
/// Cloning shares the flag. Once cancelled it stays cancelled.
#[derive(Debug, Clone)]
pub struct CancellationFlag {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancellationFlag {
    fn default() -> Self {
        Self::new()
    }
}

impl CancellationFlag {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so this cannot fail while we wait.
        let _ = rx.wait_for(|&cancelled| cancelled).await;
    }
}

#[derive(Debug, Clone)]
pub struct OrchestratorOptions {
    /// Number of workers (minimum 1).
    pub concurrency: usize,
    pub overall_timeout: Duration,
    /// Upper bound on the time between progress checks. Values below
    /// [`MIN_POLL_INTERVAL`] are raised to it.
    pub poll_interval: Duration,
}

pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(10);

impl Default for OrchestratorOptions {
    fn default() -> Self {
        Self {
            concurrency: 3,
            overall_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(1000),
        }
    }
}

#[derive(Debug)]
enum Slot {
    Pending,
    InFlight,
    Finished(BatchOutcome),
}

impl Slot {
    fn is_finished(&self) -> bool {
        matches!(self, Slot::Finished(_))
    }
}

#[derive(Debug)]
pub struct ConcurrencyOrchestrator {
    dispatcher: BatchDispatcher,
    options: OrchestratorOptions,
}

impl ConcurrencyOrchestrator {
    pub fn new(dispatcher: BatchDispatcher, options: OrchestratorOptions) -> Self {
        Self { dispatcher, options }
    }

    /// Dispatch every batch and return one outcome per batch, in submission
    /// order.
    ///
    /// `on_progress(done, total)` is called each time the number of
    /// finished batches grows.
    pub async fn run<F>(&self, batches: Vec<Batch>, cancel: &CancellationFlag, mut on_progress: F) -> Vec<BatchOutcome>
    where
        F: FnMut(usize, usize),
    {
        let total = batches.len();
        if total == 0 {
            return Vec::new();
        }

        let batches = Arc::new(batches);
        let slots: Arc<Mutex<Vec<Slot>>> = Arc::new(Mutex::new((0..total).map(|_| Slot::Pending).collect()));
        let next = Arc::new(AtomicUsize::new(0));
        let finished = Arc::new(Notify::new());

        let workers = self.options.concurrency.max(1).min(total);
        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let dispatcher = self.dispatcher.clone();
            let batches = Arc::clone(&batches);
            let slots = Arc::clone(&slots);
            let next = Arc::clone(&next);
            let finished = Arc::clone(&finished);
            let cancel = cancel.clone();

            pool.spawn(async move {
                loop {
                    if cancel.is_cancelled() {
                        break;
                    }
                    let i = next.fetch_add(1, Ordering::SeqCst);
                    if i >= batches.len() {
                        break;
                    }
                    set_slot(&slots, i, Slot::InFlight);
                    tracing::debug!(worker_id, batch_id = batches[i].id, "batch started");

                    let outcome = dispatcher.dispatch(&batches[i]).await;
                    set_slot(&slots, i, Slot::Finished(outcome));
                    finished.notify_one();
                }
            });
        }

        let deadline = Instant::now() + self.options.overall_timeout;
        let mut reported = 0usize;
        let poll_interval = self.options.poll_interval.max(MIN_POLL_INTERVAL);

        loop {
            let done = count_finished(&slots);
            if done > reported {
                reported = done;
                on_progress(done, total);
            }
            if done == total {
                break;
            }

            tokio::select! {
                _ = finished.notified() => {}
                _ = tokio::time::sleep(poll_interval) => {}
                _ = tokio::time::sleep_until(deadline) => {
                    tracing::warn!(done, total, "overall timeout reached, continuing with partial results");
                    break;
                }
                _ = cancel.cancelled() => {
                    tracing::warn!(done, total, "run cancelled, continuing with partial results");
                    break;
                }
            }
        }

        pool.abort_all();
        while pool.join_next().await.is_some() {}

        let mut slots = match slots.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let outcomes: Vec<BatchOutcome> = slots
            .drain(..)
            .enumerate()
            .map(|(i, slot)| match slot {
                Slot::Finished(outcome) => outcome,
                Slot::Pending | Slot::InFlight => BatchOutcome::timed_out(&batches[i]),
            })
            .collect();

        tracing::info!(
            total,
            succeeded = outcomes.iter().filter(|o| o.is_success()).count(),
            "all batches accounted for"
        );
        outcomes
    }
}

fn set_slot(slots: &Mutex<Vec<Slot>>, i: usize, slot: Slot) {
    let mut guard = match slots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard[i] = slot;
}

fn count_finished(slots: &Mutex<Vec<Slot>>) -> usize {
    let guard = match slots.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };
    guard.iter().filter(|s| s.is_finished()).count()
}
