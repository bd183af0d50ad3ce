//! # Batch Dispatch
//!
//! Sends one batch to the model: admission through the shared
//! [`RateLimiter`], a timed completion call, retries with exponential backoff
//! for transient failures, then repair and parsing of the response.
//!
//! Failures here are data. [`BatchDispatcher::dispatch`] always returns a
//! [`BatchOutcome`]; the orchestrator never sees an `Err`.

pub mod dispatcher;
pub mod rate_limit;
pub mod retry;

pub use dispatcher::{BatchDispatcher, BatchOutcome, BatchStatus, DispatchOptions};
pub use rate_limit::RateLimiter;
pub use retry::RetryPolicy;
