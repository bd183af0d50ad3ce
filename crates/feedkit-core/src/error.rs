//! # Error Types
//!
//! Defines `FeedkitError`, the unified error enum for run-level failures in
//! the feedkit pipeline, and `CompletionError`, the fixed set of failure
//! kinds an LLM completion call can produce.
//!
//! Failures local to one comment or one batch never become a `FeedkitError`:
//! the dispatcher turns them into `BatchStatus::Failed` outcomes and the
//! expander fills neutral defaults. Only problems that make the whole run
//! meaningless (bad config, a provider that rejects every request) surface
//! here.

use thiserror::Error;

/// All errors that can abort a feedkit operation.
#[derive(Error, Debug)]
pub enum FeedkitError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("No LLM API key found. feedkit looks for a key in this order:\n  1. OPENAI_API_KEY\n  2. ANTHROPIC_API_KEY\n  3. .env file with either variable\n\nExample: OPENAI_API_KEY=sk-... feedkit analyze --input rows.json")]
    NoApiKey,

    #[error("LLM provider rejected every batch ({failed_batches} of {total_batches}): {source}\n  Check the API key, model name and base URL, then retry the run.")]
    ProviderUnavailable {
        failed_batches: usize,
        total_batches: usize,
        #[source]
        source: CompletionError,
    },

    #[error("Storage error on key '{key}': {message}")]
    Storage { key: String, message: String },

    #[error("Serialization error: {message}")]
    Serialization { message: String },

    #[error("Failed to start async runtime: {source}")]
    Runtime {
        #[source]
        source: std::io::Error,
    },

    #[error("Run cancelled before any batch completed")]
    Cancelled,

    #[error("Output error: {message}: {source}")]
    Output {
        message: String,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, FeedkitError>;

/// Failure kinds of a single completion call.
///
/// The first four are transient and retried with backoff; `BadRequest` and
/// `Auth` fail the batch immediately.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum CompletionError {
    #[error("request timed out")]
    Timeout,

    #[error("provider rate limit hit: {message}")]
    RateLimited { message: String },

    #[error("connection failed: {message}")]
    Connection { message: String },

    #[error("provider returned {status}: {body}")]
    Server { status: u16, body: String },

    #[error("bad request: {message}")]
    BadRequest { message: String },

    #[error("authentication failed: {message}")]
    Auth { message: String },
}

impl CompletionError {
    /// Whether a retry has any chance of succeeding.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            CompletionError::Timeout
                | CompletionError::RateLimited { .. }
                | CompletionError::Connection { .. }
                | CompletionError::Server { .. }
        )
    }

    /// Classify a non-success HTTP status from the provider.
    pub fn from_status(status: u16, body: &str) -> Self {
        let body = truncate(body, 500).to_string();
        match status {
            429 => CompletionError::RateLimited { message: body },
            401 | 403 => CompletionError::Auth { message: body },
            408 => CompletionError::Timeout,
            s if s >= 500 => CompletionError::Server { status: s, body },
            _ => CompletionError::BadRequest {
                message: format!("HTTP {}: {}", status, body),
            },
        }
    }
}

pub(crate) fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transient_classification() {
        assert!(CompletionError::Timeout.is_transient());
        assert!(CompletionError::RateLimited {
            message: String::new()
        }
        .is_transient());
        assert!(CompletionError::Connection {
            message: String::new()
        }
        .is_transient());
        assert!(CompletionError::Server {
            status: 503,
            body: String::new()
        }
        .is_transient());
        assert!(!CompletionError::BadRequest {
            message: String::new()
        }
        .is_transient());
        assert!(!CompletionError::Auth {
            message: String::new()
        }
        .is_transient());
    }

    #[test]
    fn test_from_status() {
        assert!(matches!(
            CompletionError::from_status(429, "slow down"),
            CompletionError::RateLimited { .. }
        ));
        assert!(matches!(
            CompletionError::from_status(401, "bad key"),
            CompletionError::Auth { .. }
        ));
        assert!(matches!(
            CompletionError::from_status(502, "gateway"),
            CompletionError::Server { status: 502, .. }
        ));
        assert!(matches!(
            CompletionError::from_status(400, "schema"),
            CompletionError::BadRequest { .. }
        ));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 10), "hello");
        assert_eq!(truncate("hello world", 5), "hello");
        // 'ñ' is two bytes; cutting inside it must back off
        assert_eq!(truncate("añb", 2), "a");
    }
}
