pub mod aggregate;
pub mod batch;
pub mod cache;
pub mod config;
pub mod dedup;
pub mod dispatch;
pub mod error;
pub mod expand;
pub mod llm;
pub mod model;
pub mod orchestrate;
pub mod pipeline;
pub mod store;

// Re-export key types for convenience
pub use aggregate::{AggregateReport, ReportOptions};
pub use error::{CompletionError, FeedkitError, Result};
pub use model::{Comment, FinalRow, InputRow, PerCommentAnalysis};
pub use orchestrate::CancellationFlag;
pub use pipeline::{Pipeline, PipelineOptions, PipelineResult, ProgressSink};
