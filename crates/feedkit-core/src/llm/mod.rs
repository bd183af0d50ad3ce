//! # LLM Access
//!
//! Everything that touches the model: the completion client seam, prompt and
//! schema templates, repair of malformed responses, and parsing of repaired
//! text into per-comment analyses.

pub mod client;
pub mod parse;
pub mod prompt;
pub mod repair;

pub use client::{CompletionClient, CompletionRequest, HttpCompletionClient, Provider};
pub use prompt::PromptSet;
pub use repair::{validate_and_repair, Validation};
