//! # Configuration File Parser
//!
//! Reads and parses `feedkit.toml`, the optional configuration file that
//! tunes the pipeline without CLI flags. Every section and field is optional;
//! missing values fall back to the built-in defaults. Supports:
//!
//! - `[llm]`: provider, model, endpoint, per-request limits, prompt overrides
//! - `[dedup]`: near-duplicate threshold, bucketing, extra trivial phrases
//! - `[batching]`: item and token budgets per request
//! - `[dispatch]`: concurrency, rate limit, retry and deadline settings
//! - `[report]`: NPS scale and source, churn threshold, pain-point count
//! - `[store]`: result directory and TTLs
//!
//! Example `feedkit.toml`:
//!
//! ```toml
//! [llm]
//! provider = "openai"
//! model = "gpt-4o-mini"
//! request_timeout_secs = 45
//!
//! [dedup]
//! near_duplicate_threshold = 0.9
//! extra_trivial_phrases = ["todo perfecto", "sin quejas"]
//!
//! [batching]
//! max_items_per_batch = 40
//!
//! [dispatch]
//! concurrency = 4
//! max_requests_per_second = 5
//!
//! [report]
//! nps_scale = "shifted"
//! high_risk_threshold = 0.6
//!
//! [store]
//! dir = ".feedkit/store"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::aggregate::{NpsScale, NpsSource, ReportOptions};
use crate::batch::BatchOptions;
use crate::dedup::DedupOptions;
use crate::dispatch::{DispatchOptions, RetryPolicy};
use crate::error::{FeedkitError, Result};
use crate::llm::{PromptSet, Provider};
use crate::orchestrate::{OrchestratorOptions, MIN_POLL_INTERVAL};

/// Default config file name.
pub const CONFIG_FILE_NAME: &str = "feedkit.toml";

/// Top-level feedkit.toml structure.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FeedkitConfig {
    pub llm: LlmConfig,
    pub dedup: DedupConfig,
    pub batching: BatchingConfig,
    pub dispatch: DispatchConfig,
    pub report: ReportConfig,
    pub store: StoreConfig,

    /// Absolute path to the directory containing feedkit.toml.
    ///
    /// Populated by `read_config()` so that relative paths (`schema_path`,
    /// `store.dir`) resolve against the config file's location, not the CWD.
    #[serde(skip)]
    pub config_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// `openai` or `anthropic`. Unset means auto-detect from the environment.
    pub provider: Option<Provider>,
    pub model: Option<String>,
    /// Alternative API endpoint (proxy or compatible server).
    pub base_url: Option<String>,
    pub request_timeout_secs: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Replaces the built-in system prompt.
    pub system_prompt: Option<String>,
    /// JSON file with a replacement response schema.
    pub schema_path: Option<String>,
    /// Top-level key of the result array in the response.
    pub results_key: Option<String>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: None,
            model: None,
            base_url: None,
            request_timeout_secs: 30,
            max_output_tokens: 4096,
            temperature: 0.3,
            system_prompt: None,
            schema_path: None,
            results_key: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DedupConfig {
    pub near_duplicate_threshold: f64,
    pub prefix_len: usize,
    pub length_ratio_cutoff: f64,
    pub min_comparable_len: usize,
    /// Added to the built-in trivial phrase list.
    pub extra_trivial_phrases: Vec<String>,
}

impl Default for DedupConfig {
    fn default() -> Self {
        let d = DedupOptions::default();
        Self {
            near_duplicate_threshold: d.near_duplicate_threshold,
            prefix_len: d.prefix_len,
            length_ratio_cutoff: d.length_ratio_cutoff,
            min_comparable_len: d.min_comparable_len,
            extra_trivial_phrases: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BatchingConfig {
    pub max_items_per_batch: usize,
    pub max_tokens_per_batch: usize,
    pub reserved_prompt_tokens: usize,
    pub max_comment_chars: usize,
}

impl Default for BatchingConfig {
    fn default() -> Self {
        let b = BatchOptions::default();
        Self {
            max_items_per_batch: b.max_items_per_batch,
            max_tokens_per_batch: b.max_tokens_per_batch,
            reserved_prompt_tokens: b.reserved_prompt_tokens,
            max_comment_chars: b.max_comment_chars,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    pub concurrency: usize,
    pub max_requests_per_second: usize,
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub jitter: bool,
    pub overall_timeout_secs: u64,
    pub poll_interval_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 3,
            max_requests_per_second: 8,
            max_attempts: 3,
            base_delay_ms: 1000,
            max_delay_ms: 8000,
            jitter: true,
            overall_timeout_secs: 600,
            poll_interval_ms: 1000,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub nps_scale: NpsScale,
    pub nps_source: NpsSource,
    pub high_risk_threshold: f64,
    pub top_pain_points: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        let r = ReportOptions::default();
        Self {
            nps_scale: r.nps_scale,
            nps_source: r.nps_source,
            high_risk_threshold: r.high_risk_threshold,
            top_pain_points: r.top_pain_points,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Directory of the file-backed store. Unset means results are only
    /// written where the CLI is told to write them.
    pub dir: Option<String>,
    pub results_ttl_secs: u64,
    pub cache_ttl_secs: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: None,
            results_ttl_secs: 24 * 60 * 60,
            cache_ttl_secs: 7 * 24 * 60 * 60,
        }
    }
}

/// Read and parse a feedkit.toml file from the given directory.
///
/// Returns `None` if the file doesn't exist (config is optional).
/// Returns an error if the file exists but can't be parsed or is invalid.
pub fn read_config(dir: &Path) -> Result<Option<FeedkitConfig>> {
    let path = dir.join(CONFIG_FILE_NAME);
    if !path.exists() {
        return Ok(None);
    }

    let content = std::fs::read_to_string(&path).map_err(|e| FeedkitError::Config {
        message: format!("Failed to read {}: {}", path.display(), e),
    })?;

    let mut config: FeedkitConfig = toml::from_str(&content).map_err(|e| FeedkitError::Config {
        message: format!("Failed to parse {}: {}", path.display(), e),
    })?;

    config.config_dir = Some(std::fs::canonicalize(dir).unwrap_or_else(|_| dir.to_path_buf()));

    // Validate semantic constraints that serde can't enforce.
    config.validate()?;

    Ok(Some(config))
}

fn config_err(message: String) -> FeedkitError {
    FeedkitError::Config { message }
}

impl FeedkitConfig {
    /// Validate semantic constraints that serde cannot enforce.
    ///
    /// Call this immediately after parsing, and again after CLI overrides
    /// are applied, so a bad value fails before any request is sent.
    pub fn validate(&self) -> Result<()> {
        let d = &self.dedup;
        if !(0.0..=1.0).contains(&d.near_duplicate_threshold) {
            return Err(config_err(format!(
                "dedup.near_duplicate_threshold must be between 0 and 1, got {}",
                d.near_duplicate_threshold
            )));
        }
        if !(0.0..=1.0).contains(&d.length_ratio_cutoff) {
            return Err(config_err(format!(
                "dedup.length_ratio_cutoff must be between 0 and 1, got {}",
                d.length_ratio_cutoff
            )));
        }
        if d.prefix_len == 0 {
            return Err(config_err("dedup.prefix_len must be at least 1".to_string()));
        }

        if self.batching.max_items_per_batch == 0 {
            return Err(config_err("batching.max_items_per_batch must be at least 1".to_string()));
        }
        if self.batching.max_tokens_per_batch == 0 {
            return Err(config_err("batching.max_tokens_per_batch must be at least 1".to_string()));
        }
        if self.batching.reserved_prompt_tokens >= self.batching.max_tokens_per_batch {
            tracing::warn!(
                reserved = self.batching.reserved_prompt_tokens,
                max = self.batching.max_tokens_per_batch,
                "batching.reserved_prompt_tokens leaves no room for comments; every comment gets its own batch"
            );
        }

        let p = &self.dispatch;
        if p.concurrency == 0 {
            return Err(config_err("dispatch.concurrency must be at least 1".to_string()));
        }
        if p.max_requests_per_second == 0 {
            return Err(config_err("dispatch.max_requests_per_second must be at least 1".to_string()));
        }
        if p.max_attempts == 0 {
            return Err(config_err("dispatch.max_attempts must be at least 1".to_string()));
        }
        if p.base_delay_ms > p.max_delay_ms {
            return Err(config_err(format!(
                "dispatch.base_delay_ms ({}) is larger than dispatch.max_delay_ms ({})",
                p.base_delay_ms, p.max_delay_ms
            )));
        }
        if p.overall_timeout_secs == 0 {
            return Err(config_err("dispatch.overall_timeout_secs must be at least 1".to_string()));
        }
        if (p.poll_interval_ms as u128) < MIN_POLL_INTERVAL.as_millis() {
            return Err(config_err(format!(
                "dispatch.poll_interval_ms must be at least {}, got {}",
                MIN_POLL_INTERVAL.as_millis(),
                p.poll_interval_ms
            )));
        }

        if !(0.0..=1.0).contains(&self.report.high_risk_threshold) {
            return Err(config_err(format!(
                "report.high_risk_threshold must be between 0 and 1, got {}",
                self.report.high_risk_threshold
            )));
        }

        if let Some(ref base_url) = self.llm.base_url {
            let parsed = url::Url::parse(base_url)
                .map_err(|e| config_err(format!("llm.base_url '{}' is not a valid URL: {}", base_url, e)))?;
            if !matches!(parsed.scheme(), "http" | "https") {
                return Err(config_err(format!(
                    "llm.base_url must use http or https, got '{}'",
                    parsed.scheme()
                )));
            }
        }
        if self.llm.request_timeout_secs == 0 {
            return Err(config_err("llm.request_timeout_secs must be at least 1".to_string()));
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            return Err(config_err(format!(
                "llm.temperature must be between 0 and 2, got {}",
                self.llm.temperature
            )));
        }

        Ok(())
    }

    /// Resolve a path from the config file against its directory.
    fn resolve(&self, relative: &str) -> PathBuf {
        match self.config_dir {
            Some(ref dir) => dir.join(relative),
            None => PathBuf::from(relative),
        }
    }

    /// Directory of the file-backed store, if configured.
    pub fn store_dir(&self) -> Option<PathBuf> {
        self.store.dir.as_deref().map(|d| self.resolve(d))
    }

    pub fn dedup_options(&self) -> DedupOptions {
        DedupOptions {
            near_duplicate_threshold: self.dedup.near_duplicate_threshold,
            prefix_len: self.dedup.prefix_len,
            length_ratio_cutoff: self.dedup.length_ratio_cutoff,
            min_comparable_len: self.dedup.min_comparable_len,
        }
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            max_items_per_batch: self.batching.max_items_per_batch,
            max_tokens_per_batch: self.batching.max_tokens_per_batch,
            reserved_prompt_tokens: self.batching.reserved_prompt_tokens,
            max_comment_chars: self.batching.max_comment_chars,
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.dispatch.max_attempts,
            base_delay: Duration::from_millis(self.dispatch.base_delay_ms),
            max_delay: Duration::from_millis(self.dispatch.max_delay_ms),
            jitter: self.dispatch.jitter,
        }
    }

    pub fn dispatch_options(&self) -> DispatchOptions {
        DispatchOptions {
            request_timeout: Duration::from_secs(self.llm.request_timeout_secs),
            max_output_tokens: self.llm.max_output_tokens,
            temperature: self.llm.temperature,
        }
    }

    pub fn orchestrator_options(&self) -> OrchestratorOptions {
        OrchestratorOptions {
            concurrency: self.dispatch.concurrency,
            overall_timeout: Duration::from_secs(self.dispatch.overall_timeout_secs),
            poll_interval: Duration::from_millis(self.dispatch.poll_interval_ms),
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            nps_scale: self.report.nps_scale,
            nps_source: self.report.nps_source,
            high_risk_threshold: self.report.high_risk_threshold,
            top_pain_points: self.report.top_pain_points,
        }
    }

    /// Prompt set with any configured overrides applied.
    pub fn prompt_set(&self) -> Result<PromptSet> {
        let mut prompts = PromptSet::default();
        if let Some(ref system_prompt) = self.llm.system_prompt {
            prompts.system_prompt = system_prompt.clone();
        }
        if let Some(ref key) = self.llm.results_key {
            prompts.results_key = key.clone();
        }
        if let Some(ref schema_path) = self.llm.schema_path {
            let path = self.resolve(schema_path);
            let content = std::fs::read_to_string(&path).map_err(|e| FeedkitError::Config {
                message: format!("Failed to read response schema {}: {}", path.display(), e),
            })?;
            prompts.schema = serde_json::from_str(&content).map_err(|e| FeedkitError::Config {
                message: format!("Response schema {} is not valid JSON: {}", path.display(), e),
            })?;
        }
        Ok(prompts)
    }

    pub fn results_ttl(&self) -> Duration {
        Duration::from_secs(self.store.results_ttl_secs)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.store.cache_ttl_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[llm]
provider = "anthropic"
model = "claude-sonnet-4-20250514"
base_url = "https://gateway.example.com"
request_timeout_secs = 45

[dedup]
near_duplicate_threshold = 0.9
extra_trivial_phrases = ["todo perfecto"]

[batching]
max_items_per_batch = 40
max_tokens_per_batch = 6000

[dispatch]
concurrency = 4
max_requests_per_second = 5
jitter = false

[report]
nps_scale = "shifted"
nps_source = "model"
high_risk_threshold = 0.6

[store]
dir = ".feedkit/store"
"#;

        let config: FeedkitConfig = toml::from_str(toml).unwrap();
        config.validate().unwrap();

        assert_eq!(config.llm.provider, Some(Provider::Anthropic));
        assert_eq!(config.llm.request_timeout_secs, 45);
        assert_eq!(config.llm.max_output_tokens, 4096);
        assert_eq!(config.dedup.near_duplicate_threshold, 0.9);
        assert_eq!(config.dedup.prefix_len, 50);
        assert_eq!(config.dedup.extra_trivial_phrases, vec!["todo perfecto"]);
        assert_eq!(config.batching.max_items_per_batch, 40);
        assert_eq!(config.batching.reserved_prompt_tokens, 2000);
        assert_eq!(config.dispatch.concurrency, 4);
        assert!(!config.retry_policy().jitter);
        assert_eq!(config.report_options().nps_scale, NpsScale::Shifted);
        assert_eq!(config.report_options().nps_source, NpsSource::Model);
        assert_eq!(config.store_dir(), Some(PathBuf::from(".feedkit/store")));
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let config: FeedkitConfig = toml::from_str("").unwrap();
        config.validate().unwrap();

        assert_eq!(config.dispatch.concurrency, 3);
        assert_eq!(config.dispatch.max_requests_per_second, 8);
        assert_eq!(config.retry_policy(), RetryPolicy::default());
        assert_eq!(config.report_options(), ReportOptions::default());
        assert_eq!(config.batch_options().effective_token_budget(), 1000);
        assert_eq!(config.orchestrator_options().overall_timeout, Duration::from_secs(600));
        assert_eq!(config.cache_ttl(), Duration::from_secs(604_800));
        assert_eq!(config.prompt_set().unwrap(), PromptSet::default());
    }

    #[test]
    fn test_read_config_missing_file() {
        let dir = tempdir().unwrap();
        assert!(read_config(dir.path()).unwrap().is_none());
    }

    #[test]
    fn test_read_config_resolves_relative_paths() {
        let dir = tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE_NAME),
            "[llm]\nschema_path = \"schema.json\"\n\n[store]\ndir = \"store\"\n",
        )
        .unwrap();
        std::fs::write(dir.path().join("schema.json"), r#"{"type": "object"}"#).unwrap();

        let config = read_config(dir.path()).unwrap().unwrap();
        let canonical = std::fs::canonicalize(dir.path()).unwrap();
        assert_eq!(config.store_dir(), Some(canonical.join("store")));
        assert_eq!(config.prompt_set().unwrap().schema["type"], "object");
    }

    #[test]
    fn test_read_config_invalid_toml() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(CONFIG_FILE_NAME), "[dispatch\nconcurrency = 2").unwrap();
        assert!(matches!(read_config(dir.path()), Err(FeedkitError::Config { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cases = [
            "[dedup]\nnear_duplicate_threshold = 1.5",
            "[dispatch]\nconcurrency = 0",
            "[dispatch]\nmax_requests_per_second = 0",
            "[dispatch]\nbase_delay_ms = 9000\nmax_delay_ms = 1000",
            "[dispatch]\npoll_interval_ms = 0",
            "[batching]\nmax_items_per_batch = 0",
            "[report]\nhigh_risk_threshold = -0.1",
            "[llm]\nbase_url = \"not a url\"",
            "[llm]\nbase_url = \"ftp://example.com\"",
        ];
        for case in cases {
            let config: FeedkitConfig = toml::from_str(case).unwrap();
            assert!(config.validate().is_err(), "should reject: {}", case);
        }
    }

    #[test]
    fn test_unknown_provider_is_parse_error() {
        let result: std::result::Result<FeedkitConfig, _> = toml::from_str("[llm]\nprovider = \"mistral\"");
        assert!(result.is_err());
    }
}
