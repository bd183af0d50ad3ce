use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser, Debug)]
#[command(
    name = "feedkit",
    about = "Deduplicated, rate-limited LLM analysis of customer feedback",
    version,
    after_help = "Examples:\n  feedkit analyze --input rows.json --output results.json\n  feedkit analyze --input rows.json --concurrency 4 --rps 5 --provider anthropic\n  feedkit dedup --input rows.json\n  feedkit report --results results.json --shifted"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Analyze a feedback sheet with the configured LLM
    Analyze(AnalyzeArgs),

    /// Show what deduplication and batching would do, without calling the LLM
    Dedup(DedupArgs),

    /// Recompute the aggregate report from stored result rows
    Report(ReportArgs),
}

#[derive(Parser, Debug)]
pub struct AnalyzeArgs {
    /// JSON array of {"rating", "comment"} rows
    #[arg(short, long)]
    pub input: PathBuf,

    /// Where to write the result document (JSON)
    #[arg(short, long)]
    pub output: Option<PathBuf>,

    /// Directory containing feedkit.toml
    #[arg(long, default_value = ".")]
    pub config: PathBuf,

    /// LLM provider (auto-detected from API keys if not specified)
    #[arg(long)]
    pub provider: Option<ProviderArg>,

    /// Model name override
    #[arg(long)]
    pub model: Option<String>,

    /// Number of batches in flight at once
    #[arg(long)]
    pub concurrency: Option<usize>,

    /// Maximum LLM requests per second
    #[arg(long)]
    pub rps: Option<usize>,

    /// Do not read or write the per-comment analysis cache
    #[arg(long)]
    pub no_cache: bool,

    /// Report NPS on the 0..100 scale instead of -100..100
    #[arg(long)]
    pub shifted: bool,

    /// Output format for the summary
    #[arg(long, default_value = "table")]
    pub format: SummaryFormat,
}

#[derive(Parser, Debug)]
pub struct DedupArgs {
    /// JSON array of {"rating", "comment"} rows
    #[arg(short, long)]
    pub input: PathBuf,

    /// Directory containing feedkit.toml
    #[arg(long, default_value = ".")]
    pub config: PathBuf,

    /// Near-duplicate similarity threshold override (0..1)
    #[arg(long)]
    pub threshold: Option<f64>,
}

#[derive(Parser, Debug)]
pub struct ReportArgs {
    /// Result document written by `feedkit analyze`
    #[arg(short, long)]
    pub results: PathBuf,

    /// Directory containing feedkit.toml
    #[arg(long, default_value = ".")]
    pub config: PathBuf,

    /// Report NPS on the 0..100 scale instead of -100..100
    #[arg(long)]
    pub shifted: bool,

    /// Count NPS from the model's category instead of the rating
    #[arg(long)]
    pub model_nps: bool,

    /// Output format
    #[arg(long, default_value = "table")]
    pub format: SummaryFormat,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum ProviderArg {
    #[value(alias = "claude")]
    Anthropic,
    Openai,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
pub enum SummaryFormat {
    Table,
    Json,
}
