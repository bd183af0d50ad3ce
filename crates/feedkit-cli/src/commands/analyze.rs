use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use comfy_table::Table as ComfyTable;
use indicatif::{ProgressBar, ProgressStyle};
use uuid::Uuid;

use feedkit_core::aggregate::NpsScale;
use feedkit_core::cache::AnalysisCache;
use feedkit_core::llm::{CompletionClient, HttpCompletionClient, Provider};
use feedkit_core::model::comments_from_rows;
use feedkit_core::pipeline::{stage_input, PipelineResult};
use feedkit_core::store::{FileStore, KeyValueStore};
use feedkit_core::{CancellationFlag, Pipeline};

use super::{load_config, load_rows, print_report};
use crate::args::{AnalyzeArgs, ProviderArg, SummaryFormat};

impl From<ProviderArg> for Provider {
    fn from(arg: ProviderArg) -> Self {
        match arg {
            ProviderArg::Anthropic => Provider::Anthropic,
            ProviderArg::Openai => Provider::OpenAI,
        }
    }
}

pub async fn run(args: &AnalyzeArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;

    // CLI flags override feedkit.toml
    if let Some(concurrency) = args.concurrency {
        config.dispatch.concurrency = concurrency;
    }
    if let Some(rps) = args.rps {
        config.dispatch.max_requests_per_second = rps;
    }
    if args.shifted {
        config.report.nps_scale = NpsScale::Shifted;
    }
    config.validate()?;

    let rows = load_rows(&args.input)?;
    let comments = comments_from_rows(&rows);

    let provider = args.provider.map(Provider::from).or(config.llm.provider);
    let model = args.model.as_deref().or(config.llm.model.as_deref());
    let mut client = HttpCompletionClient::from_env(provider, model)?;
    if let Some(ref base_url) = config.llm.base_url {
        client = client.with_base_url(base_url);
    }
    eprintln!(
        "Analyzing {} comments with {} ({:?})",
        comments.len(),
        client.model(),
        client.provider()
    );

    let store: Option<Arc<dyn KeyValueStore>> = match config.store_dir() {
        Some(dir) => {
            tracing::info!(dir = %dir.display(), cache = !args.no_cache, "opening result store");
            Some(Arc::new(
                FileStore::open(&dir).with_context(|| format!("Failed to open store at {}", dir.display()))?,
            ))
        }
        None => {
            tracing::debug!("no store directory configured; results are not persisted");
            None
        }
    };

    let mut pipeline = Pipeline::from_config(Arc::new(client), &config)?;
    if let (Some(store), false) = (&store, args.no_cache) {
        pipeline = pipeline.with_cache(AnalysisCache::new(Arc::clone(store), config.cache_ttl()));
    }

    let run_id = Uuid::new_v4();
    if let Some(ref store) = store {
        stage_input(store.as_ref(), run_id, &rows, config.results_ttl())?;
        tracing::info!(%run_id, rows = rows.len(), "staged input rows");
    }

    // Ctrl-C stops new batches; whatever finished is still reported
    let cancel = CancellationFlag::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            trigger.cancel();
        }
    });

    let pb = ProgressBar::new(100);
    pb.set_style(
        ProgressStyle::with_template("{spinner:.cyan} [{bar:30.cyan/blue}] {pos:>3}% {msg}")
            .context("invalid progress template")?
            .progress_chars("=> "),
    );
    pb.enable_steady_tick(Duration::from_millis(100));

    let sink = |percent: u8, message: &str| {
        pb.set_position(percent as u64);
        pb.set_message(message.to_string());
    };
    let result = pipeline.run_with_id(run_id, &comments, &cancel, &sink).await;
    pb.finish_and_clear();
    let result = result.context("Analysis run failed")?;

    if let Some(ref store) = store {
        let key = result.persist(store.as_ref(), config.results_ttl())?;
        tracing::info!(%key, status = ?result.metadata.status, "persisted run results");
        eprintln!("Stored results under {}", key);
    }

    if let Some(ref path) = args.output {
        let json = serde_json::to_string_pretty(&result)?;
        std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))?;
        eprintln!("Wrote {}", path.display());
    }

    match args.format {
        SummaryFormat::Json => println!("{}", serde_json::to_string_pretty(&result.report)?),
        SummaryFormat::Table => {
            print_run(&result);
            println!();
            print_report(&result.report);
        }
    }
    Ok(())
}

fn print_run(result: &PipelineResult) {
    let meta = &result.metadata;
    println!("Run {} ({:?}) in {:.1}s", meta.run_id, meta.status, meta.elapsed_secs);

    let mut t = ComfyTable::new();
    t.set_header(vec!["Comments", "Unique", "Duplicates", "Trivial", "Cached", "Batches", "OK", "Failed", "Timed out"]);
    t.add_row(vec![
        meta.dedup.original_count.to_string(),
        meta.dedup.unique_count.to_string(),
        meta.dedup.duplicate_count.to_string(),
        meta.dedup.trivial_count.to_string(),
        meta.cache_hits.to_string(),
        meta.batches.total.to_string(),
        meta.batches.succeeded.to_string(),
        meta.batches.failed.to_string(),
        meta.batches.timed_out.to_string(),
    ]);
    println!("{t}");
}
