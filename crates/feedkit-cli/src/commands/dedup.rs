use anyhow::Result;
use comfy_table::{Cell, Table as ComfyTable};

use feedkit_core::batch::make_batches;
use feedkit_core::dedup::deduplicate;
use feedkit_core::dedup::trivial::TrivialFilter;
use feedkit_core::model::comments_from_rows;

use super::{load_config, load_rows};
use crate::args::DedupArgs;

/// Batches listed individually before the plan is summarized.
const MAX_LISTED_BATCHES: usize = 20;

pub fn run(args: &DedupArgs) -> Result<()> {
    let mut config = load_config(&args.config)?;
    if let Some(threshold) = args.threshold {
        config.dedup.near_duplicate_threshold = threshold;
    }
    config.validate()?;

    let rows = load_rows(&args.input)?;
    let comments = comments_from_rows(&rows);

    let mut dedup = deduplicate(&comments, &config.dedup_options());
    let filter = TrivialFilter::new(&config.dedup.extra_trivial_phrases);
    let (kept, trivial) = filter.filter(&comments, &dedup.representative_indices);
    dedup.apply_trivial(&trivial);

    let batches = make_batches(&comments, &kept, &config.batch_options());

    let stats = &dedup.stats;
    println!(
        "Comments: {}  Unique: {}  Duplicates: {}  Trivial: {}",
        stats.original_count, stats.unique_count, stats.duplicate_count, stats.trivial_count
    );
    let saved = stats.original_count - stats.unique_count;
    if stats.original_count > 0 {
        println!(
            "LLM calls saved by dedup and filtering: {} comments ({:.1}%)",
            saved,
            saved as f64 / stats.original_count as f64 * 100.0
        );
    }
    println!();

    let mut t = ComfyTable::new();
    t.set_header(vec!["Batch", "Comments", "Est. tokens", "First comment"]);
    for batch in batches.iter().take(MAX_LISTED_BATCHES) {
        let first: String = batch
            .items
            .first()
            .map(|item| item.text.chars().take(60).collect())
            .unwrap_or_default();
        t.add_row(vec![
            Cell::new(batch.id),
            Cell::new(batch.len()),
            Cell::new(batch.estimated_tokens()),
            Cell::new(first),
        ]);
    }
    println!("{t}");
    if batches.len() > MAX_LISTED_BATCHES {
        println!("... and {} more batches", batches.len() - MAX_LISTED_BATCHES);
    }
    println!(
        "{} batches, {} estimated prompt tokens",
        batches.len(),
        batches.iter().map(|b| b.estimated_tokens()).sum::<usize>()
    );
    Ok(())
}
