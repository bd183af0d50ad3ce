pub mod analyze;
pub mod dedup;
pub mod report;

use std::path::Path;

use anyhow::{Context, Result};
use comfy_table::{Cell, Table as ComfyTable};

use feedkit_core::aggregate::AggregateReport;
use feedkit_core::config::{read_config, FeedkitConfig};
use feedkit_core::model::InputRow;

/// Config from `<dir>/feedkit.toml`, or defaults when the file is absent.
pub(crate) fn load_config(dir: &Path) -> Result<FeedkitConfig> {
    Ok(read_config(dir)?.unwrap_or_default())
}

/// Read an already-validated JSON array of input rows.
pub(crate) fn load_rows(path: &Path) -> Result<Vec<InputRow>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    let rows: Vec<InputRow> = serde_json::from_str(&content)
        .with_context(|| format!("{} is not a JSON array of {{rating, comment}} rows", path.display()))?;
    Ok(rows)
}

/// Print the aggregate report as terminal tables.
pub(crate) fn print_report(report: &AggregateReport) {
    let nps = &report.nps;
    println!(
        "Rows: {}  Duplicates: {}  Trivial: {}  Failed: {}",
        report.rows.total, report.rows.duplicates, report.rows.trivial, report.rows.failed
    );
    println!();
    println!("NPS: {:.1} ({})", nps.score, nps.interpretation);

    let mut t = ComfyTable::new();
    t.set_header(vec!["Category", "Count", "%"]);
    t.add_row(vec![
        Cell::new("Promoters"),
        Cell::new(nps.promoters),
        Cell::new(format!("{:.1}", nps.promoters_percentage)),
    ]);
    t.add_row(vec![
        Cell::new("Passives"),
        Cell::new(nps.passives),
        Cell::new(format!("{:.1}", nps.passives_percentage)),
    ]);
    t.add_row(vec![
        Cell::new("Detractors"),
        Cell::new(nps.detractors),
        Cell::new(format!("{:.1}", nps.detractors_percentage)),
    ]);
    println!("{t}");

    println!();
    println!(
        "Churn risk: average {:.2}, {} high-risk ({:.1}%)",
        report.churn.average, report.churn.high_risk_count, report.churn.high_risk_percentage
    );
    let mut t = ComfyTable::new();
    t.set_header(report.churn.distribution.keys().map(String::as_str).collect::<Vec<_>>());
    t.add_row(report.churn.distribution.values().map(|v| v.to_string()).collect::<Vec<_>>());
    println!("{t}");

    if !report.pain_points.is_empty() {
        println!();
        println!("Pain points:");
        let mut t = ComfyTable::new();
        t.set_header(vec!["Pain point", "Count", "%", "Example"]);
        for entry in &report.pain_points {
            t.add_row(vec![
                Cell::new(&entry.category),
                Cell::new(entry.count),
                Cell::new(format!("{:.1}", entry.percentage)),
                Cell::new(entry.examples.first().map(String::as_str).unwrap_or("")),
            ]);
        }
        println!("{t}");
    }

    println!();
    println!("Top emotions:");
    let mut t = ComfyTable::new();
    t.set_header(vec!["Emotion", "Average"]);
    for (emotion, average) in &report.emotions.top_5 {
        t.add_row(vec![Cell::new(emotion), Cell::new(format!("{:.2}", average))]);
    }
    println!("{t}");

    println!(
        "Sentiment: {} positive, {} neutral, {} negative",
        report.sentiment.positive, report.sentiment.neutral, report.sentiment.negative
    );
}
