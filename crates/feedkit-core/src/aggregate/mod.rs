//! # Aggregation
//!
//! Builds the [`AggregateReport`] from final rows. Pure: the same rows and
//! options always give the same report, so a stored result set can be
//! re-aggregated later (for instance on the other NPS scale).
//!
//! Rounding is round-half-to-even at the stated precision.

pub mod nps;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::model::{Emotion, FinalRow, NpsCategory};

pub use nps::{nps_metrics, nps_score, NpsMetrics, NpsScale};

/// Round half-to-even at `decimals` places.
pub fn round_to(value: f64, decimals: u32) -> f64 {
    let factor = 10f64.powi(decimals as i32);
    (value * factor).round_ties_even() / factor
}

/// Where a row's NPS category comes from.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpsSource {
    /// Bucket the respondent's 0-10 rating.
    #[default]
    Rating,
    /// Use the category the model assigned.
    Model,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReportOptions {
    pub nps_scale: NpsScale,
    pub nps_source: NpsSource,
    /// Rows with churn risk strictly above this count as high risk.
    pub high_risk_threshold: f64,
    pub top_pain_points: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            nps_scale: NpsScale::Standard,
            nps_source: NpsSource::Rating,
            high_risk_threshold: 0.7,
            top_pain_points: 20,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChurnMetrics {
    pub average: f64,
    pub high_risk_count: usize,
    pub high_risk_percentage: f64,
    /// Row counts per band: `0-0.2` holds risks up to and including 0.2, and
    /// so on; `0.8-1.0` holds everything above 0.8.
    pub distribution: IndexMap<String, usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PainPointEntry {
    pub category: String,
    pub count: usize,
    /// Share of all rows mentioning this pain point.
    pub percentage: f64,
    /// Up to three source comments (first 100 chars each).
    pub examples: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmotionDistribution {
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionSummary {
    /// Mean score per emotion, in fixed emotion order.
    pub averages: IndexMap<String, f64>,
    pub top_5: Vec<(String, f64)>,
    /// How many emotion averages are high (> 0.7), medium or low (< 0.3).
    pub distribution: EmotionDistribution,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SentimentCounts {
    pub positive: usize,
    pub neutral: usize,
    pub negative: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowCounts {
    pub total: usize,
    pub duplicates: usize,
    pub trivial: usize,
    pub failed: usize,
}

/// Everything the dashboards and exporters need, derived from final rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateReport {
    pub rows: RowCounts,
    pub nps: NpsMetrics,
    pub churn: ChurnMetrics,
    pub pain_points: Vec<PainPointEntry>,
    pub emotions: EmotionSummary,
    pub sentiment: SentimentCounts,
}

const CHURN_BANDS: [(&str, f64); 5] = [
    ("0-0.2", 0.2),
    ("0.2-0.4", 0.4),
    ("0.4-0.6", 0.6),
    ("0.6-0.8", 0.8),
    ("0.8-1.0", f64::INFINITY),
];

const MAX_EXAMPLES: usize = 3;
const EXAMPLE_CHARS: usize = 100;

/// Sentiment scores beyond this magnitude count as positive or negative.
const SENTIMENT_NEUTRAL_BAND: f64 = 0.1;

/// Aggregate final rows into a report.
pub fn aggregate(rows: &[FinalRow], options: &ReportOptions) -> AggregateReport {
    AggregateReport {
        rows: row_counts(rows),
        nps: nps_metrics(
            rows.iter().map(|row| match options.nps_source {
                NpsSource::Rating => NpsCategory::from_rating(row.rating),
                NpsSource::Model => row.analysis.nps_category,
            }),
            options.nps_scale,
        ),
        churn: churn_metrics(rows, options.high_risk_threshold),
        pain_points: rank_pain_points(rows, options.top_pain_points),
        emotions: emotion_summary(rows),
        sentiment: sentiment_counts(rows),
    }
}

fn row_counts(rows: &[FinalRow]) -> RowCounts {
    RowCounts {
        total: rows.len(),
        duplicates: rows.iter().filter(|r| r.is_duplicate).count(),
        trivial: rows.iter().filter(|r| r.is_trivial).count(),
        failed: rows.iter().filter(|r| r.is_failed).count(),
    }
}

pub fn churn_metrics(rows: &[FinalRow], high_risk_threshold: f64) -> ChurnMetrics {
    let mut distribution: IndexMap<String, usize> =
        CHURN_BANDS.iter().map(|(label, _)| (label.to_string(), 0)).collect();

    let mut sum = 0.0;
    let mut high_risk_count = 0;
    for row in rows {
        let risk = row.analysis.churn_risk;
        sum += risk;
        if risk > high_risk_threshold {
            high_risk_count += 1;
        }
        if let Some((label, _)) = CHURN_BANDS.iter().find(|(_, upper)| risk <= *upper) {
            if let Some(count) = distribution.get_mut(*label) {
                *count += 1;
            }
        }
    }

    let (average, high_risk_percentage) = if rows.is_empty() {
        (0.0, 0.0)
    } else {
        let n = rows.len() as f64;
        (round_to(sum / n, 3), round_to(high_risk_count as f64 / n * 100.0, 1))
    };

    ChurnMetrics {
        average,
        high_risk_count,
        high_risk_percentage,
        distribution,
    }
}

fn example_text(text: &str) -> String {
    match text.char_indices().nth(EXAMPLE_CHARS) {
        Some((byte_idx, _)) => text[..byte_idx].to_string(),
        None => text.to_string(),
    }
}

/// Pain points by descending frequency; ties keep first-seen order.
pub fn rank_pain_points(rows: &[FinalRow], top_n: usize) -> Vec<PainPointEntry> {
    let mut seen: IndexMap<String, (usize, Vec<String>)> = IndexMap::new();

    for row in rows {
        for point in &row.analysis.pain_points {
            let key = point.trim().to_lowercase();
            if key.is_empty() {
                continue;
            }
            let (count, examples) = seen.entry(key).or_default();
            *count += 1;
            if examples.len() < MAX_EXAMPLES && !row.original_text.is_empty() {
                examples.push(example_text(&row.original_text));
            }
        }
    }

    let mut ranked: Vec<(String, (usize, Vec<String>))> = seen.into_iter().collect();
    ranked.sort_by(|a, b| b.1 .0.cmp(&a.1 .0));

    let total_rows = rows.len();
    ranked
        .into_iter()
        .take(top_n)
        .map(|(category, (count, examples))| PainPointEntry {
            percentage: if total_rows == 0 {
                0.0
            } else {
                round_to(count as f64 / total_rows as f64 * 100.0, 1)
            },
            category,
            count,
            examples,
        })
        .collect()
}

pub fn emotion_summary(rows: &[FinalRow]) -> EmotionSummary {
    let averages: IndexMap<String, f64> = Emotion::ALL
        .iter()
        .map(|&emotion| {
            let avg = if rows.is_empty() {
                0.0
            } else {
                let sum: f64 = rows.iter().map(|r| r.analysis.emotions.get(emotion)).sum();
                round_to(sum / rows.len() as f64, 3)
            };
            (emotion.key().to_string(), avg)
        })
        .collect();

    let mut top_5: Vec<(String, f64)> = averages.iter().map(|(k, v)| (k.clone(), *v)).collect();
    top_5.sort_by(|a, b| b.1.total_cmp(&a.1));
    top_5.truncate(5);

    let mut distribution = EmotionDistribution::default();
    if !rows.is_empty() {
        for &avg in averages.values() {
            if avg > 0.7 {
                distribution.high += 1;
            } else if avg >= 0.3 {
                distribution.medium += 1;
            } else {
                distribution.low += 1;
            }
        }
    }

    EmotionSummary {
        averages,
        top_5,
        distribution,
    }
}

fn sentiment_counts(rows: &[FinalRow]) -> SentimentCounts {
    let mut counts = SentimentCounts::default();
    for row in rows {
        let score = row.analysis.sentiment_score();
        if score > SENTIMENT_NEUTRAL_BAND {
            counts.positive += 1;
        } else if score < -SENTIMENT_NEUTRAL_BAND {
            counts.negative += 1;
        } else {
            counts.neutral += 1;
        }
    }
    counts
}
