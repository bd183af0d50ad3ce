//! # LLM Response Parser
//!
//! Turns repaired response text into exactly one `PerCommentAnalysis` per
//! batch item, in batch order.
//!
//! Uses a two-stage deserialization strategy:
//! 1. Parse the text into an untyped `serde_json::Value` and locate the
//!    result array.
//! 2. Deserialize each element on its own into the typed shape.
//!
//! This firebreak means one hallucinated element (a missing `churn_risk`,
//! an `nps` of `"neutral"`) only costs that one comment a neutral fallback
//! instead of throwing away the whole batch.

use serde::Deserialize;
use serde_json::Value;

use super::repair::result_array;
use crate::model::{unit, EmotionScores, NpsCategory, PerCommentAnalysis, MAX_PAIN_POINTS};

/// Wire shape of one analysis element.
#[derive(Debug, Deserialize)]
struct RawAnalysis {
    #[serde(default)]
    emotions: EmotionScores,
    churn_risk: f64,
    #[serde(default)]
    pain_points: Vec<String>,
    #[serde(alias = "nps_category")]
    nps: String,
}

/// Parsed batch: one analysis per expected item.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedBatch {
    pub items: Vec<PerCommentAnalysis>,
    /// Items that fell back to the neutral default (bad element or missing).
    pub fallback_count: usize,
}

fn parse_nps(raw: &str) -> Option<NpsCategory> {
    match raw.trim().to_lowercase().as_str() {
        "promoter" | "promotor" => Some(NpsCategory::Promoter),
        "passive" | "pasivo" | "neutral" => Some(NpsCategory::Passive),
        "detractor" => Some(NpsCategory::Detractor),
        _ => None,
    }
}

fn clean_pain_points(raw: Vec<String>) -> Vec<String> {
    let mut out: Vec<String> = Vec::with_capacity(MAX_PAIN_POINTS);
    for point in raw {
        let point = point.trim().to_lowercase();
        if point.is_empty() || out.contains(&point) {
            continue;
        }
        out.push(point);
        if out.len() == MAX_PAIN_POINTS {
            break;
        }
    }
    out
}

fn analysis_from_value(value: Value) -> Result<PerCommentAnalysis, String> {
    let raw: RawAnalysis = serde_json::from_value(value).map_err(|e| e.to_string())?;
    let nps_category = parse_nps(&raw.nps).ok_or_else(|| format!("unknown nps category '{}'", raw.nps))?;

    Ok(PerCommentAnalysis {
        emotions: raw.emotions.clamped(),
        churn_risk: unit(raw.churn_risk),
        pain_points: clean_pain_points(raw.pain_points),
        nps_category,
        is_fallback: false,
    })
}

/// Parse repaired response text into `expected` analyses, reading the
/// array under `results_key`.
///
/// Short results are padded with fallbacks, long ones truncated.
pub fn parse_analyses(text: &str, expected: usize, results_key: &str) -> ParsedBatch {
    let elements: Vec<Value> = match serde_json::from_str::<Value>(text) {
        Ok(value) => result_array(&value, results_key).cloned().unwrap_or_default(),
        Err(e) => {
            tracing::warn!(error = %e, "response text did not parse; every item falls back");
            Vec::new()
        }
    };

    if elements.len() > expected {
        tracing::warn!(expected, got = elements.len(), "model returned extra items; truncating");
    }

    let mut items = Vec::with_capacity(expected);
    let mut fallback_count = 0;

    for (position, element) in elements.into_iter().take(expected).enumerate() {
        match analysis_from_value(element) {
            Ok(analysis) => items.push(analysis),
            Err(e) => {
                tracing::debug!(position, error = %e, "dropped invalid analysis element");
                items.push(PerCommentAnalysis::fallback());
                fallback_count += 1;
            }
        }
    }

    while items.len() < expected {
        items.push(PerCommentAnalysis::fallback());
        fallback_count += 1;
    }

    ParsedBatch {
        items,
        fallback_count,
    }
}
