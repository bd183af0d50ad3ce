use serde::{Deserialize, Serialize};

use super::round_to;
use crate::model::NpsCategory;

/// Scale the NPS score is reported on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpsScale {
    /// -100..=100
    #[default]
    Standard,
    /// 0..=100, `(standard / 100 + 1) * 50`
    Shifted,
}

/// NPS counts, percentages and score for a set of rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpsMetrics {
    pub score: f64,
    pub scale: NpsScale,
    pub promoters: usize,
    pub promoters_percentage: f64,
    pub passives: usize,
    pub passives_percentage: f64,
    pub detractors: usize,
    pub detractors_percentage: f64,
    pub interpretation: String,
}

/// NPS score from category counts. Zero responses score 0 (50 when shifted).
pub fn nps_score(promoters: usize, passives: usize, detractors: usize, scale: NpsScale) -> f64 {
    let total = promoters + passives + detractors;
    let standard = if total == 0 {
        0.0
    } else {
        (promoters as f64 - detractors as f64) / total as f64 * 100.0
    };

    match scale {
        NpsScale::Standard => standard,
        NpsScale::Shifted => (standard / 100.0 + 1.0) * 50.0,
    }
}

/// Qualitative band for a score on the given scale.
pub fn interpretation(score: f64, scale: NpsScale) -> &'static str {
    match scale {
        NpsScale::Shifted => match score {
            s if s >= 75.0 => "excellent",
            s if s >= 50.0 => "good",
            s if s >= 25.0 => "needs_improvement",
            _ => "critical",
        },
        NpsScale::Standard => match score {
            s if s >= 70.0 => "excellent",
            s if s >= 50.0 => "great",
            s if s >= 0.0 => "good",
            s if s >= -50.0 => "needs_improvement",
            _ => "critical",
        },
    }
}

fn percentage(count: usize, total: usize) -> f64 {
    if total == 0 {
        0.0
    } else {
        round_to(count as f64 / total as f64 * 100.0, 1)
    }
}

/// Full metrics from a sequence of categories.
pub fn nps_metrics<I>(categories: I, scale: NpsScale) -> NpsMetrics
where
    I: IntoIterator<Item = NpsCategory>,
{
    let (mut promoters, mut passives, mut detractors) = (0usize, 0usize, 0usize);
    for category in categories {
        match category {
            NpsCategory::Promoter => promoters += 1,
            NpsCategory::Passive => passives += 1,
            NpsCategory::Detractor => detractors += 1,
        }
    }
    let total = promoters + passives + detractors;
    let score = round_to(nps_score(promoters, passives, detractors, scale), 1);

    NpsMetrics {
        score,
        scale,
        promoters,
        promoters_percentage: percentage(promoters, total),
        passives,
        passives_percentage: percentage(passives, total),
        detractors,
        detractors_percentage: percentage(detractors, total),
        interpretation: if total == 0 {
            "no_data".to_string()
        } else {
            interpretation(score, scale).to_string()
        },
    }
}
