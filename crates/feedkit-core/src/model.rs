//! # Pipeline Data Model
//!
//! Comments live in one fixed-order `Vec<Comment>` for the whole run and are
//! referenced everywhere else by `original_index`. Dedup results, batch
//! membership and final rows all carry indices into that arena, so expanding
//! results back to the input order is a pure index lookup.

use serde::{Deserialize, Serialize};

/// One row of input as handed over by the ingestion layer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputRow {
    pub rating: i64,
    #[serde(alias = "comment_text", alias = "text")]
    pub comment: String,
}

/// An immutable input comment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub original_index: usize,
    pub text: String,
    /// Rating on the 0..=10 scale.
    pub rating: u8,
}

impl Comment {
    pub fn new(original_index: usize, text: impl Into<String>, rating: i64) -> Self {
        Self {
            original_index,
            text: text.into(),
            rating: rating.clamp(0, 10) as u8,
        }
    }
}

/// Build the comment arena from input rows, preserving their order.
pub fn comments_from_rows(rows: &[InputRow]) -> Vec<Comment> {
    rows.iter()
        .enumerate()
        .map(|(i, row)| Comment::new(i, row.comment.clone(), row.rating))
        .collect()
}

/// NPS bucket of a respondent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NpsCategory {
    Promoter,
    Passive,
    Detractor,
}

impl NpsCategory {
    /// Standard NPS bucketing: 9-10 promoter, 7-8 passive, 0-6 detractor.
    pub fn from_rating(rating: u8) -> Self {
        match rating {
            9..=u8::MAX => NpsCategory::Promoter,
            7..=8 => NpsCategory::Passive,
            _ => NpsCategory::Detractor,
        }
    }
}

/// The fixed emotion set extracted for every comment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Emotion {
    #[serde(rename = "satisfaccion")]
    Satisfaction,
    #[serde(rename = "frustracion")]
    Frustration,
    #[serde(rename = "enojo")]
    Anger,
    #[serde(rename = "confianza")]
    Trust,
    #[serde(rename = "decepcion")]
    Disappointment,
    #[serde(rename = "confusion")]
    Confusion,
    #[serde(rename = "anticipacion")]
    Anticipation,
}

impl Emotion {
    pub const ALL: [Emotion; 7] = [
        Emotion::Satisfaction,
        Emotion::Frustration,
        Emotion::Anger,
        Emotion::Trust,
        Emotion::Disappointment,
        Emotion::Confusion,
        Emotion::Anticipation,
    ];

    /// Wire key used in prompts, schemas and reports.
    pub fn key(self) -> &'static str {
        match self {
            Emotion::Satisfaction => "satisfaccion",
            Emotion::Frustration => "frustracion",
            Emotion::Anger => "enojo",
            Emotion::Trust => "confianza",
            Emotion::Disappointment => "decepcion",
            Emotion::Confusion => "confusion",
            Emotion::Anticipation => "anticipacion",
        }
    }
}

/// Per-emotion scores in [0, 1]. Missing keys in model output default to 0.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct EmotionScores {
    pub satisfaccion: f64,
    pub frustracion: f64,
    pub enojo: f64,
    pub confianza: f64,
    pub decepcion: f64,
    pub confusion: f64,
    pub anticipacion: f64,
}

impl EmotionScores {
    /// Every emotion set to the same value.
    pub fn uniform(value: f64) -> Self {
        Self {
            satisfaccion: value,
            frustracion: value,
            enojo: value,
            confianza: value,
            decepcion: value,
            confusion: value,
            anticipacion: value,
        }
    }

    pub fn get(&self, emotion: Emotion) -> f64 {
        match emotion {
            Emotion::Satisfaction => self.satisfaccion,
            Emotion::Frustration => self.frustracion,
            Emotion::Anger => self.enojo,
            Emotion::Trust => self.confianza,
            Emotion::Disappointment => self.decepcion,
            Emotion::Confusion => self.confusion,
            Emotion::Anticipation => self.anticipacion,
        }
    }

    /// Clamp every score into [0, 1]; NaN becomes 0.
    pub fn clamped(self) -> Self {
        Self {
            satisfaccion: unit(self.satisfaccion),
            frustracion: unit(self.frustracion),
            enojo: unit(self.enojo),
            confianza: unit(self.confianza),
            decepcion: unit(self.decepcion),
            confusion: unit(self.confusion),
            anticipacion: unit(self.anticipacion),
        }
    }
}

pub(crate) fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Structured analysis of one comment.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerCommentAnalysis {
    pub emotions: EmotionScores,
    pub churn_risk: f64,
    pub pain_points: Vec<String>,
    pub nps_category: NpsCategory,
    /// Set when this is a neutral filler rather than model output.
    #[serde(default)]
    pub is_fallback: bool,
}

/// Maximum pain points kept per comment.
pub const MAX_PAIN_POINTS: usize = 2;

impl PerCommentAnalysis {
    /// Neutral default used for trivial rows, failed batches and items the
    /// model returned in an unusable shape.
    pub fn fallback() -> Self {
        Self {
            emotions: EmotionScores::uniform(0.5),
            churn_risk: 0.5,
            pain_points: Vec::new(),
            nps_category: NpsCategory::Passive,
            is_fallback: true,
        }
    }

    /// Sentiment in [-1, 1] derived from the emotion scores.
    pub fn sentiment_score(&self) -> f64 {
        let e = &self.emotions;
        let positive = e.satisfaccion + e.confianza + e.anticipacion;
        let negative = e.frustracion + e.enojo + e.decepcion;
        let neutral = e.confusion;
        let raw = (positive - negative) / (positive + negative + neutral).max(1.0);
        crate::aggregate::round_to(raw, 2)
    }
}

/// One output row per input row, in input order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalRow {
    pub index: usize,
    pub original_text: String,
    pub rating: u8,
    pub analysis: PerCommentAnalysis,
    pub is_duplicate: bool,
    pub is_trivial: bool,
    /// The row's representative never got a result (batch failed or timed out).
    #[serde(default)]
    pub is_failed: bool,
}
