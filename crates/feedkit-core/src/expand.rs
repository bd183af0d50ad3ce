//! # Result Expansion
//!
//! Maps batch results back onto every input row. Runs single-threaded after
//! the orchestrator has returned, so it needs no locking.

use std::collections::BTreeMap;

use crate::dedup::DeduplicationResult;
use crate::dispatch::BatchOutcome;
use crate::model::{Comment, FinalRow, PerCommentAnalysis};

/// Build one `FinalRow` per comment, in `original_index` order.
///
/// `cached` holds representatives answered from the analysis cache; a batch
/// result for the same index wins over a cached one. Rows whose
/// representative got no result are filled with the neutral fallback and
/// flagged `is_failed`.
pub fn expand(
    outcomes: &[BatchOutcome],
    cached: &BTreeMap<usize, PerCommentAnalysis>,
    dedup: &DeduplicationResult,
    comments: &[Comment],
) -> Vec<FinalRow> {
    let mut results: BTreeMap<usize, PerCommentAnalysis> = cached.clone();

    for outcome in outcomes.iter().filter(|o| o.is_success()) {
        if outcome.items.len() != outcome.indices.len() {
            tracing::warn!(
                batch_id = outcome.batch_id,
                indices = outcome.indices.len(),
                items = outcome.items.len(),
                "batch result count does not match its membership"
            );
        }
        for (&index, analysis) in outcome.indices.iter().zip(&outcome.items) {
            results.insert(index, analysis.clone());
        }
    }

    let mut failed = 0usize;
    let rows: Vec<FinalRow> = comments
        .iter()
        .map(|comment| {
            let index = comment.original_index;
            let is_trivial = dedup.trivial_indices.contains(&index);
            let is_duplicate = !is_trivial && dedup.duplicate_map.contains_key(&index);

            let (analysis, is_failed) = if is_trivial {
                (PerCommentAnalysis::fallback(), false)
            } else {
                match results.get(&dedup.representative_of(index)) {
                    Some(analysis) => (analysis.clone(), false),
                    None => {
                        failed += 1;
                        (PerCommentAnalysis::fallback(), true)
                    }
                }
            };

            FinalRow {
                index,
                original_text: comment.text.clone(),
                rating: comment.rating,
                analysis,
                is_duplicate,
                is_trivial,
                is_failed,
            }
        })
        .collect();

    if failed > 0 {
        tracing::warn!(failed, total = rows.len(), "rows filled with neutral defaults after failed batches");
    }

    rows
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dedup::{deduplicate, DedupOptions};
    use crate::dispatch::BatchStatus;
    use crate::model::{EmotionScores, NpsCategory};

    fn comments(texts: &[&str]) -> Vec<Comment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Comment::new(i, *t, 9))
            .collect()
    }

    fn analysis(churn: f64) -> PerCommentAnalysis {
        PerCommentAnalysis {
            emotions: EmotionScores::uniform(0.1),
            churn_risk: churn,
            pain_points: vec!["precio".into()],
            nps_category: NpsCategory::Detractor,
            is_fallback: false,
        }
    }

    fn success(batch_id: usize, indices: Vec<usize>, churns: &[f64]) -> BatchOutcome {
        BatchOutcome {
            batch_id,
            status: BatchStatus::Success,
            indices,
            items: churns.iter().map(|&c| analysis(c)).collect(),
            attempts: 1,
            error: None,
            issues: Vec::new(),
        }
    }

    #[test]
    fn test_duplicates_copy_and_batches_map_by_index() {
        let input = comments(&["Excelente!", "excelente", "Muy caro y lento", "La app se cae siempre"]);
        let dedup = deduplicate(&input, &DedupOptions::default());
        // Batch membership deliberately out of index order
        let outcomes = vec![success(0, vec![3, 0], &[0.9, 0.1]), success(1, vec![2], &[0.6])];

        let rows = expand(&outcomes, &BTreeMap::new(), &dedup, &input);
        assert_eq!(rows.len(), 4);
        assert_eq!(rows.iter().map(|r| r.index).collect::<Vec<_>>(), vec![0, 1, 2, 3]);
        assert_eq!(rows[0].analysis.churn_risk, 0.1);
        assert_eq!(rows[1].analysis.churn_risk, 0.1);
        assert!(rows[1].is_duplicate);
        assert!(!rows[0].is_duplicate);
        assert_eq!(rows[2].analysis.churn_risk, 0.6);
        assert_eq!(rows[3].analysis.churn_risk, 0.9);
        assert!(rows.iter().all(|r| !r.is_failed));
    }

    #[test]
    fn test_failed_batch_fills_defaults() {
        let input = comments(&["Muy caro y lento", "muy caro y lento.", "Buen soporte tecnico"]);
        let dedup = deduplicate(&input, &DedupOptions::default());
        let mut failed = success(0, vec![0], &[]);
        failed.status = BatchStatus::Failed;
        let outcomes = vec![failed, success(1, vec![2], &[0.3])];

        let rows = expand(&outcomes, &BTreeMap::new(), &dedup, &input);
        assert!(rows[0].is_failed && rows[0].analysis.is_fallback);
        assert!(rows[1].is_failed && rows[1].is_duplicate);
        assert!(!rows[2].is_failed);
    }

    #[test]
    fn test_trivial_rows_are_kept() {
        let input = comments(&["ok", "x", "Muy caro y lento"]);
        let mut dedup = deduplicate(&input, &DedupOptions::default());
        dedup.apply_trivial(&[0, 1]);

        let rows = expand(&[success(0, vec![2], &[0.7])], &BTreeMap::new(), &dedup, &input);
        assert_eq!(rows.len(), 3);
        assert!(rows[0].is_trivial && rows[1].is_trivial);
        assert!(rows[0].analysis.is_fallback);
        assert!(!rows[0].is_failed);
        assert_eq!(rows[2].analysis.churn_risk, 0.7);
    }

    #[test]
    fn test_cached_results_are_used() {
        let input = comments(&["Muy caro y lento", "Buen soporte tecnico"]);
        let dedup = deduplicate(&input, &DedupOptions::default());
        let cached: BTreeMap<usize, PerCommentAnalysis> = [(0, analysis(0.4))].into_iter().collect();

        let rows = expand(&[success(0, vec![1], &[0.2])], &cached, &dedup, &input);
        assert_eq!(rows[0].analysis.churn_risk, 0.4);
        assert_eq!(rows[1].analysis.churn_risk, 0.2);
    }

    #[test]
    fn test_all_duplicates_and_all_trivial() {
        let input = comments(&["Excelente servicio"; 5]);
        let dedup = deduplicate(&input, &DedupOptions::default());
        let rows = expand(&[success(0, vec![0], &[0.1])], &BTreeMap::new(), &dedup, &input);
        assert_eq!(rows.len(), 5);
        assert_eq!(rows.iter().filter(|r| r.is_duplicate).count(), 4);

        let input = comments(&["ok", "", "..."]);
        let mut dedup = deduplicate(&input, &DedupOptions::default());
        dedup.apply_trivial(&[0, 1, 2]);
        let rows = expand(&[], &BTreeMap::new(), &dedup, &input);
        assert_eq!(rows.len(), 3);
        assert!(rows.iter().all(|r| r.is_trivial));
    }

    #[test]
    fn test_empty() {
        let rows = expand(&[], &BTreeMap::new(), &DeduplicationResult::default(), &[]);
        assert!(rows.is_empty());
    }
}
