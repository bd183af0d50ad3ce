//! # Comment Deduplication
//!
//! Collapses exact and near-identical comments so each distinct opinion is
//! sent to the LLM once. Runs in expected O(n):
//!
//! 1. **Exact pass**: SHA-256 of the normalized text, looked up in a hash map.
//! 2. **Near-duplicate pass**: only against earlier representatives that
//!    share the same normalized prefix (first `prefix_len` chars). Buckets keep
//!    comparisons local, so cost is bounded by bucket size rather than the
//!    whole input.
//!
//! Comments whose normalized form is shorter than `min_comparable_len` are
//! always kept as their own representative; collapsing every blank answer
//! into one row would hide how many respondents left no comment.
//!
//! The trivial filter ([`trivial`]) runs after deduplication on the
//! representatives only, and [`DeduplicationResult::apply_trivial`] moves the
//! trivial representatives and all their duplicates out of the dispatch set.

pub mod normalize;
pub mod trivial;

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::model::Comment;

pub use normalize::normalize;

/// Tuning knobs for deduplication.
#[derive(Debug, Clone)]
pub struct DedupOptions {
    /// Word-set Jaccard similarity at or above which two comments collapse.
    pub near_duplicate_threshold: f64,
    /// Number of normalized chars used as the near-duplicate bucket key.
    pub prefix_len: usize,
    /// Relative length difference above which two texts are never similar.
    pub length_ratio_cutoff: f64,
    /// Normalized texts shorter than this are never deduplicated.
    pub min_comparable_len: usize,
}

impl Default for DedupOptions {
    fn default() -> Self {
        Self {
            near_duplicate_threshold: 0.85,
            prefix_len: 50,
            length_ratio_cutoff: 0.30,
            min_comparable_len: 5,
        }
    }
}

/// Counts reported alongside a deduplication result.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DedupStats {
    pub original_count: usize,
    pub unique_count: usize,
    pub duplicate_count: usize,
    pub trivial_count: usize,
}

/// Partition of every input index into representative, duplicate, or trivial.
///
/// Invariants:
/// - every index in `0..original_count` appears in exactly one of
///   `representative_indices`, the keys of `duplicate_map`, or `trivial_indices`;
/// - every `duplicate_map` value is a member of `representative_indices`
///   (no chains).
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DeduplicationResult {
    /// Representatives in input order.
    pub representative_indices: Vec<usize>,
    /// Duplicate index → representative index.
    pub duplicate_map: BTreeMap<usize, usize>,
    /// Indices excluded from dispatch as carrying no signal.
    pub trivial_indices: BTreeSet<usize>,
    pub stats: DedupStats,
}

impl DeduplicationResult {
    /// Representative for an index, or the index itself if it is one.
    pub fn representative_of(&self, index: usize) -> usize {
        self.duplicate_map.get(&index).copied().unwrap_or(index)
    }

    /// Move trivial representatives, and every duplicate pointing at them,
    /// into `trivial_indices`.
    pub fn apply_trivial(&mut self, trivial_representatives: &[usize]) {
        if trivial_representatives.is_empty() {
            return;
        }
        let trivial: BTreeSet<usize> = trivial_representatives.iter().copied().collect();

        self.representative_indices.retain(|idx| !trivial.contains(idx));

        let orphaned: Vec<usize> = self
            .duplicate_map
            .iter()
            .filter(|(_, rep)| trivial.contains(rep))
            .map(|(dup, _)| *dup)
            .collect();
        for dup in &orphaned {
            self.duplicate_map.remove(dup);
        }

        self.trivial_indices.extend(trivial);
        self.trivial_indices.extend(orphaned);

        self.stats.unique_count = self.representative_indices.len();
        self.stats.duplicate_count = self.duplicate_map.len();
        self.stats.trivial_count = self.trivial_indices.len();
    }
}

/// Content hash of a normalized text.
pub fn content_hash(normalized: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Word-set Jaccard similarity with a length-ratio pre-check.
///
/// Symmetric: `similarity(a, b, c) == similarity(b, a, c)`.
pub fn similarity(a: &str, b: &str, length_ratio_cutoff: f64) -> f64 {
    let (la, lb) = (a.chars().count(), b.chars().count());
    let max_len = la.max(lb);
    if max_len == 0 {
        return 1.0;
    }
    if la.abs_diff(lb) as f64 / max_len as f64 > length_ratio_cutoff {
        return 0.0;
    }

    let words_a: BTreeSet<&str> = a.split_whitespace().collect();
    let words_b: BTreeSet<&str> = b.split_whitespace().collect();
    if words_a.is_empty() && words_b.is_empty() {
        return 1.0;
    }
    if words_a.is_empty() || words_b.is_empty() {
        return 0.0;
    }

    let inter = words_a.intersection(&words_b).count() as f64;
    let union = words_a.union(&words_b).count() as f64;
    inter / union
}

fn prefix_key(normalized: &str, prefix_len: usize) -> &str {
    match normalized.char_indices().nth(prefix_len) {
        Some((byte_idx, _)) => &normalized[..byte_idx],
        None => normalized,
    }
}

/// Deduplicate comments in one pass.
///
/// The first occurrence of each distinct text becomes the representative;
/// later exact or near-duplicates map to it.
pub fn deduplicate(comments: &[Comment], options: &DedupOptions) -> DeduplicationResult {
    let normalized: Vec<String> = comments.iter().map(|c| normalize(&c.text)).collect();

    // hash -> representative index
    let mut seen_hashes: HashMap<String, usize> = HashMap::with_capacity(comments.len());
    // prefix -> (position, index) of the representatives in that bucket
    let mut buckets: HashMap<&str, Vec<(usize, usize)>> = HashMap::new();

    let mut result = DeduplicationResult {
        stats: DedupStats {
            original_count: comments.len(),
            ..Default::default()
        },
        ..Default::default()
    };

    for (pos, comment) in comments.iter().enumerate() {
        let idx = comment.original_index;
        let text = normalized[pos].as_str();

        if text.chars().count() < options.min_comparable_len {
            result.representative_indices.push(idx);
            continue;
        }

        let hash = content_hash(text);
        if let Some(&rep) = seen_hashes.get(&hash) {
            tracing::trace!(duplicate = idx, representative = rep, "exact duplicate");
            result.duplicate_map.insert(idx, rep);
            continue;
        }

        let key = prefix_key(text, options.prefix_len);
        let near_rep = buckets.get(key).and_then(|members| {
            members.iter().copied().find(|&(member_pos, _)| {
                similarity(text, &normalized[member_pos], options.length_ratio_cutoff)
                    >= options.near_duplicate_threshold
            })
        });

        match near_rep {
            Some((_, rep)) => {
                tracing::trace!(duplicate = idx, representative = rep, "near duplicate");
                result.duplicate_map.insert(idx, rep);
                // Later exact copies of this text go straight to the same representative.
                seen_hashes.insert(hash, rep);
            }
            None => {
                seen_hashes.insert(hash, idx);
                buckets.entry(key).or_default().push((pos, idx));
                result.representative_indices.push(idx);
            }
        }
    }

    result.stats.unique_count = result.representative_indices.len();
    result.stats.duplicate_count = result.duplicate_map.len();

    tracing::debug!(
        original = result.stats.original_count,
        unique = result.stats.unique_count,
        duplicates = result.stats.duplicate_count,
        "deduplication complete"
    );

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    fn comments(texts: &[&str]) -> Vec<Comment> {
        texts
            .iter()
            .enumerate()
            .map(|(i, t)| Comment::new(i, *t, 5))
            .collect()
    }

    fn assert_partition(result: &DeduplicationResult, n: usize) {
        let mut seen = vec![0u8; n];
        for &i in &result.representative_indices {
            seen[i] += 1;
        }
        for (&dup, rep) in &result.duplicate_map {
            seen[dup] += 1;
            assert!(
                result.representative_indices.contains(rep),
                "duplicate {} points at non-representative {}",
                dup,
                rep
            );
        }
        for &i in &result.trivial_indices {
            seen[i] += 1;
        }
        assert!(seen.iter().all(|&c| c == 1), "not a partition: {:?}", seen);
    }

    #[test]
    fn test_exact_duplicates_after_normalization() {
        let input = comments(&["Excelente!", "excelente", "EXCELENTE.", "Muy caro y lento"]);
        let result = deduplicate(&input, &DedupOptions::default());

        assert_eq!(result.representative_indices, vec![0, 3]);
        assert_eq!(result.duplicate_map.get(&1), Some(&0));
        assert_eq!(result.duplicate_map.get(&2), Some(&0));
        assert_eq!(result.stats.unique_count, 2);
        assert_eq!(result.stats.duplicate_count, 2);
        assert_partition(&result, input.len());
    }

    #[test]
    fn test_near_duplicate_in_same_bucket() {
        let base = "el servicio de atencion al cliente fue muy lento y nadie respondio mis llamadas";
        let near = "el servicio de atencion al cliente fue muy lento y nadie respondio mis llamadas nunca";
        let input = comments(&[base, near]);
        let result = deduplicate(&input, &DedupOptions::default());

        assert_eq!(result.representative_indices, vec![0]);
        assert_eq!(result.duplicate_map.get(&1), Some(&0));
        let sim = similarity(&normalize(base), &normalize(near), 0.3);
        assert!(sim >= 0.85, "similarity {}", sim);
    }

    #[test]
    fn test_dissimilar_texts_in_same_bucket_stay_unique() {
        let a = "el servicio de atencion al cliente fue muy lento, tardaron una semana entera";
        let b = "el servicio de atencion al cliente fue muy lento pero al final resolvieron todo bien y rapido";
        let input = comments(&[a, b]);
        let result = deduplicate(&input, &DedupOptions::default());
        assert_eq!(result.representative_indices, vec![0, 1]);
        assert!(result.duplicate_map.is_empty());
    }

    #[test]
    fn test_short_comments_never_collapse() {
        let input = comments(&["", "", "ok", "ok", "  "]);
        let result = deduplicate(&input, &DedupOptions::default());
        assert_eq!(result.representative_indices, vec![0, 1, 2, 3, 4]);
        assert!(result.duplicate_map.is_empty());
        assert_partition(&result, input.len());
    }

    #[test]
    fn test_exact_copy_of_near_duplicate_maps_to_first_representative() {
        let base = "la aplicacion se cierra cada vez que intento pagar con tarjeta de credito";
        let near = "la aplicacion se cierra cada vez que intento pagar con tarjeta de credito hoy";
        let input = comments(&[base, near, near]);
        let result = deduplicate(&input, &DedupOptions::default());
        assert_eq!(result.representative_indices, vec![0]);
        assert_eq!(result.duplicate_map.get(&1), Some(&0));
        assert_eq!(result.duplicate_map.get(&2), Some(&0));
    }

    #[test]
    fn test_similarity_is_symmetric() {
        let pairs = [
            ("muy caro y lento", "muy caro y muy lento"),
            ("hola", "adios amigo mio"),
            ("", ""),
            ("a b c d", "a b c e"),
        ];
        for (a, b) in pairs {
            assert_eq!(similarity(a, b, 0.3), similarity(b, a, 0.3));
        }
    }

    #[test]
    fn test_similarity_length_precheck() {
        assert_eq!(similarity("precio", "precio precio precio precio", 0.3), 0.0);
    }

    #[test]
    fn test_prefix_key_is_char_based() {
        assert_eq!(prefix_key("ñandú", 2), "ña");
        assert_eq!(prefix_key("abc", 10), "abc");
    }

    #[test]
    fn test_apply_trivial_moves_duplicates_too() {
        let input = comments(&["gracias!", "Gracias", "Muy caro y lento", "gracias"]);
        let mut result = deduplicate(&input, &DedupOptions::default());
        assert_eq!(result.representative_indices, vec![0, 2]);

        result.apply_trivial(&[0]);
        assert_eq!(result.representative_indices, vec![2]);
        assert!(result.duplicate_map.is_empty());
        assert_eq!(
            result.trivial_indices.iter().copied().collect::<Vec<_>>(),
            vec![0, 1, 3]
        );
        assert_eq!(result.stats.trivial_count, 3);
        assert_partition(&result, input.len());
    }

    #[test]
    fn test_empty_input() {
        let result = deduplicate(&[], &DedupOptions::default());
        assert!(result.representative_indices.is_empty());
        assert_eq!(result.stats, DedupStats::default());
    }

    #[test]
    fn test_content_hash_is_hex_sha256() {
        let h = content_hash("excelente");
        assert_eq!(h.len(), 64);
        assert_eq!(h, content_hash("excelente"));
        assert_ne!(h, content_hash("excelente servicio"));
    }
}
