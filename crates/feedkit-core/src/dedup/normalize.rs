use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Sentence punctuation stripped from the end of a normalized comment.
const TRAILING_PUNCTUATION: &[char] = &['.', ',', '!', '?', ';', ':'];

/// Canonicalize comment text for comparison.
///
/// Lower-cases, strips diacritics (NFD, then drops combining marks),
/// collapses whitespace runs to one space, and trims trailing sentence
/// punctuation. The stored comment text is never touched; this is only
/// used for hashing, bucketing and similarity.
///
/// Idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(text: &str) -> String {
    let lowered = text.to_lowercase();
    let stripped: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();
    let collapsed = stripped.split_whitespace().collect::<Vec<_>>().join(" ");
    // Trailing "bien ." leaves a space behind once the dot goes, so both are
    // trimmed together.
    collapsed
        .trim_end_matches(|c: char| TRAILING_PUNCTUATION.contains(&c) || c.is_whitespace())
        .to_string()
}
