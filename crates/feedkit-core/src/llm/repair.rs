//! # Response Repair
//!
//! Turns whatever the model sent back into parseable JSON. Never fails:
//! the worst case is an empty result array plus a list of what went wrong.
//!
//! Stages, in order:
//! 1. Strip markdown fences and leading prose.
//! 2. Parse as-is (trailing garbage after a complete value is tolerated and
//!    reported).
//! 3. Close a truncated document: terminate an open string, drop a dangling
//!    comma, append the missing `}` / `]` closers.
//! 4. Salvage: cut back to the end of the last complete array element and
//!    close from there, discarding the tail.
//!
//! Once something parses, the result array length is compared against the
//! expected item count. A mismatch is only reported; padding is the parser's
//! job.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

/// Result of [`validate_and_repair`].
#[derive(Debug, Clone, PartialEq)]
pub struct Validation {
    /// Best-effort JSON text; always parses.
    pub text: String,
    /// True only if the input parsed unchanged with the expected item count.
    pub is_fully_valid: bool,
    pub issues: Vec<String>,
}

/// Maximum number of element boundaries tried during salvage.
const MAX_SALVAGE_CANDIDATES: usize = 16;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*(?:```|\z)").unwrap());

/// Validate a raw model response and repair it where possible.
///
/// `results_key` names the object field holding the result array.
pub fn validate_and_repair(raw: &str, expected_items: usize, results_key: &str) -> Validation {
    let mut issues = Vec::new();
    let candidate = extract_json(raw, &mut issues);

    let (text, value) = match parse_lenient(candidate, &mut issues) {
        Some(value) => (candidate.to_string(), value),
        None => {
            issues.push("response is not valid JSON".to_string());
            repair(candidate, &mut issues)
        }
    };

    match result_array(&value, results_key) {
        Some(items) if items.len() != expected_items => issues.push(format!(
            "expected {} items, got {}",
            expected_items,
            items.len()
        )),
        Some(_) => {}
        None => issues.push("no result array in response".to_string()),
    }

    Validation {
        text,
        is_fully_valid: issues.is_empty(),
        issues,
    }
}

/// Locate the result array: the value itself, its `results_key` field, or
/// the first array-valued field.
pub fn result_array<'a>(value: &'a Value, results_key: &str) -> Option<&'a Vec<Value>> {
    match value {
        Value::Array(items) => Some(items),
        Value::Object(map) => map
            .get(results_key)
            .and_then(Value::as_array)
            .or_else(|| map.values().find_map(Value::as_array)),
        _ => None,
    }
}

fn extract_json<'a>(raw: &'a str, issues: &mut Vec<String>) -> &'a str {
    let trimmed = raw.trim();

    if trimmed.contains("```") {
        if let Some(inner) = FENCE_RE.captures(trimmed).and_then(|c| c.get(1)) {
            issues.push("stripped markdown fence".to_string());
            return inner.as_str().trim();
        }
    }

    match trimmed.find(['{', '[']) {
        Some(0) | None => trimmed,
        Some(start) => {
            issues.push("skipped text before JSON".to_string());
            &trimmed[start..]
        }
    }
}

fn parse_lenient(text: &str, issues: &mut Vec<String>) -> Option<Value> {
    if let Ok(value) = serde_json::from_str::<Value>(text) {
        return Some(value);
    }

    // A complete value followed by junk ("...}\n\nHope this helps!")
    let mut stream = serde_json::Deserializer::from_str(text).into_iter::<Value>();
    match stream.next() {
        Some(Ok(value)) => {
            issues.push("ignored trailing content after JSON".to_string());
            Some(value)
        }
        _ => None,
    }
}

fn repair(text: &str, issues: &mut Vec<String>) -> (String, Value) {
    let closed = close_truncated(text);
    if let Ok(value) = serde_json::from_str::<Value>(&closed) {
        issues.push("closed truncated JSON".to_string());
        return (closed, value);
    }

    let scan = scan(text);
    for &cut in scan.element_ends.iter().rev().take(MAX_SALVAGE_CANDIDATES) {
        let salvaged = close_truncated(&text[..cut]);
        if let Ok(value) = serde_json::from_str::<Value>(&salvaged) {
            issues.push(format!(
                "salvaged complete elements, dropped {} trailing bytes",
                text.len() - cut
            ));
            return (salvaged, value);
        }
    }

    issues.push("unrecoverable response, using empty result".to_string());
    (String::from("[]"), Value::Array(Vec::new()))
}

#[derive(Debug, Default)]
struct ScanState {
    /// Closers for the currently open containers, innermost last.
    closers: Vec<char>,
    in_string: bool,
    /// Last char was a backslash inside a string.
    escaped: bool,
    /// Byte offsets just past each `}` that closed an array element.
    element_ends: Vec<usize>,
}

fn scan(text: &str) -> ScanState {
    let mut state = ScanState::default();

    for (i, c) in text.char_indices() {
        if state.in_string {
            if state.escaped {
                state.escaped = false;
            } else if c == '\\' {
                state.escaped = true;
            } else if c == '"' {
                state.in_string = false;
            }
            continue;
        }

        match c {
            '"' => state.in_string = true,
            '{' => state.closers.push('}'),
            '[' => state.closers.push(']'),
            '}' | ']' => {
                if state.closers.last() == Some(&c) {
                    state.closers.pop();
                    if c == '}' && state.closers.last() == Some(&']') {
                        state.element_ends.push(i + 1);
                    }
                }
            }
            _ => {}
        }
    }

    state
}

/// Close whatever is left open at the end of `text`.
fn close_truncated(text: &str) -> String {
    let state = scan(text);
    let mut out = text.to_string();

    if state.in_string {
        if state.escaped {
            out.pop();
        }
        out.push('"');
    }

    let kept = out.trim_end().len();
    out.truncate(kept);
    if out.ends_with(',') {
        out.pop();
    }

    out.extend(state.closers.iter().rev());
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "analyses";

    #[test]
    fn test_valid_response_passes_untouched() {
        let raw = r#"{"analyses":[{"churn_risk":0.1},{"churn_risk":0.9}]}"#;
        let v = validate_and_repair(raw, 2, KEY);
        assert!(v.is_fully_valid);
        assert!(v.issues.is_empty());
        assert_eq!(v.text, raw);
    }

    #[test]
    fn test_truncated_mid_string() {
        let raw = r#"{"r":[{"c":0.5,"p":"precio"},{"c":0.8,"p":"ser"#;
        let v = validate_and_repair(raw, 2, KEY);

        let value: Value = serde_json::from_str(&v.text).unwrap();
        assert_eq!(value["r"][0]["p"], "precio");
        assert_eq!(value["r"][0]["c"], 0.5);
        assert!(!v.is_fully_valid);
        assert!(!v.issues.is_empty());
    }

    #[test]
    fn test_trailing_comma_before_truncation() {
        let raw = r#"{"analyses":[{"churn_risk":0.2},"#;
        let v = validate_and_repair(raw, 1, KEY);
        let value: Value = serde_json::from_str(&v.text).unwrap();
        assert_eq!(result_array(&value, KEY).unwrap().len(), 1);
        assert!(!v.is_fully_valid);
    }

    #[test]
    fn test_salvage_when_closing_is_not_enough() {
        // Truncated right after a key; closing yields `{"b":}` which is invalid
        let raw = r#"{"analyses":[{"a":1},{"a":2},{"b":"#;
        let v = validate_and_repair(raw, 3, KEY);
        let value: Value = serde_json::from_str(&v.text).unwrap();
        let items = result_array(&value, KEY).unwrap();
        assert_eq!(items.len(), 2);
        assert!(v.issues.iter().any(|i| i.contains("salvaged")));
        assert!(v.issues.iter().any(|i| i.contains("expected 3 items, got 2")));
    }

    #[test]
    fn test_truncated_number_is_salvaged() {
        let raw = r#"[{"c":0.5},{"c":0."#;
        let v = validate_and_repair(raw, 2, KEY);
        let value: Value = serde_json::from_str(&v.text).unwrap();
        assert_eq!(value.as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_markdown_fence_and_prose() {
        let raw = "Claro, aqui tienes:\n```json\n{\"analyses\": [{\"c\": 1}]}\n```\nSaludos";
        let v = validate_and_repair(raw, 1, KEY);
        let value: Value = serde_json::from_str(&v.text).unwrap();
        assert_eq!(result_array(&value, KEY).unwrap().len(), 1);
        assert!(!v.is_fully_valid);

        let raw = "Resultado: {\"analyses\": []}";
        let v = validate_and_repair(raw, 0, KEY);
        assert_eq!(v.text, "{\"analyses\": []}");
    }

    #[test]
    fn test_unterminated_fence() {
        let raw = "```json\n{\"analyses\": [{\"c\": 1}, {\"c\": 2";
        let v = validate_and_repair(raw, 2, KEY);
        let value: Value = serde_json::from_str(&v.text).unwrap();
        assert_eq!(result_array(&value, KEY).unwrap().len(), 2);
    }

    #[test]
    fn test_escaped_quote_inside_string() {
        let raw = r#"{"analyses":[{"p":"dijo \"caro\" y"#;
        let v = validate_and_repair(raw, 1, KEY);
        let value: Value = serde_json::from_str(&v.text).unwrap();
        assert_eq!(value["analyses"][0]["p"], "dijo \"caro\" y");
    }

    #[test]
    fn test_dangling_backslash() {
        let raw = r#"{"analyses":[{"p":"abc\"#;
        let v = validate_and_repair(raw, 1, KEY);
        assert!(serde_json::from_str::<Value>(&v.text).is_ok());
    }

    #[test]
    fn test_trailing_garbage() {
        let raw = "{\"analyses\": [{\"c\": 1}]}\n\nEspero que sirva.";
        let v = validate_and_repair(raw, 1, KEY);
        assert!(v.issues.iter().any(|i| i.contains("trailing")));
    }

    #[test]
    fn test_garbage_never_panics() {
        for raw in ["", "   ", "no json here", "}}}]]]", "{\"a\":", "[", "\"unterminated"] {
            let v = validate_and_repair(raw, 3, KEY);
            assert!(serde_json::from_str::<Value>(&v.text).is_ok(), "{:?} -> {:?}", raw, v.text);
            assert!(!v.is_fully_valid);
            assert!(!v.issues.is_empty());
        }
    }

    #[test]
    fn test_count_mismatch_is_reported() {
        let v = validate_and_repair(r#"{"analyses":[{}]}"#, 3, KEY);
        assert!(!v.is_fully_valid);
        assert_eq!(v.issues, vec!["expected 3 items, got 1".to_string()]);
    }

    #[test]
    fn test_configured_key_wins_over_other_arrays() {
        let raw = r#"{"notes": [], "results": [{"churn_risk": 0.9, "nps": "detractor"}]}"#;
        let v = validate_and_repair(raw, 1, "results");
        assert!(v.is_fully_valid, "{:?}", v.issues);

        // Default key absent: the first array field ("notes") is picked instead
        let v = validate_and_repair(raw, 1, KEY);
        assert_eq!(v.issues, vec!["expected 1 items, got 0".to_string()]);
    }

    #[test]
    fn test_first_array_field_is_used() {
        let value: Value = serde_json::from_str(r#"{"meta": 1, "results": [1, 2]}"#).unwrap();
        assert_eq!(result_array(&value, KEY).unwrap().len(), 2);
    }
}
