use chrono::{DateTime, Local};
use regex::Regex;
use std::sync::LazyLock;

const QUOTE_CHARS: &[char] = &['"', '\'', '“', '”', '‘', '’', '`', '„', '«', '»', ' '];

static FENCED_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)\s*```").expect("valid regex"));

/// Title without wrapping quotes or surrounding whitespace.
pub fn sanitize_title(raw: &str) -> String {
    raw.trim().trim_matches(QUOTE_CHARS).trim().to_string()
}

/// JSON payload of a chat reply, with any markdown code fence removed.
pub fn extract_json_block(text: &str) -> &str {
    match FENCED_BLOCK.captures(text).and_then(|c| c.get(1)) {
        Some(m) => m.as_str(),
        None => text.trim(),
    }
}

/// Identifier of one pipeline run, also the stem of its output files.
pub fn run_id(now: DateTime<Local>) -> String {
    format!("video_{}", now.format("%Y%m%d_%H%M%S"))
}
