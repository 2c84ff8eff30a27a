//! Permissive JSON extraction from free-form LLM text.
//!
//! Strategy, in order: (1) a fenced ```json``` block, (2) the largest
//! brace-balanced region in the text, (3) give up. Used by AtomicPlanner,
//! StepExecutor (worker completion signal), and Verifier (reported files).

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::LazyLock;

static FENCED_JSON: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```json\s*(\{.*?\})\s*```").unwrap());

/// Extracts the most likely JSON object substring from free-form text, or
/// `None` if nothing resembling a JSON object is found.
pub fn extract_json_str(text: &str) -> Option<&str> {
    if let Some(caps) = FENCED_JSON.captures(text) {
        return caps.get(1).map(|m| m.as_str());
    }
    largest_balanced_braces(text)
}

/// Finds the largest `{...}` region with balanced braces. Falls back to the
/// first `{` through the last `}` if brace counting never returns to zero
/// (tolerates truncated LLM output).
fn largest_balanced_braces(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let bytes = text.as_bytes();
    let mut depth = 0i32;
    let mut best_end: Option<usize> = None;
    for (i, &b) in bytes.iter().enumerate().skip(start) {
        match b {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    best_end = Some(i);
                    break;
                }
            }
            _ => {}
        }
    }
    match best_end {
        Some(end) => Some(&text[start..=end]),
        None => text.rfind('}').map(|end| &text[start..=end]),
    }
}

/// Tries to parse a JSON object out of free-form text, tolerating either a
/// fenced block or raw braces. Returns `None` if no JSON parses.
pub fn try_parse_json_object(text: &str) -> Option<serde_json::Value> {
    let candidate = extract_json_str(text)?;
    serde_json::from_str(candidate).ok()
}

/// Tagged union for the worker's terminal completion signal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum WorkerSignal {
    Success {
        created_files: Vec<String>,
        #[serde(default)]
        summary: String,
    },
    Unrecognized {
        raw: String,
    },
}

/// Extracts the worker completion signal `{status:"success", summary, created_files}`
/// from raw worker output, or `CREATED_FILE:` regex lines as a secondary path,
/// falling back to `Unrecognized`.
pub fn extract_worker_signal(raw: &str) -> WorkerSignal {
    if let Some(value) = try_parse_json_object(raw) {
        let is_success = value
            .get("status")
            .and_then(|v| v.as_str())
            .map(|s| s.eq_ignore_ascii_case("success"))
            .unwrap_or(false);
        if is_success {
            let created_files = coerce_string_list(value.get("created_files"))
                .or_else(|| coerce_string_list(value.get("artifacts")))
                .unwrap_or_default();
            let summary = value
                .get("summary")
                .and_then(|v| v.as_str())
                .unwrap_or_default()
                .to_string();
            return WorkerSignal::Success {
                created_files,
                summary,
            };
        }
    }

    static CREATED_FILE_RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"CREATED_FILE:\s*(.*)").unwrap());
    let legacy: Vec<String> = CREATED_FILE_RE
        .captures_iter(raw)
        .filter_map(|c| c.get(1).map(|m| m.as_str().trim().to_string()))
        .collect();
    if !legacy.is_empty() {
        return WorkerSignal::Success {
            created_files: legacy,
            summary: String::new(),
        };
    }

    WorkerSignal::Unrecognized { raw: raw.to_string() }
}

/// Flexible key access: accepts either a JSON array of strings or a single
/// string (coerced to a one-element list).
pub fn coerce_string_list(value: Option<&serde_json::Value>) -> Option<Vec<String>> {
    match value {
        Some(serde_json::Value::Array(arr)) => Some(
            arr.iter()
                .filter_map(|v| v.as_str().map(|s| s.to_string()))
                .collect(),
        ),
        Some(serde_json::Value::String(s)) => Some(vec![s.clone()]),
        _ => None,
    }
}

/// Extracts reported files from worker output for the Verifier: prefers JSON
/// `created_files`/`artifacts` keys (flexible, string-coerced), falls back to
/// `CREATED_FILE:` regex lines.
pub fn extract_reported_files(raw: &str) -> Vec<String> {
    match extract_worker_signal(raw) {
        WorkerSignal::Success { created_files, .. } => created_files,
        WorkerSignal::Unrecognized { .. } => Vec::new(),
    }
}
