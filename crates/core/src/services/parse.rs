//! Helpers for the loosely structured payloads the workflows return.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex_lite::Regex;
use serde_json::Value;

static THINK_BLOCK: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?s)<think>.*?</think>").unwrap());

/// Split a comma-separated image list, keeping only http(s) URLs.
pub fn parse_image_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| part.starts_with("http"))
        .map(String::from)
        .collect()
}

/// Remove `<think>...</think>` reasoning blocks.
pub fn strip_think(text: &str) -> String {
    THINK_BLOCK.replace_all(text, "").trim().to_string()
}

/// Extract a JSON object from model output.
///
/// Objects are returned as-is. Strings have reasoning blocks stripped and are
/// parsed from the first `{` to the last `}`.
pub fn parse_json_from_mixed(value: &Value) -> Option<Value> {
    match value {
        Value::Object(_) => Some(value.clone()),
        Value::String(text) => {
            let cleaned = strip_think(text);
            let start = cleaned.find('{')?;
            let end = cleaned.rfind('}')?;
            if end <= start {
                return None;
            }
            serde_json::from_str::<Value>(&cleaned[start..=end])
                .ok()
                .filter(Value::is_object)
        }
        _ => None,
    }
}

/// Flatten the analysis workflow's `tags` output into one string.
///
/// Tags arrive as a list, a plain string or a `{"tags": ...}` object, each
/// possibly embedded in model text. List items are joined with "，".
pub fn normalize_tags(value: &Value) -> String {
    match value {
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(s) => s.trim().to_string(),
                other => other.to_string(),
            })
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>()
            .join("，"),
        Value::Object(map) => map.get("tags").map(normalize_tags).unwrap_or_default(),
        Value::String(text) => {
            let cleaned = strip_think(text);
            match serde_json::from_str::<Value>(&cleaned) {
                Ok(parsed @ (Value::Array(_) | Value::Object(_))) => normalize_tags(&parsed),
                _ => match parse_json_from_mixed(value) {
                    Some(parsed) => normalize_tags(&parsed),
                    None => cleaned,
                },
            }
        }
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Read a number that may be encoded as a JSON number or a numeric string.
///
/// "NaN" and "inf" strings parse as floats but are not scores.
pub fn value_as_f64(value: &Value) -> Option<f64> {
    let parsed = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    parsed.filter(|n| n.is_finite())
}

/// Read a flag that may be a bool or a "true"/"false" string.
pub fn value_as_bool(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

/// Drop duplicates and blanks, keeping first occurrences in order.
pub fn dedup_preserve_order<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    items
        .into_iter()
        .map(|s| s.as_ref().trim().to_string())
        .filter(|s| !s.is_empty() && seen.insert(s.clone()))
        .collect()
}
