// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Repair of assistant-produced tool-argument blobs that are not quite valid
//! JSON: missing values, stray commas, decimal literals missing a leading
//! zero, trailing XML tag garbage, and the Anthropic XML `<parameter>` form
//! some models fall back to when their native tool-call channel misfires.
//!
//! This is the single normalization point for malformed tool arguments — no
//! downstream consumer should branch on whether a call arrived as JSON, XML,
//! or a mix of both.

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

static MISSING_VALUE_COMMA: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"\\]*(?:\\.[^"\\]*)*)"\s*:\s*,"#).unwrap());
static LEADING_ZERO: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s*(-?)\.(\d)").unwrap());
static TRAILING_COMMA: Lazy<Regex> = Lazy::new(|| Regex::new(r",(\s*[}\]])").unwrap());
static XML_PARAMETER: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?s)<parameter\s+name="([^"]+)">(.*?)</parameter>"#).unwrap()
});
static TRAILING_XML_GARBAGE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^(.*[}\]])\s*(?:</?[A-Za-z][^>]*>\s*)+$").unwrap());

/// Attempt to turn `input` into parseable JSON, applying repairs in the
/// order the spec lists them. Returns the best-effort repaired text; the
/// caller parses the result and, on failure, reports it with the raw text
/// retained for logging — `repair` itself never fails.
pub fn repair(input: &str) -> String {
    let step1 = MISSING_VALUE_COMMA.replace_all(input, r#""$1":null,"#);
    let step2 = LEADING_ZERO.replace_all(&step1, ": ${1}0.$2");
    let step3 = TRAILING_COMMA.replace_all(&step2, "$1").into_owned();

    if serde_json::from_str::<Value>(&step3).is_ok() {
        return step3;
    }

    if let Some(caps) = TRAILING_XML_GARBAGE.captures(step3.trim()) {
        let stripped = caps.get(1).unwrap().as_str().to_string();
        if serde_json::from_str::<Value>(&stripped).is_ok() {
            return stripped;
        }
    }

    if XML_PARAMETER.is_match(&step3) {
        return merge_json_and_xml(&step3);
    }

    step3
}

/// Extract `(name, value)` pairs from Anthropic-style `<parameter
/// name="k">v</parameter>` tags, inferring each value's scalar type, and
/// merge them with any top-level `"key": value` pairs already present in
/// the JSON prefix (the "mixed JSON/XML" case).
fn merge_json_and_xml(text: &str) -> String {
    let mut obj = serde_json::Map::new();

    // Whatever JSON-looking prefix precedes the first `<parameter` tag may
    // itself be a (possibly incomplete) object literal; salvage its pairs.
    if let Some(prefix_end) = text.find("<parameter") {
        for (key, value) in extract_json_pairs(&text[..prefix_end]) {
            obj.insert(key, value);
        }
    }

    for caps in XML_PARAMETER.captures_iter(text) {
        let name = caps.get(1).unwrap().as_str().to_string();
        let raw = caps.get(2).unwrap().as_str().trim();
        obj.insert(name, infer_scalar(raw));
    }

    Value::Object(obj).to_string()
}

/// Best-effort extraction of top-level `"key": value` pairs from a JSON
/// object literal that may be truncated or missing its closing brace.
fn extract_json_pairs(fragment: &str) -> Vec<(String, Value)> {
    static PAIR: Lazy<Regex> = Lazy::new(|| {
        Regex::new(r#""([^"\\]*(?:\\.[^"\\]*)*)"\s*:\s*("(?:[^"\\]|\\.)*"|-?\d+\.?\d*|true|false|null)"#)
            .unwrap()
    });
    PAIR.captures_iter(fragment)
        .filter_map(|c| {
            let key = c.get(1)?.as_str().to_string();
            let raw = c.get(2)?.as_str();
            let value = serde_json::from_str(raw).unwrap_or(Value::String(raw.to_string()));
            Some((key, value))
        })
        .collect()
}

/// Infer the JSON scalar type of a bare XML parameter value.
fn infer_scalar(raw: &str) -> Value {
    match raw {
        "null" => return Value::Null,
        "true" => return Value::Bool(true),
        "false" => return Value::Bool(false),
        _ => {}
    }
    if let Ok(i) = raw.parse::<i64>() {
        return Value::Number(i.into());
    }
    if let Ok(f) = raw.parse::<f64>() {
        if let Some(n) = serde_json::Number::from_f64(f) {
            return Value::Number(n);
        }
    }
    Value::String(raw.to_string())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
