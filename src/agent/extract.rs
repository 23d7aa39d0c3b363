//! Topic extraction from model output
//!
//! Models return topic lists in whatever framing they feel like: bare JSON,
//! fenced code blocks, JSON embedded in prose, or almost-JSON with trailing
//! commas. Extraction runs a fixed sequence of stages from strictest to most
//! forgiving and returns the first stage that yields a valid list. It never
//! errors; a hopeless payload extracts to an empty list.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Maximum topics kept from a single extraction.
const MAX_TOPICS: usize = 20;

/// A candidate content topic surfaced during discovery.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Topic {
    pub title: String,
    #[serde(default)]
    pub summary: String,
}

/// Extract a topic list from raw model text. Stages, in order:
/// whole-text JSON, fenced ```json block, first balanced `[...]` substring
/// (with a trailing-comma cleanup retry), then regex recovery of
/// title/summary fragments.
pub fn extract_topics(text: &str) -> Vec<Topic> {
    let stages: [(&str, fn(&str) -> Option<Vec<Topic>>); 4] = [
        ("whole_text", parse_whole_text),
        ("fenced_block", parse_fenced_block),
        ("balanced_array", parse_balanced_array),
        ("fragment_regex", parse_fragments),
    ];

    for (name, stage) in stages {
        if let Some(topics) = stage(text) {
            tracing::debug!("Extracted {} topics via {}", topics.len(), name);
            return topics;
        }
    }

    tracing::warn!("No topic list found in model output ({} chars)", text.chars().count());
    Vec::new()
}

fn parse_whole_text(text: &str) -> Option<Vec<Topic>> {
    let value: Value = serde_json::from_str(text.trim()).ok()?;
    validate(value)
}

fn parse_fenced_block(text: &str) -> Option<Vec<Topic>> {
    let re = Regex::new(r"```(?:json)?\s*([\s\S]*?)```").ok()?;
    for capture in re.captures_iter(text) {
        let inner = capture.get(1)?.as_str().trim();
        if let Ok(value) = serde_json::from_str::<Value>(inner) {
            if let Some(topics) = validate(value) {
                return Some(topics);
            }
        }
    }
    None
}

/// Find the first balanced top-level `[...]` and try to parse it; on
/// failure, strip trailing commas before `]` or `}` and retry once.
fn parse_balanced_array(text: &str) -> Option<Vec<Topic>> {
    let candidate = balanced_array_substring(text)?;

    if let Ok(value) = serde_json::from_str::<Value>(&candidate) {
        if let Some(topics) = validate(value) {
            return Some(topics);
        }
    }

    let cleaned = Regex::new(r",\s*([\]}])").ok()?.replace_all(&candidate, "$1").into_owned();
    let value = serde_json::from_str::<Value>(&cleaned).ok()?;
    validate(value)
}

fn balanced_array_substring(text: &str) -> Option<String> {
    let start = text.find('[')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if ch == '\\' {
                escaped = true;
            } else if ch == '"' {
                in_string = false;
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '[' => depth += 1,
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return Some(text[start..start + offset + ch.len_utf8()].to_string());
                }
            }
            _ => {}
        }
    }
    None
}

/// Last resort: pull individual `{"title": ..., "summary": ...}` objects out
/// of broken JSON.
fn parse_fragments(text: &str) -> Option<Vec<Topic>> {
    let re = Regex::new(r#"\{\s*"title"\s*:\s*"((?:[^"\\]|\\.)*)"\s*,\s*"summary"\s*:\s*"((?:[^"\\]|\\.)*)"\s*\}"#).ok()?;

    let mut topics = Vec::new();
    for capture in re.captures_iter(text) {
        let title = unescape(capture.get(1)?.as_str());
        if title.trim().is_empty() {
            continue;
        }
        topics.push(Topic {
            title,
            summary: unescape(capture.get(2)?.as_str()),
        });
        if topics.len() == MAX_TOPICS {
            break;
        }
    }

    if topics.is_empty() {
        None
    } else {
        Some(topics)
    }
}

fn unescape(s: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", s)).unwrap_or_else(|_| s.to_string())
}

/// A valid extraction is a non-empty array of objects that each carry a
/// non-empty title. Anything else rejects the stage.
fn validate(value: Value) -> Option<Vec<Topic>> {
    let items = value.as_array()?;
    if items.is_empty() {
        return None;
    }

    let mut topics = Vec::new();
    for item in items {
        let obj = item.as_object()?;
        let title = obj.get("title")?.as_str()?.trim();
        if title.is_empty() {
            return None;
        }
        topics.push(Topic {
            title: title.to_string(),
            summary: obj
                .get("summary")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        });
        if topics.len() == MAX_TOPICS {
            break;
        }
    }
    Some(topics)
}
