//! Defensive extraction of JSON from model output.
//!
//! Stage prompts constrain the model to a single JSON object, but models wrap
//! answers in code fences or prose anyway. Try a direct parse, then fenced
//! blocks, then brace matching. Callers fall back to their stage-specific
//! safe default on `None` and log the raw text.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::de::DeserializeOwned;

static CODE_FENCE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"```(?:json)?\s*\n?([\s\S]*?)\n?```").unwrap());

pub fn extract_json<T: DeserializeOwned>(content: &str) -> Option<T> {
    let content = content.trim();

    // Try direct JSON parse first
    if let Ok(value) = serde_json::from_str::<T>(content) {
        return Some(value);
    }

    // Try to extract JSON from markdown code blocks
    if let Some(captures) = CODE_FENCE.captures(content) {
        if let Some(fenced) = captures.get(1) {
            if let Ok(value) = serde_json::from_str::<T>(fenced.as_str().trim()) {
                return Some(value);
            }
        }
    }

    // Try to find a JSON object anywhere in the content
    if let Some(start) = content.find('{') {
        let mut depth = 0;
        let mut end = start;
        for (i, c) in content[start..].char_indices() {
            match c {
                '{' => depth += 1,
                '}' => {
                    depth -= 1;
                    if depth == 0 {
                        end = start + i + 1;
                        break;
                    }
                }
                _ => {}
            }
        }
        if end > start {
            if let Ok(value) = serde_json::from_str::<T>(&content[start..end]) {
                return Some(value);
            }
        }
    }

    None
}
