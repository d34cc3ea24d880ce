//! Oracle response parsing
//!
//! Oracle output is free text that usually embeds one JSON object. Anything that cannot be
//! turned into scores degrades to the neutral vector instead of failing the evaluation.

use crate::types::{Dimension, ScoreVector};
use serde_json::Value;

pub const UNPARSEABLE_REASONING: &str =
    "The scoring response could not be parsed; neutral scores were assigned.";

/// First balanced `{...}` substring, ignoring braces inside string literals
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }

        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }

    None
}

/// Integer score from a number or numeric string
fn score_value(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.round() as i64)),
        Value::String(s) => s.trim().parse::<f64>().ok().map(|f| f.round() as i64),
        _ => None,
    }
}

/// Unescape literal `\n` sequences some models emit inside the reasoning string
pub fn format_reasoning(reasoning: &str) -> String {
    reasoning.replace("\\n", "\n").trim().to_string()
}

/// Parse an oracle response into a clamped score vector
///
/// Missing dimensions score 0; values are clamped into 0..=100. `None` when the text holds no
/// JSON object or the object does not parse.
pub fn try_parse_scores(text: &str) -> Option<ScoreVector> {
    let Some(raw) = extract_json_object(text) else {
        tracing::warn!("Scoring response contains no JSON object");
        return None;
    };

    let data: Value = match serde_json::from_str(raw) {
        Ok(data @ Value::Object(_)) => data,
        Ok(_) | Err(_) => {
            tracing::warn!("Scoring response JSON is invalid");
            return None;
        }
    };

    let mut scores = ScoreVector::default();
    for dim in Dimension::ALL {
        let value = data.get(dim.key()).and_then(score_value).unwrap_or(0);
        scores.set(dim, value);
    }

    scores.reasoning = match data.get("reasoning") {
        Some(Value::String(s)) => format_reasoning(s),
        Some(other) if !other.is_null() => format_reasoning(&other.to_string()),
        _ => String::new(),
    };

    Some(scores)
}

/// Like [`try_parse_scores`], degrading to the neutral vector
pub fn parse_scores(text: &str) -> ScoreVector {
    try_parse_scores(text).unwrap_or_else(|| ScoreVector::neutral(UNPARSEABLE_REASONING))
}
