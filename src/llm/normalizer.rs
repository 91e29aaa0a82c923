//! Response normalizer.
//!
//! Turns free-form voter output into a structured ballot. Voters are asked
//! for a bare JSON object, but in practice answers arrive wrapped in
//! markdown code fences or with raw newlines embedded inside string values.
//! The normalizer strips fences, parses, and on failure runs a single
//! repair pass before giving up with `MalformedResponse`.

use serde_json::Value;

use crate::types::{AugurError, Choice};

/// A parsed, validated ballot.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedVote {
    pub choice: Choice,
    /// Clamped into 0.0–1.0.
    pub confidence: f64,
    pub rationale: String,
}

/// Confidence assumed when the voter omits the field.
const DEFAULT_CONFIDENCE: f64 = 0.5;

/// Parse raw voter text into a ballot.
pub fn parse_vote(raw: &str) -> Result<ParsedVote, AugurError> {
    let text = strip_code_fences(raw.trim());

    let parsed: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(first) => {
            let repaired = collapse_newlines_in_strings(&text);
            serde_json::from_str(&repaired).map_err(|second| {
                AugurError::MalformedResponse(format!(
                    "unparseable voter output ({first}; after repair: {second})"
                ))
            })?
        }
    };

    let obj = parsed.as_object().ok_or_else(|| {
        AugurError::MalformedResponse("voter output is not a JSON object".to_string())
    })?;

    let choice = match obj.get("prediction") {
        Some(Value::String(s)) => Choice::from_label(s),
        _ => Choice::NoTrade,
    };

    let confidence = match obj.get("confidence") {
        None | Some(Value::Null) => DEFAULT_CONFIDENCE,
        Some(Value::Number(n)) => n.as_f64().unwrap_or(DEFAULT_CONFIDENCE),
        Some(Value::String(s)) => s.trim().parse::<f64>().map_err(|_| {
            AugurError::MalformedResponse(format!("confidence is not numeric: {s:?}"))
        })?,
        Some(other) => {
            return Err(AugurError::MalformedResponse(format!(
                "confidence has unexpected type: {other}"
            )))
        }
    };
    let confidence = if confidence.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        confidence.clamp(0.0, 1.0)
    };

    let rationale = match obj.get("reasoning") {
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };

    Ok(ParsedVote {
        choice,
        confidence,
        rationale,
    })
}

/// Drop every line that opens or closes a markdown code fence.
fn strip_code_fences(text: &str) -> String {
    if !text.starts_with("```") {
        return text.to_string();
    }
    text.lines()
        .filter(|line| !line.trim().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Replace raw line breaks that sit inside JSON string literals with spaces.
///
/// Line breaks between tokens are left alone, so valid JSON is unchanged.
fn collapse_newlines_in_strings(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            if escaped {
                escaped = false;
                out.push(c);
                continue;
            }
            match c {
                '\\' => {
                    escaped = true;
                    out.push(c);
                }
                '"' => {
                    in_string = false;
                    out.push(c);
                }
                '\n' => out.push(' '),
                '\r' => {}
                _ => out.push(c),
            }
        } else {
            if c == '"' {
                in_string = true;
            }
            out.push(c);
        }
    }

    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let v = parse_vote(r#"{"prediction": "YES", "confidence": 0.72, "reasoning": "polls"}"#)
            .unwrap();
        assert_eq!(v.choice, Choice::Yes);
        assert!((v.confidence - 0.72).abs() < 1e-12);
        assert_eq!(v.rationale, "polls");
    }

    #[test]
    fn test_parse_strips_code_fences() {
        let raw = "```json\n{\"prediction\": \"no\", \"confidence\": 0.6, \"reasoning\": \"x\"}\n```";
        let v = parse_vote(raw).unwrap();
        assert_eq!(v.choice, Choice::No);
    }

    #[test]
    fn test_parse_repairs_raw_newlines_in_strings() {
        let raw = "{\"prediction\": \"YES\", \"confidence\": 0.8, \"reasoning\": \"line one\nline two\"}";
        assert!(serde_json::from_str::<Value>(raw).is_err());
        let v = parse_vote(raw).unwrap();
        assert_eq!(v.choice, Choice::Yes);
        assert_eq!(v.rationale, "line one line two");
    }

    #[test]
    fn test_parse_unknown_choice_defaults_to_no_trade() {
        let v = parse_vote(r#"{"prediction": "LEAN_YES", "confidence": 0.9}"#).unwrap();
        assert_eq!(v.choice, Choice::NoTrade);
    }

    #[test]
    fn test_parse_missing_fields_use_defaults() {
        let v = parse_vote("{}").unwrap();
        assert_eq!(v.choice, Choice::NoTrade);
        assert_eq!(v.confidence, DEFAULT_CONFIDENCE);
        assert!(v.rationale.is_empty());
    }

    #[test]
    fn test_parse_clamps_confidence() {
        let hi = parse_vote(r#"{"prediction": "YES", "confidence": 1.7}"#).unwrap();
        assert_eq!(hi.confidence, 1.0);
        let lo = parse_vote(r#"{"prediction": "NO", "confidence": -0.2}"#).unwrap();
        assert_eq!(lo.confidence, 0.0);
    }

    #[test]
    fn test_parse_numeric_string_confidence() {
        let v = parse_vote(r#"{"prediction": "YES", "confidence": "0.65"}"#).unwrap();
        assert!((v.confidence - 0.65).abs() < 1e-12);
    }

    #[test]
    fn test_parse_garbage_is_malformed() {
        let err = parse_vote("I think YES, about 70%").unwrap_err();
        assert!(matches!(err, AugurError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_non_object_is_malformed() {
        let err = parse_vote("[1, 2, 3]").unwrap_err();
        assert!(matches!(err, AugurError::MalformedResponse(_)));
    }

    #[test]
    fn test_parse_bad_confidence_is_malformed() {
        let err = parse_vote(r#"{"prediction": "YES", "confidence": "high"}"#).unwrap_err();
        assert!(matches!(err, AugurError::MalformedResponse(_)));
    }

    #[test]
    fn test_collapse_leaves_structural_newlines() {
        let text = "{\n  \"a\": \"b\\n\"\n}";
        assert_eq!(collapse_newlines_in_strings(text), text);
    }
}
