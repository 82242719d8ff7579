//! Defensive parsing of model output
//!
//! Both model tiers return free text that is supposed to contain a JSON
//! object but routinely arrives wrapped in code fences, with trailing
//! commas, stray control characters, or commentary around it. Parsing
//! never raises: anything unusable degrades to None and the caller falls
//! through to its tier-appropriate default.

use crate::types::{Priority, RuleAction, RuleId, RuleKind, RuleSuggestion, SuggestionKind, RuleTrigger};
use serde_json::Value;

/// Classifier output after coercion
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedClassification {
    /// Batch label; None means individual review
    pub batch_type: Option<String>,

    /// Clamped into [0, 1]; non-numeric values become 0
    pub confidence: f32,

    pub reason: String,

    /// Optional enrichment
    pub summary: Option<String>,
    pub priority: Option<Priority>,
    pub tags: Vec<String>,
}

/// Parse a classifier response. Returns None when no usable JSON object
/// can be located.
pub fn parse_classification(raw: &str) -> Option<ParsedClassification> {
    let value = extract_json_object(raw)?;

    // Unrecognized recommendation values coerce to the conservative
    // default: keep for individual review.
    let recommendation = value
        .get("recommendation")
        .or_else(|| value.get("category"))
        .and_then(Value::as_str)
        .unwrap_or("individual");

    let batch_type = if recommendation == "batch" {
        value
            .get("batch_type")
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
    } else {
        None
    };

    let confidence = coerce_confidence(value.get("confidence"));

    let reason = value
        .get("reason")
        .or_else(|| value.get("reasoning"))
        .and_then(Value::as_str)
        .unwrap_or("no reason given")
        .trim()
        .to_string();

    let summary = value
        .get("summary")
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let priority = value
        .get("priority")
        .and_then(Value::as_str)
        .and_then(|raw| match raw.trim().to_lowercase().as_str() {
            "low" => Some(Priority::Low),
            "normal" | "medium" => Some(Priority::Normal),
            "high" => Some(Priority::High),
            _ => None,
        });

    let tags = value
        .get("tags")
        .and_then(Value::as_array)
        .map(|tags| {
            tags.iter()
                .filter_map(Value::as_str)
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    Some(ParsedClassification {
        batch_type,
        confidence,
        reason,
        summary,
        priority,
        tags,
    })
}

/// Parse learning-loop output into rule suggestions.
///
/// Returns None when the output carries no usable JSON, discarding the
/// whole batch rather than partially trusting it. Individual entries with
/// an unrecognized kind or missing name are skipped.
pub fn parse_suggestions(raw: &str) -> Option<Vec<RuleSuggestion>> {
    let value = extract_json_object(raw)?;
    let entries = value.get("suggestions").and_then(Value::as_array)?;

    Some(entries.iter().filter_map(parse_suggestion).collect())
}

fn parse_suggestion(value: &Value) -> Option<RuleSuggestion> {
    let kind = match value.get("kind").and_then(Value::as_str)? {
        "new_rule" => SuggestionKind::NewRule,
        "refine_rule" => SuggestionKind::RefineRule,
        _ => return None,
    };

    let rule_kind = match value.get("rule_kind").and_then(Value::as_str).unwrap_or("structured") {
        "guidance" => RuleKind::Guidance,
        _ => RuleKind::Structured,
    };

    let name = value.get("name").and_then(Value::as_str)?.trim().to_string();
    if name.is_empty() {
        return None;
    }

    let trigger: Option<RuleTrigger> = value
        .get("trigger")
        .and_then(|t| serde_json::from_value(t.clone()).ok());

    let action: Option<RuleAction> = value
        .get("action")
        .and_then(|a| serde_json::from_value(a.clone()).ok())
        .or_else(|| {
            // Tolerate a bare batch_type in place of a tagged action
            value
                .get("batch_type")
                .and_then(Value::as_str)
                .map(|batch_type| RuleAction::Batch {
                    batch_type: batch_type.to_string(),
                })
        });

    let guidance = value
        .get("guidance")
        .and_then(Value::as_str)
        .map(str::to_string);

    let target_rule_id = value
        .get("target_rule_id")
        .and_then(Value::as_str)
        .and_then(|raw| RuleId::from_string(raw).ok());

    let rationale = value
        .get("rationale")
        .or_else(|| value.get("reason"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .trim()
        .to_string();

    Some(RuleSuggestion {
        kind,
        rule_kind,
        target_rule_id,
        name,
        trigger,
        action,
        guidance,
        confidence: coerce_confidence(value.get("confidence")),
        rationale,
    })
}

/// Clamp a confidence value into [0, 1]; non-numeric values become 0
pub fn coerce_confidence(value: Option<&Value>) -> f32 {
    let numeric = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    numeric.map(|n| n.clamp(0.0, 1.0) as f32).unwrap_or(0.0)
}

/// Locate and parse the first top-level JSON object in free text.
///
/// Strips code fences, ignores commentary around the object, removes
/// stray control characters, and tolerates trailing commas.
pub fn extract_json_object(raw: &str) -> Option<Value> {
    let candidate = first_object_slice(raw)?;
    let sanitized = sanitize(candidate);
    serde_json::from_str(&sanitized).ok()
}

/// Slice from the first '{' to its matching top-level '}', respecting
/// string literals and escapes
fn first_object_slice(raw: &str) -> Option<&str> {
    let start = raw.find('{')?;
    let bytes = raw.as_bytes();
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, &byte) in bytes[start..].iter().enumerate() {
        if escaped {
            escaped = false;
            continue;
        }
        match byte {
            b'\\' if in_string => escaped = true,
            b'"' => in_string = !in_string,
            b'{' if !in_string => depth += 1,
            b'}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return Some(&raw[start..start + offset + 1]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Drop control characters outside strings-irrelevant positions and remove
/// trailing commas before a closing brace or bracket
fn sanitize(candidate: &str) -> String {
    let mut out = String::with_capacity(candidate.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in candidate.chars() {
        if escaped {
            out.push(c);
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_string => {
                out.push(c);
                escaped = true;
            }
            '"' => {
                out.push(c);
                in_string = !in_string;
            }
            c if c.is_control() && c != '\n' && c != '\t' && c != '\r' => {
                // Stray control characters break serde even inside strings;
                // drop them everywhere
            }
            c if (c == '}' || c == ']') && !in_string => {
                // Remove a trailing comma left dangling before the close
                while out
                    .trim_end()
                    .ends_with(',')
                {
                    let trimmed_len = out.trim_end().len();
                    out.truncate(trimmed_len - 1);
                }
                out.push(c);
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_plain_json() {
        let raw = r#"{"recommendation": "batch", "batch_type": "newsletters", "confidence": 0.9, "reason": "recurring digest"}"#;
        let parsed = parse_classification(raw).unwrap();
        assert_eq!(parsed.batch_type.as_deref(), Some("newsletters"));
        assert!((parsed.confidence - 0.9).abs() < 1e-6);
        assert_eq!(parsed.reason, "recurring digest");
    }

    #[test]
    fn test_parse_code_fenced_json() {
        let raw = "Here is my analysis:\n```json\n{\"recommendation\": \"batch\", \"batch_type\": \"ci-results\", \"confidence\": 0.8, \"reason\": \"automated CI\"}\n```\nLet me know if you need more.";
        let parsed = parse_classification(raw).unwrap();
        assert_eq!(parsed.batch_type.as_deref(), Some("ci-results"));
    }

    #[test]
    fn test_parse_trailing_commas() {
        let raw = r#"{"recommendation": "batch", "batch_type": "newsletters", "confidence": 0.7, "reason": "digest", "tags": ["news", "weekly",],}"#;
        let parsed = parse_classification(raw).unwrap();
        assert_eq!(parsed.batch_type.as_deref(), Some("newsletters"));
        assert_eq!(parsed.tags, vec!["news", "weekly"]);
    }

    #[test]
    fn test_parse_control_characters() {
        let raw = "{\"recommendation\": \"individual\",\u{0003} \"confidence\": 0.5, \"reason\": \"needs\u{0007} review\"}";
        let parsed = parse_classification(raw).unwrap();
        assert!(parsed.batch_type.is_none());
        assert_eq!(parsed.reason, "needs review");
    }

    #[test]
    fn test_confidence_clamped_high() {
        let raw = r#"{"recommendation": "batch", "batch_type": "x", "confidence": 3.2, "reason": "r"}"#;
        assert_eq!(parse_classification(raw).unwrap().confidence, 1.0);
    }

    #[test]
    fn test_confidence_clamped_low() {
        let raw = r#"{"recommendation": "individual", "confidence": -0.4, "reason": "r"}"#;
        assert_eq!(parse_classification(raw).unwrap().confidence, 0.0);
    }

    #[test]
    fn test_confidence_non_numeric_becomes_zero() {
        let raw = r#"{"recommendation": "individual", "confidence": "very sure", "reason": "r"}"#;
        assert_eq!(parse_classification(raw).unwrap().confidence, 0.0);

        let raw = r#"{"recommendation": "individual", "reason": "r"}"#;
        assert_eq!(parse_classification(raw).unwrap().confidence, 0.0);
    }

    #[test]
    fn test_numeric_string_confidence_accepted() {
        let raw = r#"{"recommendation": "individual", "confidence": "0.75", "reason": "r"}"#;
        assert!((parse_classification(raw).unwrap().confidence - 0.75).abs() < 1e-6);
    }

    #[test]
    fn test_unknown_recommendation_coerces_to_individual() {
        let raw = r#"{"recommendation": "defer", "batch_type": "newsletters", "confidence": 0.9, "reason": "r"}"#;
        let parsed = parse_classification(raw).unwrap();
        assert!(parsed.batch_type.is_none());
    }

    #[test]
    fn test_empty_batch_type_means_individual() {
        let raw = r#"{"recommendation": "batch", "batch_type": "", "confidence": 0.9, "reason": "r"}"#;
        assert!(parse_classification(raw).unwrap().batch_type.is_none());

        let raw = r#"{"recommendation": "batch", "batch_type": null, "confidence": 0.9, "reason": "r"}"#;
        assert!(parse_classification(raw).unwrap().batch_type.is_none());
    }

    #[test]
    fn test_garbage_returns_none() {
        assert!(parse_classification("total nonsense, no json at all").is_none());
        assert!(parse_classification("{unclosed").is_none());
        assert!(parse_classification("").is_none());
    }

    #[test]
    fn test_brace_inside_string_does_not_truncate() {
        let raw = r#"{"recommendation": "individual", "confidence": 0.5, "reason": "subject contained '}' mid-text"}"#;
        let parsed = parse_classification(raw).unwrap();
        assert!(parsed.reason.contains('}'));
    }

    #[test]
    fn test_enrichment_fields_parsed() {
        let raw = r#"{
            "recommendation": "batch",
            "batch_type": "newsletters",
            "confidence": 0.8,
            "reason": "digest",
            "summary": "Weekly product digest",
            "priority": "low",
            "tags": ["newsletter", "product"]
        }"#;
        let parsed = parse_classification(raw).unwrap();
        assert_eq!(parsed.summary.as_deref(), Some("Weekly product digest"));
        assert_eq!(parsed.priority, Some(Priority::Low));
        assert_eq!(parsed.tags.len(), 2);
    }

    #[test]
    fn test_unknown_priority_dropped() {
        let raw = r#"{"recommendation": "individual", "confidence": 0.5, "reason": "r", "priority": "urgent!!"}"#;
        assert!(parse_classification(raw).unwrap().priority.is_none());
    }

    #[test]
    fn test_parse_suggestions() {
        let raw = r#"```json
        {"suggestions": [
            {"kind": "new_rule", "rule_kind": "structured", "name": "Batch vendor promos",
             "trigger": {"sender_domain": "vendor.io"}, "batch_type": "promotions",
             "confidence": 0.8, "rationale": "archived in bulk 9 times"},
            {"kind": "refine_rule", "rule_kind": "guidance", "name": "Keep invoices individual",
             "guidance": "Invoices stay individual", "confidence": 0.65, "rationale": "user engaged"}
        ]}
        ```"#;
        let suggestions = parse_suggestions(raw).unwrap();
        assert_eq!(suggestions.len(), 2);
        assert_eq!(suggestions[0].kind, SuggestionKind::NewRule);
        assert_eq!(
            suggestions[0].action,
            Some(RuleAction::Batch {
                batch_type: "promotions".to_string()
            })
        );
        assert_eq!(suggestions[1].rule_kind, RuleKind::Guidance);
    }

    #[test]
    fn test_suggestions_garbage_discards_whole_batch() {
        assert!(parse_suggestions("not json").is_none());
        assert!(parse_suggestions(r#"{"rules": []}"#).is_none());
    }

    #[test]
    fn test_suggestion_with_unknown_kind_skipped() {
        let raw = r#"{"suggestions": [
            {"kind": "delete_rule", "name": "nope", "confidence": 0.9, "rationale": "r"},
            {"kind": "new_rule", "name": "ok", "confidence": 0.9, "rationale": "r"}
        ]}"#;
        let suggestions = parse_suggestions(raw).unwrap();
        assert_eq!(suggestions.len(), 1);
        assert_eq!(suggestions[0].name, "ok");
    }
}
