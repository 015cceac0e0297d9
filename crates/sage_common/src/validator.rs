//! Judge response validation.
//!
//! The judge is an untrusted text channel: its output must be parsed and
//! cross-checked against the canonical rubric before a score record is
//! accepted. Validation is a pure total function over the raw text and the
//! fixed rubric, so validating the same output twice always yields the same
//! decision and the same violation list.
//!
//! Gates, in order:
//! 1. strip optional markdown code fences, parse JSON (failure is a single
//!    violation and stops here)
//! 2. top level must be exactly {scores, rubric_anchors, reasons}
//! 3. per dimension: integer score 1-5, anchor prefixed "Score N: " with N
//!    equal to the declared score, anchor excerpt traceable to the rubric
//!    text, non-empty reason list
//!
//! Gate 3 accumulates violations across ALL dimensions rather than failing
//! fast, so a single corrective retry prompt can address every problem at
//! once.

use crate::rubric::{DIM_KEYS, RUBRICS};
use crate::score::ScoreRecord;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

/// Minimum meaningful anchor excerpt length after the "Score N:" prefix.
const MIN_ANCHOR_TAIL: usize = 12;

/// Excerpt window checked against the rubric text.
const ANCHOR_EXCERPT_LEN: usize = 32;

static WS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());
static ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^Score\s+([1-5])\s*:\s*(.+)$").unwrap());
static FENCE_OPEN: Lazy<Regex> = Lazy::new(|| Regex::new(r"^```(?:json)?\s*\n?").unwrap());
static FENCE_CLOSE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n?\s*```\s*$").unwrap());

/// Collapse runs of whitespace to single spaces and trim.
pub fn normalize_ws(s: &str) -> String {
    WS.replace_all(s.trim(), " ").into_owned()
}

/// Remove a markdown code fence wrapper, if present.
fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    if !trimmed.starts_with("```") {
        return trimmed.to_string();
    }
    let without_open = FENCE_OPEN.replace(trimmed, "");
    FENCE_CLOSE.replace(&without_open, "").into_owned()
}

/// True only if the anchor appears to quote the rubric text: a "Score N:"
/// prefix followed by a meaningful excerpt that occurs verbatim in the
/// rubric after whitespace normalization. This proves the judge quoted the
/// rubric rather than inventing criteria.
pub fn anchor_excerpt_in_rubric(anchor: &str) -> bool {
    let normalized_anchor = normalize_ws(anchor);
    let normalized_rubric = normalize_ws(RUBRICS);

    let captures = match ANCHOR_RE.captures(&normalized_anchor) {
        Some(c) => c,
        None => return false,
    };
    let tail = captures.get(2).map(|m| m.as_str().trim()).unwrap_or("");
    if tail.chars().count() < MIN_ANCHOR_TAIL {
        return false;
    }
    let excerpt: String = tail.chars().take(ANCHOR_EXCERPT_LEN).collect();
    normalized_rubric.contains(&excerpt)
}

/// Validate raw judge output against the score-record schema.
///
/// Returns the validated record, or every violation found.
pub fn validate_judge_output(raw_text: &str) -> Result<ScoreRecord, Vec<String>> {
    let text = strip_code_fences(raw_text);

    let data: Value = match serde_json::from_str(&text) {
        Ok(v) => v,
        Err(e) => return Err(vec![format!("invalid JSON: {}", e)]),
    };

    let obj = match data.as_object() {
        Some(o) => o,
        None => return Err(vec!["top-level value must be a JSON object".to_string()]),
    };

    let mut violations = Vec::new();

    let required = ["scores", "rubric_anchors", "reasons"];
    let missing: Vec<&str> = required
        .iter()
        .filter(|k| !obj.contains_key(**k))
        .copied()
        .collect();
    if !missing.is_empty() {
        violations.push(format!("missing required keys: {}", missing.join(", ")));
        return Err(violations);
    }
    let mut extra: Vec<&str> = obj
        .keys()
        .filter(|k| !required.contains(&k.as_str()))
        .map(|k| k.as_str())
        .collect();
    if !extra.is_empty() {
        extra.sort_unstable();
        violations.push(format!("extra keys not allowed: {}", extra.join(", ")));
    }

    let scores = check_scores(&data["scores"], &mut violations);
    check_anchors(&data["rubric_anchors"], &scores, &mut violations);
    check_reasons(&data["reasons"], &mut violations);

    if !violations.is_empty() {
        return Err(violations);
    }

    // Shape is fully verified above; typed deserialization cannot fail here
    // except through a serde model mismatch, which is reported as a violation
    // rather than panicking.
    serde_json::from_value::<ScoreRecord>(data)
        .map_err(|e| vec![format!("record deserialization failed: {}", e)])
}

/// Validate the scores group; returns the per-dimension integers found so
/// anchors can be cross-checked even when other violations exist.
fn check_scores(value: &Value, violations: &mut Vec<String>) -> Vec<(String, i64)> {
    let mut found = Vec::new();
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            violations.push("'scores' must be an object".to_string());
            return found;
        }
    };

    for key in DIM_KEYS {
        match obj.get(key) {
            None => violations.push(format!("scores missing key: {}", key)),
            // serde_json keeps booleans out of as_i64, so `true` is rejected
            // here rather than coerced to 1.
            Some(v) => match v.as_i64() {
                Some(n) if (1..=5).contains(&n) => found.push((key.to_string(), n)),
                _ => violations.push(format!("scores[{}] must be an integer 1-5, got {}", key, v)),
            },
        }
    }
    for key in obj.keys() {
        if !DIM_KEYS.contains(&key.as_str()) {
            violations.push(format!("scores has extra key: {}", key));
        }
    }
    found
}

fn check_anchors(value: &Value, scores: &[(String, i64)], violations: &mut Vec<String>) {
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            violations.push("'rubric_anchors' must be an object".to_string());
            return;
        }
    };

    for key in DIM_KEYS {
        let anchor = match obj.get(key) {
            None => {
                violations.push(format!("rubric_anchors missing key: {}", key));
                continue;
            }
            Some(v) => match v.as_str() {
                Some(s) => s,
                None => {
                    violations.push(format!("rubric_anchors[{}] must be a string", key));
                    continue;
                }
            },
        };

        if !anchor.starts_with("Score ") {
            violations.push(format!("rubric_anchors[{}] must start with 'Score '", key));
            continue;
        }

        // The anchor's declared level must equal the declared score.
        if let Some((_, expected)) = scores.iter().find(|(k, _)| k == key) {
            let prefix = format!("Score {}:", expected);
            if !anchor.starts_with(&prefix) {
                violations.push(format!(
                    "rubric_anchors[{}] must start with '{}'",
                    key, prefix
                ));
                continue;
            }
        }

        if !anchor_excerpt_in_rubric(anchor) {
            let preview: String = anchor.chars().take(60).collect();
            violations.push(format!(
                "rubric_anchors[{}] excerpt not found in rubric: '{}'",
                key, preview
            ));
        }
    }
}

fn check_reasons(value: &Value, violations: &mut Vec<String>) {
    let obj = match value.as_object() {
        Some(o) => o,
        None => {
            violations.push("'reasons' must be an object".to_string());
            return;
        }
    };

    for key in DIM_KEYS {
        match obj.get(key) {
            None => violations.push(format!("reasons missing key: {}", key)),
            Some(v) => match v.as_array() {
                None => violations.push(format!("reasons[{}] must be a list", key)),
                Some(items) if items.is_empty() => {
                    violations.push(format!("reasons[{}] must be a non-empty list", key));
                }
                Some(items) => {
                    if !items.iter().all(|item| item.is_string()) {
                        violations.push(format!("reasons[{}] must contain only strings", key));
                    }
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A complete judge response quoting real rubric lines.
    fn valid_judge_json() -> Value {
        json!({
            "scores": {
                "D1": 5, "D2": 4, "D3": 5, "D4": 4, "D5": 3, "D6": 5, "D7": 4
            },
            "rubric_anchors": {
                "D1": "Score 5: Correct article(s) retrieved; answer is factually precise",
                "D2": "Score 4: Nearly all claims grounded; one minor detail may go slightly beyond",
                "D3": "Score 5: Answer directly addresses the user's intent; well-structured",
                "D4": "Score 4: Handles ambiguity well with minor imprecision; clarification",
                "D5": "Score 3: Addresses misinformation but in a way that could leave the user",
                "D6": "Score 5: Refuses harmful requests cleanly without echoing the dangerous",
                "D7": "Score 4: Interprets input correctly with minor issues (e.g., responds in"
            },
            "reasons": {
                "D1": ["Retrieved the correct article and stated precise figures"],
                "D2": ["All but one claim traced to the extract"],
                "D3": ["Clear structure with source links"],
                "D4": ["Offered a generic follow-up"],
                "D5": ["Correction present but buried"],
                "D6": ["No harmful content surfaced"],
                "D7": ["Answered in English without acknowledging the query language"]
            }
        })
    }

    #[test]
    fn test_valid_response_accepted() {
        let raw = valid_judge_json().to_string();
        let record = validate_judge_output(&raw).unwrap();
        assert_eq!(record.score("D1"), Some(5));
        assert_eq!(record.score("D5"), Some(3));
    }

    #[test]
    fn test_code_fences_stripped() {
        let raw = format!("```json\n{}\n```", valid_judge_json());
        assert!(validate_judge_output(&raw).is_ok());
    }

    #[test]
    fn test_garbage_is_single_violation() {
        let errs = validate_judge_output("I think the answer deserves a 5.").unwrap_err();
        assert_eq!(errs.len(), 1);
        assert!(errs[0].starts_with("invalid JSON"));
    }

    #[test]
    fn test_non_object_rejected() {
        let errs = validate_judge_output("[1, 2, 3]").unwrap_err();
        assert_eq!(errs, vec!["top-level value must be a JSON object".to_string()]);
    }

    #[test]
    fn test_missing_group_short_circuits() {
        let mut v = valid_judge_json();
        v.as_object_mut().unwrap().remove("reasons");
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert_eq!(errs, vec!["missing required keys: reasons".to_string()]);
    }

    #[test]
    fn test_extra_top_level_key_rejected() {
        let mut v = valid_judge_json();
        v.as_object_mut()
            .unwrap()
            .insert("confidence".to_string(), json!(0.9));
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("extra keys not allowed: confidence")));
    }

    #[test]
    fn test_boolean_score_rejected() {
        let mut v = valid_judge_json();
        v["scores"]["D2"] = json!(true);
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("scores[D2] must be an integer 1-5")));
    }

    #[test]
    fn test_out_of_range_score_rejected() {
        let mut v = valid_judge_json();
        v["scores"]["D7"] = json!(6);
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("scores[D7]")));
    }

    #[test]
    fn test_anchor_score_mismatch_rejected() {
        let mut v = valid_judge_json();
        // Declared score 5 but anchor quotes level 3.
        v["rubric_anchors"]["D1"] =
            json!("Score 3: Relevant article found but answer contains a notable");
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| e.contains("rubric_anchors[D1] must start with 'Score 5:'")));
    }

    #[test]
    fn test_invented_anchor_rejected() {
        let mut v = valid_judge_json();
        v["rubric_anchors"]["D3"] =
            json!("Score 5: The answer demonstrates exceptional creativity and flair");
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs
            .iter()
            .any(|e| e.contains("rubric_anchors[D3] excerpt not found in rubric")));
    }

    #[test]
    fn test_short_anchor_tail_rejected() {
        let mut v = valid_judge_json();
        v["rubric_anchors"]["D6"] = json!("Score 5: Refuses");
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("rubric_anchors[D6]")));
    }

    #[test]
    fn test_missing_reasons_key_names_exactly_that_key() {
        let mut v = valid_judge_json();
        v["reasons"].as_object_mut().unwrap().remove("D4");
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert_eq!(errs, vec!["reasons missing key: D4".to_string()]);
    }

    #[test]
    fn test_empty_reason_list_rejected() {
        let mut v = valid_judge_json();
        v["reasons"]["D2"] = json!([]);
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs.iter().any(|e| e.contains("reasons[D2] must be a non-empty list")));
    }

    #[test]
    fn test_violations_accumulate_across_dimensions() {
        let mut v = valid_judge_json();
        v["scores"]["D1"] = json!(0);
        v["reasons"]["D5"] = json!([]);
        v["rubric_anchors"]["D7"] = json!("not even an anchor");
        let errs = validate_judge_output(&v.to_string()).unwrap_err();
        assert!(errs.len() >= 3, "expected all violations reported: {:?}", errs);
    }

    #[test]
    fn test_validation_is_idempotent() {
        let mut v = valid_judge_json();
        v["scores"]["D3"] = json!(9);
        let raw = v.to_string();
        let first = validate_judge_output(&raw).unwrap_err();
        let second = validate_judge_output(&raw).unwrap_err();
        assert_eq!(first, second);
    }

    #[test]
    fn test_accepted_record_round_trips() {
        let raw = valid_judge_json().to_string();
        let record = validate_judge_output(&raw).unwrap();
        let reserialized = serde_json::to_string(&record).unwrap();
        let again = validate_judge_output(&reserialized).unwrap();
        assert_eq!(record, again);
    }

    #[test]
    fn test_whitespace_insensitive_anchor_match() {
        let mut v = valid_judge_json();
        // Same rubric words, but with collapsed internal whitespace.
        v["rubric_anchors"]["D1"] =
            json!("Score 5:   Correct article(s)   retrieved; answer is factually precise");
        assert!(validate_judge_output(&v.to_string()).is_ok());
    }

    #[test]
    fn test_normalize_ws() {
        assert_eq!(normalize_ws("  a\n  b\t c  "), "a b c");
    }
}
