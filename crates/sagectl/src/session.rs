//! Scoring session controller.
//!
//! One session scores one captured answer. In judge mode the judge gets
//! exactly one corrective retry: its invalid output and a violation-driven
//! correction prompt are appended to the same conversation (the model sees
//! its own mistake), and a second failure degrades to the heuristic scorer
//! with the violation list recorded for observability. Nothing here ever
//! propagates a judge failure; a scoring session always yields a record or
//! an explicit absence.

use crate::cli::JudgeMode;
use crate::client::{QueryOutcome, QueryStatus};
use crate::judge::{build_judge_prompt, JudgeClient, JudgeMessage, JUDGE_RETRY_PROMPT, JUDGE_SYSTEM};
use sage_common::{heuristic_score, validate_judge_output, ScoreRecord, TestCase};
use tracing::warn;

/// Outcome of the judge call-validate-retry protocol.
#[derive(Debug)]
pub struct JudgeVerdict {
    pub record: Option<ScoreRecord>,
    pub raw: String,
    pub violation: Option<String>,
}

/// Call the judge, validating its output, with exactly one corrective
/// retry on validation failure.
pub async fn judge_with_retry(
    client: &dyn JudgeClient,
    case: &TestCase,
    answer: &str,
) -> JudgeVerdict {
    let mut messages = vec![JudgeMessage::user(build_judge_prompt(case, answer))];

    for attempt in 0..2 {
        let raw = match client.complete(JUDGE_SYSTEM, &messages).await {
            Ok(raw) => raw,
            Err(e) => {
                return JudgeVerdict {
                    record: None,
                    raw: String::new(),
                    violation: Some(format!("judge API call failed: {}", e)),
                }
            }
        };

        match validate_judge_output(&raw) {
            Ok(record) => {
                return JudgeVerdict {
                    record: Some(record),
                    raw,
                    violation: None,
                }
            }
            Err(violations) if attempt == 0 => {
                warn!(
                    "judge output invalid ({} violations), retrying once",
                    violations.len()
                );
                // Same conversation: the judge sees its own invalid output
                // followed by the correction prompt.
                messages.push(JudgeMessage::assistant(raw));
                messages.push(JudgeMessage::user(JUDGE_RETRY_PROMPT));
            }
            Err(violations) => {
                return JudgeVerdict {
                    record: None,
                    raw,
                    violation: Some(format!(
                        "judge validation failed after retry: {}",
                        violations.join("; ")
                    )),
                }
            }
        }
    }

    JudgeVerdict {
        record: None,
        raw: String::new(),
        violation: Some("judge scoring failed unexpectedly".to_string()),
    }
}

/// Result of scoring one case, ready for the output record.
#[derive(Debug, Default)]
pub struct ScoredCase {
    pub scoring: Option<ScoreRecord>,
    pub judge_raw: Option<String>,
    pub violations: Vec<String>,
}

/// Score one captured answer according to the selected mode, then apply
/// the round-cap override from the run's trace metadata.
pub async fn score_case(
    mode: JudgeMode,
    judge: Option<&dyn JudgeClient>,
    case: &TestCase,
    sut: &QueryOutcome,
) -> ScoredCase {
    let mut scored = ScoredCase::default();

    if mode == JudgeMode::None {
        return scored;
    }

    if sut.status != QueryStatus::Success || sut.answer.trim().is_empty() {
        // No answer to score: minimum record, violation recorded, batch
        // continues.
        let status = match sut.status {
            QueryStatus::Success => "empty",
            QueryStatus::Error => "error",
            QueryStatus::Timeout => "timeout",
        };
        scored.scoring = Some(ScoreRecord::minimum(&format!("SUT returned {}", status)));
        scored.violations.push(format!(
            "SUT status '{}': {}",
            status,
            sut.error.as_deref().unwrap_or("N/A")
        ));
    } else if mode == JudgeMode::Model {
        match judge {
            Some(client) => {
                let verdict = judge_with_retry(client, case, &sut.answer).await;
                scored.judge_raw = Some(verdict.raw);
                match verdict.record {
                    Some(record) => scored.scoring = Some(record),
                    None => {
                        // Degrade gracefully; the evaluation is not lost.
                        scored.scoring = Some(heuristic_score(case, &sut.answer));
                        if let Some(violation) = verdict.violation {
                            scored.violations.push(violation);
                        }
                    }
                }
            }
            None => {
                scored.scoring = Some(heuristic_score(case, &sut.answer));
                scored
                    .violations
                    .push("judge client not configured; used heuristic".to_string());
            }
        }
    } else {
        scored.scoring = Some(heuristic_score(case, &sut.answer));
    }

    // Cap enforcement applies after any scoring method.
    if let (Some(record), Some(tool_calls)) = (scored.scoring.as_mut(), sut.tool_calls) {
        if let Some(violation) = record.apply_round_cap(tool_calls) {
            scored.violations.push(violation);
        }
    }

    scored
}
