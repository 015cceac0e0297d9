//! Command-line interface for the evaluation runner.

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

/// Scoring strategy for captured answers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum JudgeMode {
    /// Capture answers only, no scoring.
    None,
    /// Deterministic keyword-overlap scoring.
    Heuristic,
    /// LLM judge with schema validation and heuristic fallback.
    Model,
}

fn parse_dimension(raw: &str) -> Result<u8, String> {
    match raw {
        "D1" | "D2" | "D3" | "D4" | "D5" | "D6" | "D7" => Ok(raw[1..].parse().unwrap()),
        _ => Err(format!("expected D1..D7, got '{}'", raw)),
    }
}

fn parse_question_type(raw: &str) -> Result<u8, String> {
    match raw {
        "Q1" | "Q2" | "Q3" | "Q4" | "Q5" => Ok(raw[1..].parse().unwrap()),
        _ => Err(format!("expected Q1..Q5, got '{}'", raw)),
    }
}

/// Sage evaluation runner: replays test prompts against a running saged,
/// captures the streamed answers, and scores them against the rubric.
#[derive(Debug, Parser)]
#[command(name = "sagectl", version, about)]
pub struct Cli {
    /// Run all built-in test cases.
    #[arg(long)]
    pub all: bool,

    /// Run tests for one dimension (D1..D7).
    #[arg(long, value_parser = parse_dimension)]
    pub dimension: Option<u8>,

    /// Run tests for one question type (Q1..Q5).
    #[arg(long = "question-type", value_parser = parse_question_type)]
    pub question_type: Option<u8>,

    /// Run only the first N tests after filtering.
    #[arg(long)]
    pub limit: Option<usize>,

    /// Print per-test details (prompt, answer, scores, reasons).
    #[arg(long, conflicts_with = "quiet")]
    pub verbose: bool,

    /// Suppress progress; print only the final summary.
    #[arg(long)]
    pub quiet: bool,

    /// Scoring mode.
    #[arg(long, value_enum, default_value = "heuristic")]
    pub judge: JudgeMode,

    /// Judge model override when --judge model.
    #[arg(long = "judge-model")]
    pub judge_model: Option<String>,

    /// Write per-test results as JSONL to FILE.
    #[arg(long, value_name = "FILE")]
    pub out: Option<PathBuf>,

    /// Sage server URL.
    #[arg(long, default_value = "http://127.0.0.1:7850")]
    pub server: String,
}

impl Cli {
    /// At least one selection flag is required.
    pub fn has_selection(&self) -> bool {
        self.all || self.dimension.is_some() || self.question_type.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dimension_parsing() {
        assert_eq!(parse_dimension("D3"), Ok(3));
        assert!(parse_dimension("D8").is_err());
        assert!(parse_dimension("3").is_err());
    }

    #[test]
    fn test_question_type_parsing() {
        assert_eq!(parse_question_type("Q5"), Ok(5));
        assert!(parse_question_type("Q6").is_err());
    }

    #[test]
    fn test_parse_combined_flags() {
        let cli = Cli::try_parse_from([
            "sagectl",
            "--dimension",
            "D1",
            "--question-type",
            "Q3",
            "--judge",
            "model",
            "--limit",
            "5",
        ])
        .unwrap();
        assert_eq!(cli.dimension, Some(1));
        assert_eq!(cli.question_type, Some(3));
        assert_eq!(cli.judge, JudgeMode::Model);
        assert_eq!(cli.limit, Some(5));
        assert!(cli.has_selection());
    }

    #[test]
    fn test_no_selection_detected() {
        let cli = Cli::try_parse_from(["sagectl", "--judge", "none"]).unwrap();
        assert!(!cli.has_selection());
    }

    #[test]
    fn test_verbose_quiet_conflict() {
        assert!(Cli::try_parse_from(["sagectl", "--all", "--verbose", "--quiet"]).is_err());
    }
}
