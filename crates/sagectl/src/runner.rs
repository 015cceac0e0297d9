//! Batch evaluation driver.
//!
//! Runs the selected test cases sequentially against the SUT, scores each
//! captured answer, appends one JSONL record per case as it finishes
//! (streaming append, never a whole-file rewrite), and prints the summary.

use crate::cli::{Cli, JudgeMode};
use crate::client::{QueryOutcome, QueryStatus, SutClient, REQUEST_TIMEOUT};
use crate::judge::{HttpJudgeClient, JudgeClient};
use crate::report;
use crate::session::score_case;
use anyhow::{bail, Context, Result};
use console::style;
use sage_common::{filter_cases, SageConfig, ScoreRecord, TestCase, DIM_KEYS};
use serde::Serialize;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;

/// Test-case fields carried into the output record.
#[derive(Debug, Clone, Serialize)]
pub struct CaseInfo {
    pub id: String,
    pub dimension: u8,
    pub dimension_name: String,
    pub question_type: u8,
    pub question_type_name: String,
    pub prompt: String,
}

impl From<&TestCase> for CaseInfo {
    fn from(tc: &TestCase) -> Self {
        Self {
            id: tc.id.to_string(),
            dimension: tc.dimension,
            dimension_name: tc.dimension_name().to_string(),
            question_type: tc.question_type,
            question_type_name: tc.question_type_name().to_string(),
            prompt: tc.prompt.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SutInfo {
    pub answer: String,
    pub elapsed: f64,
    pub status: QueryStatus,
    pub tool_calls: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct JudgeInfo {
    pub mode: String,
    pub model: Option<String>,
    pub raw_json: Option<String>,
}

/// One line of the JSONL output.
#[derive(Debug, Serialize)]
pub struct CaseRecord {
    pub timestamp: String,
    pub test_case: CaseInfo,
    pub sut: SutInfo,
    pub scoring: Option<ScoreRecord>,
    pub judge: JudgeInfo,
    pub violations: Vec<String>,
}

/// Append-only JSONL sink, flushed per record.
pub struct JsonlWriter {
    inner: BufWriter<File>,
    written: usize,
}

impl JsonlWriter {
    pub fn create(path: &Path) -> Result<Self> {
        let file = File::create(path)
            .with_context(|| format!("cannot create output file {}", path.display()))?;
        Ok(Self {
            inner: BufWriter::new(file),
            written: 0,
        })
    }

    pub fn append(&mut self, record: &CaseRecord) -> Result<()> {
        let line = serde_json::to_string(record)?;
        writeln!(self.inner, "{}", line)?;
        self.inner.flush()?;
        self.written += 1;
        Ok(())
    }

    pub fn written(&self) -> usize {
        self.written
    }
}

fn mode_name(mode: JudgeMode) -> &'static str {
    match mode {
        JudgeMode::None => "none",
        JudgeMode::Heuristic => "heuristic",
        JudgeMode::Model => "model",
    }
}

/// Run one test case end to end: query the SUT, score, build the record.
pub async fn run_single_case(
    client: &SutClient,
    judge: Option<&dyn JudgeClient>,
    judge_model: Option<&str>,
    mode: JudgeMode,
    case: &TestCase,
    verbose: bool,
    quiet: bool,
) -> CaseRecord {
    if verbose {
        println!("\n{}", "=".repeat(72));
        println!(
            "[{}]  D{} ({})  /  Q{} ({})",
            style(case.id).bold(),
            case.dimension,
            case.dimension_name(),
            case.question_type,
            case.question_type_name()
        );
        println!("Prompt: {}", case.prompt);
        println!("{}", "=".repeat(72));
    }

    let sut = client.query(case.prompt, REQUEST_TIMEOUT).await;

    if verbose {
        print_sut_outcome(&sut);
    }

    let scored = score_case(mode, judge, case, &sut).await;

    if verbose {
        if let Some(record) = &scored.scoring {
            print_scores(record);
        }
    } else if !quiet {
        let ch = match sut.status {
            QueryStatus::Success => ".",
            QueryStatus::Timeout => "T",
            QueryStatus::Error => "E",
        };
        print!("{}", ch);
        let _ = std::io::stdout().flush();
    }

    CaseRecord {
        timestamp: chrono::Utc::now().to_rfc3339(),
        test_case: case.into(),
        sut: SutInfo {
            answer: sut.answer.clone(),
            elapsed: (sut.elapsed_secs * 100.0).round() / 100.0,
            status: sut.status,
            tool_calls: sut.tool_calls,
        },
        judge: JudgeInfo {
            mode: mode_name(mode).to_string(),
            model: if mode == JudgeMode::Model {
                judge_model.map(|m| m.to_string())
            } else {
                None
            },
            raw_json: if mode == JudgeMode::Model {
                scored.judge_raw
            } else {
                None
            },
        },
        scoring: scored.scoring,
        violations: scored.violations,
    }
}

fn print_sut_outcome(sut: &QueryOutcome) {
    let icon = match sut.status {
        QueryStatus::Success => "+",
        QueryStatus::Error => "!",
        QueryStatus::Timeout => "T",
    };
    println!("[{}] {:?}  ({:.1}s)", icon, sut.status, sut.elapsed_secs);
    if !sut.answer.is_empty() {
        let preview: String = sut.answer.chars().take(800).collect();
        let suffix = if sut.answer.chars().count() > 800 {
            "\n... (truncated)"
        } else {
            ""
        };
        println!("\n--- answer ---\n{}{}\n--- end ---", preview, suffix);
    }
    if let Some(error) = &sut.error {
        println!("{} {}", style("error:").red(), error);
    }
}

fn print_scores(record: &ScoreRecord) {
    let parts: Vec<String> = DIM_KEYS
        .iter()
        .map(|k| format!("{}={}", k, record.score(k).unwrap_or(0)))
        .collect();
    println!("\nScores: {}", parts.join(" "));
    for key in DIM_KEYS {
        if let Some(anchor) = record.rubric_anchors.get(key) {
            println!("  {}: {}", key, anchor);
        }
        for reason in record.reasons.get(key).map(|r| r.as_slice()).unwrap_or(&[]) {
            println!("       - {}", reason);
        }
    }
}

/// Execute the whole evaluation run described by the CLI arguments.
pub async fn run(cli: Cli) -> Result<()> {
    if !cli.has_selection() {
        bail!("specify at least one of --all, --dimension, or --question-type");
    }

    let cases = filter_cases(cli.dimension, cli.question_type, cli.limit);
    if cases.is_empty() {
        bail!("no test cases match the given filters");
    }

    let client = SutClient::new(&cli.server);
    client
        .check_reachable()
        .await
        .context("start the server first: saged")?;

    // Judge client only in model mode; heuristic and none need no API key.
    let judge_client: Option<HttpJudgeClient> = if cli.judge == JudgeMode::Model {
        let config = SageConfig::load();
        let api_key = config.api_key().with_context(|| {
            format!(
                "--judge model requires an API key (export {})",
                config.model.api_key_env
            )
        })?;
        Some(HttpJudgeClient::new(
            &config.model,
            &config.judge,
            api_key,
            cli.judge_model.clone(),
        ))
    } else {
        None
    };
    let judge_model = judge_client.as_ref().map(|j| j.model().to_string());

    if !cli.quiet {
        let mut label_parts: Vec<String> = Vec::new();
        if cli.all {
            label_parts.push("all".to_string());
        }
        if let Some(d) = cli.dimension {
            label_parts.push(format!("D{}", d));
        }
        if let Some(q) = cli.question_type {
            label_parts.push(format!("Q{}", q));
        }
        if let Some(n) = cli.limit {
            label_parts.push(format!("limit={}", n));
        }
        let judge_label = match &judge_model {
            Some(model) => format!("{}  ({})", mode_name(cli.judge), model),
            None => mode_name(cli.judge).to_string(),
        };
        println!("{}", style("Sage Evaluation Runner").bold());
        println!("  Server : {}", cli.server);
        println!("  Tests  : {}  ({})", cases.len(), label_parts.join(", "));
        println!("  Judge  : {}", judge_label);
        println!();
    }

    if !cli.verbose && !cli.quiet {
        print!("Progress: ");
        let _ = std::io::stdout().flush();
    }

    let mut writer = match &cli.out {
        Some(path) => Some(JsonlWriter::create(path)?),
        None => None,
    };

    let mut records = Vec::with_capacity(cases.len());
    for case in cases {
        let record = run_single_case(
            &client,
            judge_client.as_ref().map(|j| j as &dyn JudgeClient),
            judge_model.as_deref(),
            cli.judge,
            case,
            cli.verbose,
            cli.quiet,
        )
        .await;

        if let Some(writer) = writer.as_mut() {
            writer.append(&record)?;
        }
        records.push(record);
    }

    if !cli.verbose && !cli.quiet {
        println!();
    }

    if cli.quiet {
        report::print_quiet_summary(&records);
    } else {
        report::print_summary(&records);
        if let Some(writer) = &writer {
            if let Some(path) = &cli.out {
                println!(
                    "\nJSONL output written to {}  ({} records)",
                    path.display(),
                    writer.written()
                );
            }
        }
        println!("\nDone.");
    }

    Ok(())
}
