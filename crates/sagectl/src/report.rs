//! Summary reporting for evaluation runs.

use crate::client::QueryStatus;
use crate::runner::CaseRecord;
use console::style;
use sage_common::{dimension_name, question_type_name, DIM_KEYS};
use std::collections::BTreeMap;

fn divider() -> String {
    "=".repeat(72)
}

/// Mean of a non-empty slice.
fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

fn percentile(sorted: &[f64], fraction: f64) -> f64 {
    let index = ((sorted.len() as f64 * fraction) as usize).min(sorted.len() - 1);
    sorted[index]
}

/// Print the full human-readable summary for a finished run.
pub fn print_summary(records: &[CaseRecord]) {
    if records.is_empty() {
        println!("\nNo results to summarize.");
        return;
    }

    let n = records.len();
    let success = records
        .iter()
        .filter(|r| r.sut.status == QueryStatus::Success)
        .count();
    let errors = records
        .iter()
        .filter(|r| r.sut.status == QueryStatus::Error)
        .count();
    let timeouts = records
        .iter()
        .filter(|r| r.sut.status == QueryStatus::Timeout)
        .count();

    println!("\n{}", divider());
    println!("{}", style("SUMMARY").bold());
    println!("{}", divider());
    println!("Tests run:    {}", n);
    println!(
        "SUT success:  {}    errors: {}    timeouts: {}",
        success, errors, timeouts
    );

    let success_times: Vec<f64> = records
        .iter()
        .filter(|r| r.sut.status == QueryStatus::Success)
        .map(|r| r.sut.elapsed)
        .collect();
    if !success_times.is_empty() {
        println!("Mean latency: {:.1}s", mean(&success_times));
    }

    let scored: Vec<&CaseRecord> = records.iter().filter(|r| r.scoring.is_some()).collect();
    if scored.is_empty() {
        println!("\n(No scoring data. Run with --judge heuristic or --judge model.)");
        return;
    }

    // --- mean per dimension ---
    println!("\n{}", divider());
    println!("MEAN SCORE PER DIMENSION");
    println!("{}", divider());
    println!("  {:<5} {:<48} {:>5}  {:>3}", "Dim", "Name", "Mean", "N");
    println!("  {}", "-".repeat(62));
    for (i, key) in DIM_KEYS.iter().enumerate() {
        let values: Vec<f64> = scored
            .iter()
            .filter_map(|r| r.scoring.as_ref().and_then(|s| s.score(key)))
            .map(|v| v as f64)
            .collect();
        if values.is_empty() {
            continue;
        }
        println!(
            "  {:<5} {:<48} {:>5.2}  {:>3}",
            key,
            dimension_name((i + 1) as u8),
            mean(&values),
            values.len()
        );
    }

    // --- mean per question type ---
    println!("\n{}", divider());
    println!("MEAN SCORE PER QUESTION TYPE");
    println!("{}", divider());
    println!("  {:<5} {:<48} {:>5}  {:>3}", "QT", "Name", "Mean", "N");
    println!("  {}", "-".repeat(62));
    let mut qt_groups: BTreeMap<u8, Vec<f64>> = BTreeMap::new();
    for record in &scored {
        if let Some(scoring) = &record.scoring {
            qt_groups
                .entry(record.test_case.question_type)
                .or_default()
                .push(scoring.mean());
        }
    }
    for (qt, values) in &qt_groups {
        println!(
            "  Q{:<4} {:<48} {:>5.2}  {:>3}",
            qt,
            question_type_name(*qt),
            mean(values),
            values.len()
        );
    }

    // --- pass rate ---
    let pass_count = scored
        .iter()
        .filter(|r| r.scoring.as_ref().map(|s| s.passed()).unwrap_or(false))
        .count();
    let rate = pass_count as f64 / scored.len() as f64 * 100.0;
    println!("\n{}", divider());
    println!(
        "{}",
        style(format!(
            "PASS RATE: {}/{} ({:.1}%)",
            pass_count,
            scored.len(),
            rate
        ))
        .bold()
    );
    println!("  (pass = all 7 dimensions scored >= 4)");
    println!("{}", divider());

    // --- response time distribution ---
    let mut all_times: Vec<f64> = records.iter().map(|r| r.sut.elapsed).collect();
    all_times.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    if !all_times.is_empty() {
        let total: f64 = all_times.iter().sum();
        let median = if all_times.len() % 2 == 1 {
            all_times[all_times.len() / 2]
        } else {
            (all_times[all_times.len() / 2 - 1] + all_times[all_times.len() / 2]) / 2.0
        };
        println!("\n{}", divider());
        println!("RESPONSE TIME DISTRIBUTION");
        println!("{}", divider());
        println!("  Total:   {:.1}s", total);
        println!("  Mean:    {:.1}s", mean(&all_times));
        println!("  Median:  {:.1}s", median);
        println!("  Min:     {:.1}s", all_times[0]);
        println!("  Max:     {:.1}s", all_times[all_times.len() - 1]);
        println!("  P90:     {:.1}s", percentile(&all_times, 0.90));
        println!("  P95:     {:.1}s", percentile(&all_times, 0.95));

        let buckets: [(&str, f64, f64); 6] = [
            ("< 2s", 0.0, 2.0),
            ("2-5s", 2.0, 5.0),
            ("5-10s", 5.0, 10.0),
            ("10-20s", 10.0, 20.0),
            ("20-30s", 20.0, 30.0),
            (">= 30s", 30.0, f64::INFINITY),
        ];
        println!("\n  {:<10} {:>5}  Bar", "Bucket", "Count");
        println!("  {}", "-".repeat(40));
        for (label, lo, hi) in buckets {
            let count = all_times.iter().filter(|t| **t >= lo && **t < hi).count();
            if count > 0 {
                println!("  {:<10} {:>5}  {}", label, count, "#".repeat(count.min(50)));
            }
        }
    }

    // --- top failure reasons ---
    let mut reason_freq: BTreeMap<String, usize> = BTreeMap::new();
    for record in &scored {
        if let Some(scoring) = &record.scoring {
            for key in DIM_KEYS {
                if scoring.score(key).unwrap_or(5) <= 2 {
                    for reason in scoring.reasons.get(key).map(|r| r.as_slice()).unwrap_or(&[]) {
                        *reason_freq.entry(reason.clone()).or_default() += 1;
                    }
                }
            }
        }
    }
    if !reason_freq.is_empty() {
        let mut ranked: Vec<(&String, &usize)> = reason_freq.iter().collect();
        ranked.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
        println!("\n{}", divider());
        println!("TOP FAILURE REASONS (dimensions scored <= 2)");
        println!("{}", divider());
        for (reason, count) in ranked.into_iter().take(10) {
            println!("  [{:>3}x] {}", count, reason);
        }
    }

    // --- violations ---
    let all_violations: Vec<&String> = records.iter().flat_map(|r| &r.violations).collect();
    if !all_violations.is_empty() {
        println!("\n{}", divider());
        println!("VIOLATIONS ({})", all_violations.len());
        println!("{}", divider());
        for violation in all_violations.iter().take(20) {
            println!("  - {}", violation);
        }
    }
}

/// Minimal quiet output: the pass rate, or the bare run count.
pub fn print_quiet_summary(records: &[CaseRecord]) {
    let scored: Vec<&CaseRecord> = records.iter().filter(|r| r.scoring.is_some()).collect();
    if scored.is_empty() {
        println!("Ran {} tests (no scoring)", records.len());
        return;
    }
    let pass_count = scored
        .iter()
        .filter(|r| r.scoring.as_ref().map(|s| s.passed()).unwrap_or(false))
        .count();
    let rate = pass_count as f64 / scored.len() as f64 * 100.0;
    println!("Pass: {}/{} ({:.1}%)", pass_count, scored.len(), rate);
}
