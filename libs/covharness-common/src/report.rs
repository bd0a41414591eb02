//! Coverage report rendering.
//!
//! Consumes [`EvaluationRecord`]s (in memory, or from the JSONL sink) and
//! renders the fixed-width text report: a detail row per record, summary
//! statistics per suite and test source, and the verdict distribution.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

use crate::error::HarnessError;
use crate::types::{EvaluationRecord, Verdict};

const RULE_WIDTH: usize = 120;

/// Aggregate statistics for one report group, e.g. `APPS (Original)`
#[derive(Debug, Clone, PartialEq)]
pub struct GroupSummary {
    pub label: String,
    pub records: usize,
    pub all_passed: usize,
    pub avg_line_coverage: f64,
    /// Averaged over records that have branches; `None` when none do
    pub avg_branch_coverage: Option<f64>,
    pub coverage_missing: usize,
}

/// Group records by suite and test source, in first-seen order
pub fn summarize(records: &[EvaluationRecord]) -> Vec<GroupSummary> {
    let mut order: Vec<String> = Vec::new();
    let mut groups: BTreeMap<String, Vec<&EvaluationRecord>> = BTreeMap::new();
    for record in records {
        let label = record.type_label();
        if !groups.contains_key(&label) {
            order.push(label.clone());
        }
        groups.entry(label).or_default().push(record);
    }

    order
        .into_iter()
        .map(|label| {
            let members = &groups[&label];
            let line_values: Vec<f64> = members.iter().map(|r| r.line_coverage.unwrap_or(0.0)).collect();
            let branch_values: Vec<f64> = members
                .iter()
                .filter_map(|r| r.branch_coverage.and_then(|b| b.measured()))
                .collect();

            GroupSummary {
                label,
                records: members.len(),
                all_passed: members.iter().filter(|r| r.all_passed).count(),
                avg_line_coverage: mean(&line_values).unwrap_or(0.0),
                avg_branch_coverage: mean(&branch_values),
                coverage_missing: members.iter().filter(|r| r.coverage.is_none()).count(),
            }
        })
        .collect()
}

/// Count of records per verdict, in verdict declaration order
pub fn verdict_distribution(records: &[EvaluationRecord]) -> Vec<(Verdict, usize)> {
    Verdict::ALL
        .iter()
        .map(|v| (*v, records.iter().filter(|r| r.verdict == *v).count()))
        .filter(|(_, count)| *count > 0)
        .collect()
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn detail_table(records: &[EvaluationRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{:<24} {:<24} {:<15} {:<10} {:<12} {}",
        "Problem", "Type", "Tests", "Line %", "Branch %", "Verdict"
    );
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));

    for record in records {
        let name = format!("{}/{}", record.display_name(), record.candidate);
        let line = record
            .line_coverage
            .map(|l| format!("{:.1}", l))
            .unwrap_or_else(|| "-".to_string());
        let branch = record
            .branch_coverage
            .map(|b| b.to_string())
            .unwrap_or_else(|| "N/A".to_string());
        let _ = writeln!(
            out,
            "{:<24} {:<24} {:<15} {:<10} {:<12} {}",
            name,
            record.type_label(),
            record.tests_passed.to_string(),
            line,
            branch,
            record.verdict.label()
        );
    }
    out
}

/// Table-only report, the format written to `coverage_report.txt`
pub fn render_table(records: &[EvaluationRecord]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "COVERAGE ANALYSIS REPORT");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    out.push('\n');
    out.push_str(&detail_table(records));
    out
}

/// Full report with detail rows, per-group statistics and verdicts
pub fn render(records: &[EvaluationRecord]) -> String {
    if records.is_empty() {
        return "No results to report\n".to_string();
    }

    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "COVERAGE ANALYSIS REPORT");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "\nDETAILED RESULTS:");
    let _ = writeln!(out, "{}", "-".repeat(RULE_WIDTH));
    out.push_str(&detail_table(records));

    let _ = writeln!(out, "\n{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(out, "SUMMARY STATISTICS");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));

    for group in summarize(records) {
        let _ = writeln!(out, "\n{} ({} evaluations):", group.label, group.records);
        let _ = writeln!(out, "  All Tests Passed: {}/{}", group.all_passed, group.records);
        let _ = writeln!(out, "  Average Line Coverage: {:.1}%", group.avg_line_coverage);
        match group.avg_branch_coverage {
            Some(avg) => {
                let _ = writeln!(out, "  Average Branch Coverage: {:.1}%", avg);
            }
            None => {
                let _ = writeln!(out, "  Average Branch Coverage: N/A");
            }
        }
        if group.coverage_missing > 0 {
            let _ = writeln!(out, "  Coverage Data Missing: {}", group.coverage_missing);
        }
    }

    let _ = writeln!(out, "\nVERDICTS:");
    for (verdict, count) in verdict_distribution(records) {
        let _ = writeln!(out, "  {:<22} {:>4}  {}", verdict.label(), count, verdict.description());
    }

    out
}

/// Write the table report to a file
pub fn write_report(records: &[EvaluationRecord], path: &Path) -> Result<(), HarnessError> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    fs::write(path, render_table(records))?;
    Ok(())
}

/// Read records back from a JSONL sink, skipping blank lines
pub fn load_records(path: &Path) -> Result<Vec<EvaluationRecord>, HarnessError> {
    let content = fs::read_to_string(path)?;
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| {
            serde_json::from_str(line).map_err(|e| {
                HarnessError::malformed(path, format!("line {}: {}", idx + 1, e))
            })
        })
        .collect()
}
