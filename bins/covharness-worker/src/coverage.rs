/// Coverage Aggregator - Instrumentation Report → Percentages
///
/// Reads the JSON report written by `coverage json`, keeps only the entry for
/// the candidate's source file and turns its summary counters into line and
/// branch percentages. Cross-run averages belong to the report layer.

use covharness_common::types::{round1, BranchCoverage, CoverageSample, ExecutionOutcome};
use covharness_common::HarnessError;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;

#[derive(Debug, Deserialize)]
struct CoverageReport {
    files: HashMap<String, FileEntry>,
}

#[derive(Debug, Deserialize)]
struct FileEntry {
    summary: FileSummary,
}

#[derive(Debug, Deserialize)]
struct FileSummary {
    num_statements: u64,
    covered_lines: u64,
    missing_lines: u64,
    #[serde(default)]
    percent_covered: f64,
    #[serde(default)]
    num_branches: u64,
    #[serde(default)]
    covered_branches: u64,
}

fn matches_source(key: &str, source_file: &str) -> bool {
    key == source_file || Path::new(key).file_name().and_then(|n| n.to_str()) == Some(source_file)
}

/// Extract the sample for `source_file` from a coverage JSON report.
///
/// Entries for every other file are ignored.
pub fn parse_report(json: &str, source_file: &str) -> Result<CoverageSample, HarnessError> {
    let report: CoverageReport = serde_json::from_str(json).map_err(|e| {
        HarnessError::InstrumentationAbsent(format!("malformed coverage report: {}", e))
    })?;

    let entry = report
        .files
        .iter()
        .find(|(key, _)| matches_source(key, source_file))
        .map(|(_, entry)| entry)
        .ok_or_else(|| {
            HarnessError::InstrumentationAbsent(format!("no coverage entry for {}", source_file))
        })?;

    let s = &entry.summary;
    Ok(CoverageSample {
        num_statements: s.num_statements,
        covered_lines: s.covered_lines,
        missing_lines: s.missing_lines,
        num_branches: s.num_branches,
        covered_branches: s.covered_branches,
        reported_percent: s.percent_covered,
    })
}

fn percent(covered: u64, total: u64) -> f64 {
    let pct = covered as f64 / total as f64 * 100.0;
    pct.clamp(0.0, 100.0)
}

/// Unrounded line percentage; the classifier decides on this value
pub fn line_coverage_exact(sample: &CoverageSample) -> f64 {
    if sample.num_statements == 0 {
        0.0
    } else {
        percent(sample.covered_lines, sample.num_statements)
    }
}

/// Unrounded branch coverage, or `Full` when there are no branches
pub fn branch_coverage_exact(sample: &CoverageSample) -> BranchCoverage {
    if sample.num_branches == 0 {
        BranchCoverage::Full
    } else {
        BranchCoverage::Percent(percent(sample.covered_branches, sample.num_branches))
    }
}

/// Line percentage as persisted on a record, rounded to one decimal
pub fn line_coverage_pct(sample: &CoverageSample) -> f64 {
    round1(line_coverage_exact(sample))
}

/// Branch coverage as persisted on a record, rounded to one decimal
pub fn branch_coverage(sample: &CoverageSample) -> BranchCoverage {
    match branch_coverage_exact(sample) {
        BranchCoverage::Percent(p) => BranchCoverage::Percent(round1(p)),
        BranchCoverage::Full => BranchCoverage::Full,
    }
}

/// Combine the runs of one evaluation into a single coverage sample.
///
/// The sample is absent when nothing ran, when any run timed out or crashed
/// (its data may never have been flushed), or when no report was produced.
pub fn aggregate(
    outcomes: &[ExecutionOutcome],
    report_json: Option<&str>,
    source_file: &str,
) -> Result<CoverageSample, HarnessError> {
    if outcomes.is_empty() {
        return Err(HarnessError::InstrumentationAbsent("no test cases were executed".to_string()));
    }
    if let Some(cut) = outcomes.iter().find(|o| o.preempts_instrumentation()) {
        return Err(HarnessError::InstrumentationAbsent(format!(
            "case {} ended with {:?}",
            cut.case_index, cut.status
        )));
    }

    let json = report_json.ok_or_else(|| {
        HarnessError::InstrumentationAbsent("coverage report was not produced".to_string())
    })?;
    parse_report(json, source_file)
}
