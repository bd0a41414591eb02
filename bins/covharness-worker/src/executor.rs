/// Candidate Executor - High-Level Orchestration
///
/// **Responsibility:**
/// Take one (problem, candidate, test source) job through the whole pipeline
/// and produce its evaluation record.
///
/// **Pipeline:**
/// 1. Normalize the raw response (normalize.rs)
/// 2. Assemble the runnable unit and its drivers (assembler.rs)
/// 3. Run every case sequentially in a fresh interpreter (engine.rs)
/// 4. Judge outcomes and count passes (evaluator.rs)
/// 5. Collect and aggregate coverage (coverage.rs)
/// 6. Classify (classifier.rs)
///
/// This module is the glue layer. Failures of the candidate never escape it:
/// every job ends in a record.

use crate::assembler::{self, SOLUTION_FILE};
use crate::classifier::classify_sample;
use crate::coverage::{self, branch_coverage, line_coverage_pct};
use crate::engine::{self, ExecutionEngine};
use crate::evaluator::{self, evaluate_case};
use chrono::Utc;
use covharness_common::normalize::normalize_response;
use covharness_common::types::{
    CandidateResponse, CoverageSample, EvaluationRecord, ExecutionOutcome, OutcomeStatus,
    Problem, TestSource, Verdict,
};
use covharness_common::{ErrorKind, HarnessError};
use futures_util::FutureExt;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// One unit of batch work. Jobs share the problem but no mutable state.
#[derive(Debug, Clone)]
pub struct EvaluationJob {
    pub run_id: Uuid,
    pub problem: Arc<Problem>,
    pub candidate: CandidateResponse,
    pub test_source: TestSource,
}

impl EvaluationJob {
    pub fn new(problem: Arc<Problem>, candidate: CandidateResponse, test_source: TestSource) -> Self {
        Self {
            run_id: Uuid::new_v4(),
            problem,
            candidate,
            test_source,
        }
    }
}

/// Evaluate one candidate against one oracle and build its record
#[tracing::instrument(
    skip_all,
    fields(problem_id = %job.problem.id, candidate = %job.candidate.label, source = %job.test_source)
)]
pub async fn evaluate_candidate(
    job: &EvaluationJob,
    engine: &ExecutionEngine,
    timeout_ms: u64,
) -> EvaluationRecord {
    let normalized = match normalize_response(&job.candidate.text) {
        Ok(code) => code,
        Err(e) => return failed_record(job, Vec::new(), e.kind(), e.to_string()),
    };

    let unit = match assembler::assemble(&job.problem, &normalized) {
        Ok(unit) => unit,
        Err(e) => return failed_record(job, Vec::new(), e.kind(), e.to_string()),
    };
    debug!(convention = ?unit.convention, cases = unit.drivers.len(), "Assembled candidate");

    let work_dir = match TempDir::new() {
        Ok(dir) => dir,
        Err(e) => {
            let e = HarnessError::from(e);
            return failed_record(job, Vec::new(), e.kind(), e.to_string());
        }
    };

    if let Err(e) = engine::write_unit(work_dir.path(), &unit).await {
        return failed_record(job, Vec::new(), ErrorKind::Io, format!("{:#}", e));
    }

    // Cases run strictly one after another; each gets its own process
    let mut outcomes = Vec::with_capacity(unit.drivers.len());
    for driver in &unit.drivers {
        let outcome = match engine.run_case(work_dir.path(), driver, timeout_ms).await {
            Ok(raw) => evaluate_case(driver.case_index, &raw, &driver.expectation),
            Err(e) => {
                warn!(case_index = driver.case_index, error = %e, "Engine failed to run case");
                ExecutionOutcome {
                    case_index: driver.case_index,
                    status: OutcomeStatus::RuntimeError,
                    exit_code: None,
                    stdout: String::new(),
                    stderr: format!("Engine error: {:#}", e),
                    execution_time_ms: 0,
                    timed_out: false,
                }
            }
        };

        debug!(
            case_index = outcome.case_index,
            status = ?outcome.status,
            execution_ms = outcome.execution_time_ms,
            "Case finished"
        );
        outcomes.push(outcome);
    }

    let (tests_passed, all_passed) = evaluator::tally(&job.problem.oracle, &outcomes);

    // Skip the report entirely when a run may have lost its data
    let report_json = if outcomes.iter().any(|o| o.preempts_instrumentation()) {
        None
    } else {
        match engine.collect_coverage(work_dir.path(), timeout_ms).await {
            Ok(json) => json,
            Err(e) => {
                warn!(error = %format!("{:#}", e), "Failed to collect coverage");
                None
            }
        }
    };

    let (sample, coverage_error) = match coverage::aggregate(&outcomes, report_json.as_deref(), SOLUTION_FILE) {
        Ok(sample) => (Some(sample), None),
        Err(e) => (None, Some(e)),
    };

    let verdict = classify_sample(all_passed, sample.as_ref());
    let (error, detail) = match first_failure(&outcomes, timeout_ms) {
        Some((case_index, e)) => (Some(e.kind()), Some(format!("case {}: {}", case_index, e))),
        None => match coverage_error {
            Some(e) => (Some(e.kind()), Some(e.to_string())),
            None => (None, None),
        },
    };

    let record = build_record(job, tests_passed, all_passed, sample, verdict, outcomes, error, detail);

    info!(
        tests = %record.tests_passed,
        line_coverage = ?record.line_coverage,
        branch_coverage = %record.branch_coverage.map(|b| b.to_string()).unwrap_or_else(|| "-".to_string()),
        verdict = %record.verdict,
        "Evaluation completed"
    );

    record
}

/// [`evaluate_candidate`] for a spawned task: a panic still yields a record
pub async fn evaluate_isolated(
    job: EvaluationJob,
    engine: Arc<ExecutionEngine>,
    timeout_ms: u64,
) -> EvaluationRecord {
    match AssertUnwindSafe(evaluate_candidate(&job, &engine, timeout_ms))
        .catch_unwind()
        .await
    {
        Ok(record) => record,
        Err(panic) => panicked_record(&job, panic),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn panicked_record(job: &EvaluationJob, panic: Box<dyn Any + Send>) -> EvaluationRecord {
    let detail = format!("evaluation panicked: {}", panic_message(panic.as_ref()));
    failed_record(job, Vec::new(), ErrorKind::Io, detail)
}

/// The error behind the first case that ended abnormally
fn first_failure(outcomes: &[ExecutionOutcome], timeout_ms: u64) -> Option<(usize, HarnessError)> {
    outcomes.iter().find_map(|o| {
        let last_line = o.stderr.trim().lines().last().unwrap_or("").to_string();
        let error = match o.status {
            OutcomeStatus::Timeout => HarnessError::Timeout(timeout_ms),
            OutcomeStatus::Crashed => HarnessError::SubprocessCrash(last_line),
            OutcomeStatus::MissingSymbol => HarnessError::MissingOracleSymbol(last_line),
            _ => return None,
        };
        Some((o.case_index, error))
    })
}

#[allow(clippy::too_many_arguments)]
fn build_record(
    job: &EvaluationJob,
    tests_passed: covharness_common::types::TestTally,
    all_passed: bool,
    sample: Option<CoverageSample>,
    verdict: Verdict,
    outcomes: Vec<ExecutionOutcome>,
    error: Option<ErrorKind>,
    detail: Option<String>,
) -> EvaluationRecord {
    EvaluationRecord {
        run_id: job.run_id,
        problem_id: job.problem.id.clone(),
        suite: job.problem.suite,
        test_source: job.test_source,
        candidate: job.candidate.label.clone(),
        provenance: job.candidate.provenance.clone(),
        tests_passed,
        all_passed,
        line_coverage: sample.as_ref().map(line_coverage_pct),
        branch_coverage: sample.as_ref().map(branch_coverage),
        verdict,
        coverage: sample,
        outcomes,
        error,
        detail,
        oracle_assertions: job.problem.oracle.assertion_count(),
        evaluated_at: Utc::now(),
    }
}

/// Record for a job that ended before or instead of measurement
fn failed_record(
    job: &EvaluationJob,
    outcomes: Vec<ExecutionOutcome>,
    kind: ErrorKind,
    detail: String,
) -> EvaluationRecord {
    warn!(error_kind = %kind, detail = %detail, "Evaluation failed before execution");
    let (tests_passed, _) = evaluator::tally(&job.problem.oracle, &outcomes);
    build_record(
        job,
        tests_passed,
        false,
        None,
        Verdict::FailedIncomplete,
        outcomes,
        Some(kind),
        Some(detail),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use covharness_common::config::RuntimeConfig;
    use covharness_common::types::{IoCase, Provenance, Suite, TestOracle};
    use crate::engine::ProcessEngine;

    fn job(text: &str, oracle: TestOracle, entry_point: Option<&str>) -> EvaluationJob {
        let problem = Problem {
            id: "problem_001".to_string(),
            suite: Suite::Apps,
            prompt: String::new(),
            entry_point: entry_point.map(str::to_string),
            oracle,
            difficulty: None,
            task_id: None,
        };
        EvaluationJob::new(
            Arc::new(problem),
            CandidateResponse {
                label: "llm_response1".to_string(),
                text: text.to_string(),
                provenance: Provenance::default(),
            },
            TestSource::Original,
        )
    }

    fn engine() -> ExecutionEngine {
        ExecutionEngine::Process(ProcessEngine::new(&RuntimeConfig::default()))
    }

    #[tokio::test]
    async fn test_empty_response_is_recorded_not_raised() {
        let oracle = TestOracle::IoPairs(vec![IoCase {
            input: "1\n".to_string(),
            expected_output: "1\n".to_string(),
        }]);
        let record = evaluate_candidate(&job("```python\n```", oracle, None), &engine(), 1000).await;

        assert_eq!(record.verdict, Verdict::FailedIncomplete);
        assert_eq!(record.error, Some(ErrorKind::EmptySource));
        assert_eq!(record.tests_passed.to_string(), "0/1");
        assert!(record.coverage.is_none());
        assert!(record.outcomes.is_empty());
    }

    #[tokio::test]
    async fn test_unwrappable_program_is_recorded() {
        let oracle = TestOracle::IoPairs(vec![IoCase {
            input: String::new(),
            expected_output: String::new(),
        }]);
        let record = evaluate_candidate(&job("import sys\n", oracle, None), &engine(), 1000).await;

        assert_eq!(record.error, Some(ErrorKind::NoEntryPointFound));
        assert!(!record.all_passed);
    }

    #[test]
    fn test_panic_becomes_failed_record() {
        let oracle = TestOracle::IoPairs(vec![IoCase {
            input: String::new(),
            expected_output: String::new(),
        }]);
        let job = job("print(1)", oracle, None);
        let panic = std::panic::catch_unwind(|| panic!("engine state poisoned")).unwrap_err();

        let record = panicked_record(&job, panic);
        assert_eq!(record.verdict, Verdict::FailedIncomplete);
        assert_eq!(record.error, Some(ErrorKind::Io));
        assert_eq!(record.detail.as_deref(), Some("evaluation panicked: engine state poisoned"));
        assert_eq!(record.tests_passed.to_string(), "0/1");
        assert_eq!(record.run_id, job.run_id);
    }

    #[tokio::test]
    async fn test_evaluate_isolated_passes_records_through() {
        let oracle = TestOracle::IoPairs(vec![IoCase {
            input: "1\n".to_string(),
            expected_output: "1\n".to_string(),
        }]);
        let record = evaluate_isolated(job("", oracle, None), Arc::new(engine()), 1000).await;
        assert_eq!(record.error, Some(ErrorKind::EmptySource));
    }

    #[test]
    fn test_first_failure_prefers_abnormal_endings() {
        let outcome = |idx, status, stderr: &str| ExecutionOutcome {
            case_index: idx,
            status,
            exit_code: None,
            stdout: String::new(),
            stderr: stderr.to_string(),
            execution_time_ms: 0,
            timed_out: status == OutcomeStatus::Timeout,
        };
        let outcomes = vec![
            outcome(0, OutcomeStatus::Failed, "AssertionError"),
            outcome(1, OutcomeStatus::Timeout, "\n[Execution timed out]"),
        ];
        let (case_index, error) = first_failure(&outcomes, 1000).unwrap();
        assert_eq!(case_index, 1);
        assert_eq!(error.kind(), ErrorKind::Timeout);
        assert_eq!(error.to_string(), "execution timed out after 1000ms");

        let missing = vec![outcome(
            0,
            OutcomeStatus::MissingSymbol,
            "[covharness] missing symbol: entry point add",
        )];
        let (_, error) = first_failure(&missing, 1000).unwrap();
        assert_eq!(error.kind(), ErrorKind::MissingOracleSymbol);
        assert!(error.to_string().ends_with("entry point add"));

        let crashed = vec![outcome(2, OutcomeStatus::Crashed, "Traceback\n[Process killed by signal]")];
        let (case_index, error) = first_failure(&crashed, 1000).unwrap();
        assert_eq!(case_index, 2);
        assert!(matches!(error, HarnessError::SubprocessCrash(ref line) if line == "[Process killed by signal]"));

        assert!(first_failure(&[outcome(0, OutcomeStatus::RuntimeError, "boom")], 1000).is_none());
    }
}
