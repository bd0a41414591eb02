/// Outcome Evaluator - Raw Runs → Judged Outcomes
///
/// **Core Responsibility:**
/// Decide what each raw run means and count how many cases passed.
///
/// **Critical Properties:**
/// - Knows nothing about processes or containers
/// - Knows nothing about coverage
/// - Pure function: (raw output, expectation) → outcome
///
/// **Status Rules (first match wins):**
/// 1. Timed out → Timeout
/// 2. Killed by a signal or the sandbox → Crashed
/// 3. Driver reported a missing entry point or `check` → MissingSymbol
/// 4. Non-zero exit → Failed for an `AssertionError`, RuntimeError otherwise
/// 5. Clean exit → Passed, or for stdout cases an output comparison
///
/// **Output Comparison:**
/// - Trailing whitespace is trimmed on both sides
/// - Leading whitespace and case are significant

use covharness_common::types::{
    ExecutionOutcome, OutcomeStatus, TestOracle, TestTally,
};

use crate::assembler::{
    Expectation, MISSING_CHECK_EXIT_CODE, MISSING_ENTRY_EXIT_CODE, MISSING_SYMBOL_MARKER,
};

/// Raw output of one isolated run.
/// Produced by the execution engine, consumed by the evaluator.
#[derive(Debug, Clone, Default)]
pub struct RawExecution {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i64>,
    pub crashed: bool,
    pub timed_out: bool,
    pub execution_time_ms: u64,
}

fn normalize_output(output: &str) -> &str {
    output.trim_end()
}

fn is_missing_symbol(raw: &RawExecution) -> bool {
    matches!(raw.exit_code, Some(code) if code == MISSING_ENTRY_EXIT_CODE || code == MISSING_CHECK_EXIT_CODE)
        && raw.stderr.contains(MISSING_SYMBOL_MARKER)
}

/// Judge one raw run against its expectation
pub fn evaluate_case(case_index: usize, raw: &RawExecution, expectation: &Expectation) -> ExecutionOutcome {
    let status = if raw.timed_out {
        OutcomeStatus::Timeout
    } else if raw.crashed {
        OutcomeStatus::Crashed
    } else if is_missing_symbol(raw) {
        OutcomeStatus::MissingSymbol
    } else {
        match raw.exit_code {
            Some(0) => match expectation {
                Expectation::CleanExit => OutcomeStatus::Passed,
                Expectation::Stdout(expected) => {
                    if normalize_output(&raw.stdout) == normalize_output(expected) {
                        OutcomeStatus::Passed
                    } else {
                        OutcomeStatus::Failed
                    }
                }
            },
            _ if raw.stderr.contains("AssertionError") => OutcomeStatus::Failed,
            _ => OutcomeStatus::RuntimeError,
        }
    };

    ExecutionOutcome {
        case_index,
        status,
        exit_code: raw.exit_code,
        stdout: raw.stdout.clone(),
        stderr: raw.stderr.clone(),
        execution_time_ms: raw.execution_time_ms,
        timed_out: raw.timed_out,
    }
}

/// Count passed cases and decide whether the evaluation passed overall.
///
/// Literal cases count one each. A callable oracle runs once, so its tally
/// is `n/n` or `0/n` where `n` is the oracle's assertion count (at least 1).
/// An evaluation with no cases never counts as passed.
pub fn tally(oracle: &TestOracle, outcomes: &[ExecutionOutcome]) -> (TestTally, bool) {
    let all_passed = !outcomes.is_empty() && outcomes.iter().all(|o| o.passed());

    match oracle {
        TestOracle::Callable { .. } => {
            let n = oracle.assertion_count().unwrap_or(0).max(1);
            let passed = if all_passed { n } else { 0 };
            (TestTally::new(passed, n), all_passed)
        }
        _ => {
            let total = oracle.case_count();
            let passed = outcomes.iter().filter(|o| o.passed()).count();
            (TestTally::new(passed, total), all_passed && passed == total)
        }
    }
}
