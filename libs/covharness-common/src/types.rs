use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ErrorKind;

/// Dataset family a problem folder belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Suite {
    HumanEval,
    Apps,
}

impl fmt::Display for Suite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Suite::HumanEval => write!(f, "HumanEval"),
            Suite::Apps => write!(f, "APPS"),
        }
    }
}

/// Which oracle files of a problem folder drive the evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TestSource {
    Original,
    Llm,
}

impl TestSource {
    /// Column label used by the text report
    pub fn label(&self) -> &'static str {
        match self {
            TestSource::Original => "Original",
            TestSource::Llm => "LLM Tests",
        }
    }
}

impl fmt::Display for TestSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestSource::Original => write!(f, "original"),
            TestSource::Llm => write!(f, "llm"),
        }
    }
}

/// One literal call for the function convention: `entry_point(*args) == expected`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArgCase {
    pub args: Vec<Value>,
    pub expected: Value,
}

/// One literal stdin/stdout pair for the program convention
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IoCase {
    pub input: String,
    pub expected_output: String,
}

/// The problem-supplied checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TestOracle {
    /// Oracle module exposing `check(candidate)`; runs once per candidate
    Callable { source: String },
    /// Literal argument/expected pairs, one run per pair
    ArgCases(Vec<ArgCase>),
    /// Literal input/output pairs, one run per pair
    IoPairs(Vec<IoCase>),
}

impl TestOracle {
    /// Number of isolated runs this oracle needs
    pub fn case_count(&self) -> usize {
        match self {
            TestOracle::Callable { .. } => 1,
            TestOracle::ArgCases(cases) => cases.len(),
            TestOracle::IoPairs(cases) => cases.len(),
        }
    }

    /// Best-effort count of the assertions inside a callable oracle.
    ///
    /// Counts `assert ` occurrences in the oracle source; literal oracles
    /// return `None` because every case is already its own run.
    pub fn assertion_count(&self) -> Option<usize> {
        match self {
            TestOracle::Callable { source } => Some(source.matches("assert ").count()),
            _ => None,
        }
    }
}

/// A loaded problem folder. Never mutated after loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Problem {
    pub id: String,
    pub suite: Suite,
    pub prompt: String,
    pub entry_point: Option<String>,
    pub oracle: TestOracle,
    pub difficulty: Option<String>,
    pub task_id: Option<String>,
}

/// Where a candidate response came from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub model: String,
    pub provider: String,
}

impl Default for Provenance {
    fn default() -> Self {
        Self {
            model: "unknown".to_string(),
            provider: "unknown".to_string(),
        }
    }
}

/// Raw text produced by a model for one problem
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateResponse {
    /// Response file stem, e.g. `llm_response1`
    pub label: String,
    pub text: String,
    pub provenance: Provenance,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OutcomeStatus {
    Passed,
    /// Wrong output or a failed assertion
    Failed,
    /// Uncaught error raised by the candidate
    RuntimeError,
    Timeout,
    /// Killed by a signal or the sandbox (segfault, OOM)
    Crashed,
    /// Entry point or oracle callable absent from the loaded modules
    MissingSymbol,
}

/// Result of one isolated run (one test case, or one oracle invocation)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionOutcome {
    pub case_index: usize,
    pub status: OutcomeStatus,
    pub exit_code: Option<i64>,
    pub stdout: String,
    pub stderr: String,
    pub execution_time_ms: u64,
    pub timed_out: bool,
}

impl ExecutionOutcome {
    pub fn passed(&self) -> bool {
        self.status == OutcomeStatus::Passed
    }

    /// Runs that may have been cut off before instrumentation was flushed
    pub fn preempts_instrumentation(&self) -> bool {
        matches!(self.status, OutcomeStatus::Timeout | OutcomeStatus::Crashed)
    }
}

/// Structural coverage counters for the candidate's source file in one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoverageSample {
    pub num_statements: u64,
    pub covered_lines: u64,
    pub missing_lines: u64,
    pub num_branches: u64,
    pub covered_branches: u64,
    /// The backend's own combined percentage, kept for reference only
    pub reported_percent: f64,
}

impl CoverageSample {
    pub fn has_branches(&self) -> bool {
        self.num_branches > 0
    }
}

/// Branch coverage, or `Full` when the source declares no branches.
///
/// Serialized as a plain number, or the string `"N/A"` for `Full`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BranchCoverage {
    Percent(f64),
    Full,
}

impl BranchCoverage {
    /// `Full` counts as 100 everywhere a number is needed
    pub fn as_percent(&self) -> f64 {
        match self {
            BranchCoverage::Percent(p) => *p,
            BranchCoverage::Full => 100.0,
        }
    }

    pub fn is_full(&self) -> bool {
        self.as_percent() >= 100.0
    }

    /// Numeric value when branches exist, for averaging
    pub fn measured(&self) -> Option<f64> {
        match self {
            BranchCoverage::Percent(p) => Some(*p),
            BranchCoverage::Full => None,
        }
    }
}

impl fmt::Display for BranchCoverage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BranchCoverage::Percent(p) => write!(f, "{:.1}", p),
            BranchCoverage::Full => write!(f, "N/A"),
        }
    }
}

impl Serialize for BranchCoverage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            BranchCoverage::Percent(p) => serializer.serialize_f64(*p),
            BranchCoverage::Full => serializer.serialize_str("N/A"),
        }
    }
}

impl<'de> Deserialize<'de> for BranchCoverage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(f64),
            Text(String),
        }

        match Raw::deserialize(deserializer)? {
            Raw::Number(p) => Ok(BranchCoverage::Percent(p)),
            Raw::Text(s) if s == "N/A" || s.eq_ignore_ascii_case("full") => Ok(BranchCoverage::Full),
            Raw::Text(s) => Err(serde::de::Error::custom(format!(
                "invalid branch coverage value: {}",
                s
            ))),
        }
    }
}

/// Closed set of coverage verdicts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    FailedIncomplete,
    PerfectCoverage,
    HighLineLowBranch,
    Excellent,
    GoodLineLowBranch,
    Good,
    Moderate,
    Low,
}

impl Verdict {
    pub const ALL: [Verdict; 8] = [
        Verdict::FailedIncomplete,
        Verdict::PerfectCoverage,
        Verdict::HighLineLowBranch,
        Verdict::Excellent,
        Verdict::GoodLineLowBranch,
        Verdict::Good,
        Verdict::Moderate,
        Verdict::Low,
    ];

    /// Stable machine label, same as the serialized form
    pub fn label(&self) -> &'static str {
        match self {
            Verdict::FailedIncomplete => "failed_incomplete",
            Verdict::PerfectCoverage => "perfect_coverage",
            Verdict::HighLineLowBranch => "high_line_low_branch",
            Verdict::Excellent => "excellent",
            Verdict::GoodLineLowBranch => "good_line_low_branch",
            Verdict::Good => "good",
            Verdict::Moderate => "moderate",
            Verdict::Low => "low",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Verdict::FailedIncomplete => "Tests failed - coverage may be incomplete",
            Verdict::PerfectCoverage => "Perfect coverage - all code paths tested",
            Verdict::HighLineLowBranch => {
                "High line coverage but low branch coverage - missing edge cases"
            }
            Verdict::Excellent => "Excellent coverage",
            Verdict::GoodLineLowBranch => {
                "Good line coverage but poor branch coverage - untested conditionals"
            }
            Verdict::Good => "Good coverage with room for improvement",
            Verdict::Moderate => "Moderate coverage - significant untested code paths",
            Verdict::Low => "Low coverage - many code paths untested",
        }
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Passed/total counts, persisted as the ratio string `"passed/total"`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TestTally {
    pub passed: usize,
    pub total: usize,
}

impl TestTally {
    pub fn new(passed: usize, total: usize) -> Self {
        Self { passed, total }
    }
}

impl fmt::Display for TestTally {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.passed, self.total)
    }
}

impl FromStr for TestTally {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (passed, total) = s
            .split_once('/')
            .ok_or_else(|| format!("expected 'passed/total', got '{}'", s))?;
        let passed = passed
            .trim()
            .parse()
            .map_err(|_| format!("invalid passed count in '{}'", s))?;
        let total = total
            .trim()
            .parse()
            .map_err(|_| format!("invalid total count in '{}'", s))?;
        Ok(Self { passed, total })
    }
}

impl Serialize for TestTally {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for TestTally {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// One (problem, candidate, test source) evaluation, as handed to reporting
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRecord {
    pub run_id: Uuid,
    pub problem_id: String,
    pub suite: Suite,
    pub test_source: TestSource,
    pub candidate: String,
    pub provenance: Provenance,
    pub tests_passed: TestTally,
    pub all_passed: bool,
    pub line_coverage: Option<f64>,
    pub branch_coverage: Option<BranchCoverage>,
    pub verdict: Verdict,
    pub coverage: Option<CoverageSample>,
    pub outcomes: Vec<ExecutionOutcome>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub oracle_assertions: Option<usize>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationRecord {
    /// Display name used by the report, e.g. `problem_003_llm`
    pub fn display_name(&self) -> String {
        match self.test_source {
            TestSource::Original => self.problem_id.clone(),
            TestSource::Llm => format!("{}_llm", self.problem_id),
        }
    }

    /// Report type column, e.g. `APPS (LLM Tests)`
    pub fn type_label(&self) -> String {
        format!("{} ({})", self.suite, self.test_source.label())
    }
}

/// Round a percentage to one decimal place for persistence
pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}
