//! Harness error taxonomy.
//!
//! [`HarnessError`] carries the details of a failure; [`ErrorKind`] is its
//! fieldless mirror that gets persisted on an evaluation record.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum HarnessError {
    /// The normalizer produced nothing executable
    #[error("candidate source is empty after normalization")]
    EmptySource,

    /// Program-convention wrapping needs a function and none was defined
    #[error("no function definition found to wrap as a program")]
    NoEntryPointFound,

    /// The entry point or the oracle's `check` is absent
    #[error("missing oracle symbol: {0}")]
    MissingOracleSymbol(String),

    #[error("execution timed out after {0}ms")]
    Timeout(u64),

    /// Non-zero exit not attributable to an assertion (signal, OOM kill)
    #[error("subprocess crashed: {0}")]
    SubprocessCrash(String),

    /// Coverage data was never produced, or a run preempted it
    #[error("coverage instrumentation absent: {0}")]
    InstrumentationAbsent(String),

    #[error("malformed problem fixture {}: {reason}", .path.display())]
    MalformedProblemFixture { path: PathBuf, reason: String },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarnessError {
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        HarnessError::MalformedProblemFixture {
            path: path.into(),
            reason: reason.into(),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            HarnessError::EmptySource => ErrorKind::EmptySource,
            HarnessError::NoEntryPointFound => ErrorKind::NoEntryPointFound,
            HarnessError::MissingOracleSymbol(_) => ErrorKind::MissingOracleSymbol,
            HarnessError::Timeout(_) => ErrorKind::Timeout,
            HarnessError::SubprocessCrash(_) => ErrorKind::SubprocessCrash,
            HarnessError::InstrumentationAbsent(_) => ErrorKind::InstrumentationAbsent,
            HarnessError::MalformedProblemFixture { .. } => ErrorKind::MalformedProblemFixture,
            HarnessError::Io(_) => ErrorKind::Io,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    EmptySource,
    NoEntryPointFound,
    MissingOracleSymbol,
    Timeout,
    SubprocessCrash,
    InstrumentationAbsent,
    MalformedProblemFixture,
    Io,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::EmptySource => "EmptySource",
            ErrorKind::NoEntryPointFound => "NoEntryPointFound",
            ErrorKind::MissingOracleSymbol => "MissingOracleSymbol",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::SubprocessCrash => "SubprocessCrash",
            ErrorKind::InstrumentationAbsent => "InstrumentationAbsent",
            ErrorKind::MalformedProblemFixture => "MalformedProblemFixture",
            ErrorKind::Io => "Io",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_mirrors_variant() {
        assert_eq!(HarnessError::EmptySource.kind(), ErrorKind::EmptySource);
        assert_eq!(HarnessError::Timeout(30_000).kind(), ErrorKind::Timeout);
        let err = HarnessError::malformed("apps_problems/problem_001", "inputs/outputs length mismatch");
        assert_eq!(err.kind(), ErrorKind::MalformedProblemFixture);
        assert!(err.to_string().contains("problem_001"));
    }

    #[test]
    fn test_kind_serializes_snake_case() {
        let json = serde_json::to_string(&ErrorKind::InstrumentationAbsent).unwrap();
        assert_eq!(json, "\"instrumentation_absent\"");
    }
}
