// Run settings shared by the worker and the CLI

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use crate::types::{Provenance, Suite, TestSource};

pub const DEFAULT_TIMEOUT_SECONDS: u64 = 30;
pub const DEFAULT_MAX_WORKERS: usize = 4;
pub const DEFAULT_RECORDS_PATH: &str = "evaluation_records.jsonl";
pub const DEFAULT_REPORT_PATH: &str = "coverage_report.txt";
pub const DEFAULT_RUNTIME_CONFIG_PATH: &str = "config/runtime.json";
pub const DEFAULT_SANDBOX_IMAGE: &str = "covharness-python:latest";

/// Which test sources a batch run covers (the CLI's positional argument)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TestSelection {
    Original,
    Llm,
    Both,
}

impl TestSelection {
    pub fn sources(&self) -> Vec<TestSource> {
        match self {
            TestSelection::Original => vec![TestSource::Original],
            TestSelection::Llm => vec![TestSource::Llm],
            TestSelection::Both => vec![TestSource::Original, TestSource::Llm],
        }
    }
}

impl FromStr for TestSelection {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "1" | "original" => Ok(TestSelection::Original),
            "2" | "llm" => Ok(TestSelection::Llm),
            "both" => Ok(TestSelection::Both),
            other => Err(format!(
                "invalid test type '{}' (valid: 1, original, 2, llm, both)",
                other
            )),
        }
    }
}

impl fmt::Display for TestSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TestSelection::Original => write!(f, "original"),
            TestSelection::Llm => write!(f, "llm"),
            TestSelection::Both => write!(f, "both"),
        }
    }
}

/// Execution backend for candidate runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EngineKind {
    /// Local subprocess per test case
    Process,
    /// Fresh Docker container per test case
    Docker,
}

impl FromStr for EngineKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "process" | "local" => Ok(EngineKind::Process),
            "docker" => Ok(EngineKind::Docker),
            other => Err(format!("invalid engine '{}' (valid: process, docker)", other)),
        }
    }
}

impl fmt::Display for EngineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineKind::Process => write!(f, "process"),
            EngineKind::Docker => write!(f, "docker"),
        }
    }
}

/// A directory of `problem_*` folders and the suite they belong to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProblemRoot {
    pub path: PathBuf,
    pub suite: Suite,
}

#[derive(Debug, Clone)]
pub struct RunSettings {
    pub timeout_seconds: u64,
    pub max_workers: usize,
    pub engine: EngineKind,
    pub problem_roots: Vec<ProblemRoot>,
    pub records_path: PathBuf,
    pub report_path: PathBuf,
    pub runtime_config_path: PathBuf,
    pub provenance: Provenance,
}

impl RunSettings {
    pub fn new() -> Self {
        Self {
            timeout_seconds: DEFAULT_TIMEOUT_SECONDS,
            max_workers: DEFAULT_MAX_WORKERS,
            engine: EngineKind::Process,
            problem_roots: default_roots(Path::new(".")),
            records_path: PathBuf::from(DEFAULT_RECORDS_PATH),
            report_path: PathBuf::from(DEFAULT_REPORT_PATH),
            runtime_config_path: PathBuf::from(DEFAULT_RUNTIME_CONFIG_PATH),
            provenance: Provenance::default(),
        }
    }

    /// Defaults overridden by environment variables.
    ///
    /// Unparseable values are ignored and the default is kept.
    pub fn from_env() -> Self {
        let mut settings = Self::new();
        settings.apply_overrides(|key| std::env::var(key).ok());
        settings
    }

    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(secs) = lookup("HARNESS_TIMEOUT_SECONDS").and_then(|v| v.parse().ok()) {
            self.timeout_seconds = secs;
        }
        if let Some(workers) = lookup("HARNESS_WORKERS").and_then(|v| v.parse::<usize>().ok()) {
            self.max_workers = workers.max(1);
        }
        if let Some(engine) = lookup("HARNESS_ENGINE").and_then(|v| v.parse().ok()) {
            self.engine = engine;
        }
        if let Some(model) = lookup("MODEL_NAME") {
            self.provenance.model = model;
        }
        if let Some(provider) = lookup("LLM_PROVIDER") {
            self.provenance.provider = provider;
        }
    }

    /// Re-point the problem roots below `base`
    pub fn with_base_dir(mut self, base: &Path) -> Self {
        self.problem_roots = default_roots(base);
        self
    }

    pub fn timeout_ms(&self) -> u64 {
        self.timeout_seconds * 1000
    }
}

impl Default for RunSettings {
    fn default() -> Self {
        Self::new()
    }
}

fn default_roots(base: &Path) -> Vec<ProblemRoot> {
    vec![
        ProblemRoot {
            path: base.join("humaneval_problems"),
            suite: Suite::HumanEval,
        },
        ProblemRoot {
            path: base.join("apps_problems"),
            suite: Suite::Apps,
        },
    ]
}

/// Interpreter and sandbox settings, stored in `config/runtime.json`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Interpreter used for candidate runs
    pub interpreter: String,
    /// Module name of the coverage backend (`python -m <module>`)
    pub coverage_module: String,
    pub docker: DockerSandboxConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DockerSandboxConfig {
    pub image: String,
    pub python_version: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    /// `uid:gid` to run as, so files in the bind-mounted work dir stay removable
    #[serde(default)]
    pub user: Option<String>,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            interpreter: "python3".to_string(),
            coverage_module: "coverage".to_string(),
            docker: DockerSandboxConfig::default(),
        }
    }
}

impl Default for DockerSandboxConfig {
    fn default() -> Self {
        Self {
            image: DEFAULT_SANDBOX_IMAGE.to_string(),
            python_version: "3.11-slim".to_string(),
            memory_limit_mb: 256,
            cpu_limit: 0.5,
            user: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_selection_accepts_numeric_aliases() {
        assert_eq!("1".parse::<TestSelection>().unwrap(), TestSelection::Original);
        assert_eq!("2".parse::<TestSelection>().unwrap(), TestSelection::Llm);
        assert_eq!("BOTH".parse::<TestSelection>().unwrap(), TestSelection::Both);
        assert!("3".parse::<TestSelection>().is_err());
    }

    #[test]
    fn test_selection_sources_order() {
        assert_eq!(
            TestSelection::Both.sources(),
            vec![TestSource::Original, TestSource::Llm]
        );
        assert_eq!(TestSelection::Llm.sources(), vec![TestSource::Llm]);
    }

    #[test]
    fn test_defaults() {
        let settings = RunSettings::new();
        assert_eq!(settings.timeout_seconds, 30);
        assert_eq!(settings.timeout_ms(), 30_000);
        assert_eq!(settings.engine, EngineKind::Process);
        assert_eq!(settings.problem_roots.len(), 2);
        assert_eq!(settings.problem_roots[0].suite, Suite::HumanEval);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("HARNESS_TIMEOUT_SECONDS", "5"),
            ("HARNESS_WORKERS", "0"),
            ("HARNESS_ENGINE", "docker"),
            ("MODEL_NAME", "gpt-4o-mini"),
        ]
        .into_iter()
        .collect();

        let mut settings = RunSettings::new();
        settings.apply_overrides(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(settings.timeout_seconds, 5);
        assert_eq!(settings.max_workers, 1);
        assert_eq!(settings.engine, EngineKind::Docker);
        assert_eq!(settings.provenance.model, "gpt-4o-mini");
        assert_eq!(settings.provenance.provider, "unknown");
    }

    #[test]
    fn test_bad_override_keeps_default() {
        let mut settings = RunSettings::new();
        settings.apply_overrides(|key| (key == "HARNESS_TIMEOUT_SECONDS").then(|| "soon".to_string()));
        assert_eq!(settings.timeout_seconds, DEFAULT_TIMEOUT_SECONDS);
    }

    #[test]
    fn test_runtime_config_roundtrips_through_json() {
        let json = r#"{
            "interpreter": "python3.12",
            "coverage_module": "coverage",
            "docker": {
                "image": "covharness-python:3.12",
                "python_version": "3.12-slim",
                "memory_limit_mb": 512,
                "cpu_limit": 1.0
            }
        }"#;
        let config: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert_eq!(config.interpreter, "python3.12");
        assert_eq!(config.docker.memory_limit_mb, 512);
        assert_eq!(config.docker.user, None);
    }
}
