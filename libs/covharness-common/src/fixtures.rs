//! Problem folder loading.
//!
//! A problem root (`humaneval_problems/`, `apps_problems/`) holds one
//! `problem_*` folder per problem. The folder layout decides the oracle:
//!
//! | Suite     | Original oracle                 | LLM oracle                                   |
//! |-----------|---------------------------------|----------------------------------------------|
//! | HumanEval | `test.py` with `check(candidate)` | `test_cases_llm.json` (`test_cases` list)  |
//! | APPS      | `test_cases.json`               | `test_cases_llm.json` (`inputs`/`outputs`)   |
//!
//! Candidate responses are the `llm_response*.txt` files of the folder.

use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::HarnessError;
use crate::types::{
    ArgCase, CandidateResponse, IoCase, Problem, Provenance, Suite, TestOracle, TestSource,
};

pub const PROBLEM_DIR_PREFIX: &str = "problem_";
pub const RESPONSE_FILE_PREFIX: &str = "llm_response";

const METADATA_FILE: &str = "metadata.json";
const HUMANEVAL_PROMPT_FILE: &str = "prompt.py";
const HUMANEVAL_ORACLE_FILE: &str = "test.py";
const APPS_PROMPT_FILE: &str = "problem.txt";
const APPS_CASES_FILE: &str = "test_cases.json";
const LLM_CASES_FILE: &str = "test_cases_llm.json";

#[derive(Debug, Deserialize)]
struct HumanEvalMetadata {
    entry_point: String,
    #[serde(default)]
    task_id: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct AppsMetadata {
    #[serde(default)]
    problem_id: Option<String>,
    #[serde(default)]
    difficulty: Option<String>,
}

#[derive(Debug, Deserialize)]
struct IoCaseFile {
    inputs: Vec<String>,
    outputs: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct ArgCaseFile {
    test_cases: Vec<ArgCaseEntry>,
}

#[derive(Debug, Deserialize)]
struct ArgCaseEntry {
    #[serde(default)]
    input: Vec<Value>,
    #[serde(default)]
    expected: Value,
}

/// List the `problem_*` folders of a root in sorted order.
///
/// A missing root yields no folders.
pub fn discover_problems(root: &Path) -> Result<Vec<PathBuf>, HarnessError> {
    if !root.is_dir() {
        return Ok(Vec::new());
    }

    let mut folders = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        let path = entry.path();
        let is_problem = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(PROBLEM_DIR_PREFIX))
            .unwrap_or(false);
        if is_problem && path.is_dir() {
            folders.push(path);
        }
    }
    folders.sort();
    Ok(folders)
}

/// Load one problem folder for the given test source.
///
/// Returns `Ok(None)` when the folder has no oracle for that source (e.g. no
/// `test_cases_llm.json`), and `MalformedProblemFixture` when the files exist
/// but do not match their schema.
pub fn load_problem(
    folder: &Path,
    suite: Suite,
    source: TestSource,
) -> Result<Option<Problem>, HarnessError> {
    match suite {
        Suite::HumanEval => load_humaneval(folder, source),
        Suite::Apps => load_apps(folder, source),
    }
}

fn load_humaneval(folder: &Path, source: TestSource) -> Result<Option<Problem>, HarnessError> {
    let oracle_path = match source {
        TestSource::Original => folder.join(HUMANEVAL_ORACLE_FILE),
        TestSource::Llm => folder.join(LLM_CASES_FILE),
    };
    if !oracle_path.exists() {
        debug!(folder = %folder.display(), source = %source, "No oracle for test source");
        return Ok(None);
    }

    let metadata_path = folder.join(METADATA_FILE);
    if !metadata_path.exists() {
        return Err(HarnessError::malformed(&metadata_path, "metadata.json is required"));
    }
    let metadata: HumanEvalMetadata = read_json(&metadata_path)?;
    if !is_identifier(&metadata.entry_point) {
        return Err(HarnessError::malformed(
            &metadata_path,
            format!("entry_point '{}' is not an identifier", metadata.entry_point),
        ));
    }

    let oracle = match source {
        TestSource::Original => TestOracle::Callable {
            source: fs::read_to_string(&oracle_path)?,
        },
        TestSource::Llm => {
            let file: ArgCaseFile = read_json(&oracle_path)?;
            TestOracle::ArgCases(
                file.test_cases
                    .into_iter()
                    .map(|entry| ArgCase {
                        args: entry.input,
                        expected: entry.expected,
                    })
                    .collect(),
            )
        }
    };

    Ok(Some(Problem {
        id: folder_name(folder),
        suite: Suite::HumanEval,
        prompt: read_optional(&folder.join(HUMANEVAL_PROMPT_FILE))?,
        entry_point: Some(metadata.entry_point),
        oracle,
        difficulty: None,
        task_id: metadata.task_id,
    }))
}

fn load_apps(folder: &Path, source: TestSource) -> Result<Option<Problem>, HarnessError> {
    let cases_path = match source {
        TestSource::Original => folder.join(APPS_CASES_FILE),
        TestSource::Llm => folder.join(LLM_CASES_FILE),
    };
    if !cases_path.exists() {
        debug!(folder = %folder.display(), source = %source, "No oracle for test source");
        return Ok(None);
    }

    let file: IoCaseFile = read_json(&cases_path)?;
    if file.inputs.len() != file.outputs.len() {
        return Err(HarnessError::malformed(
            &cases_path,
            format!(
                "{} inputs but {} outputs",
                file.inputs.len(),
                file.outputs.len()
            ),
        ));
    }

    let metadata_path = folder.join(METADATA_FILE);
    let metadata: AppsMetadata = if metadata_path.exists() {
        read_json(&metadata_path)?
    } else {
        AppsMetadata::default()
    };

    let cases = file
        .inputs
        .into_iter()
        .zip(file.outputs)
        .map(|(input, expected_output)| IoCase {
            input,
            expected_output,
        })
        .collect();

    Ok(Some(Problem {
        id: folder_name(folder),
        suite: Suite::Apps,
        prompt: read_optional(&folder.join(APPS_PROMPT_FILE))?,
        entry_point: None,
        oracle: TestOracle::IoPairs(cases),
        difficulty: metadata.difficulty,
        task_id: metadata.problem_id,
    }))
}

/// Load every `llm_response*.txt` of a folder, sorted by file name
pub fn load_candidates(
    folder: &Path,
    provenance: &Provenance,
) -> Result<Vec<CandidateResponse>, HarnessError> {
    let mut paths = Vec::new();
    for entry in fs::read_dir(folder)? {
        let path = entry?.path();
        let matches = path
            .file_name()
            .and_then(|n| n.to_str())
            .map(|n| n.starts_with(RESPONSE_FILE_PREFIX) && n.ends_with(".txt"))
            .unwrap_or(false);
        if matches && path.is_file() {
            paths.push(path);
        }
    }
    paths.sort();

    paths
        .into_iter()
        .map(|path| {
            let label = path
                .file_stem()
                .and_then(|s| s.to_str())
                .unwrap_or(RESPONSE_FILE_PREFIX)
                .to_string();
            Ok(CandidateResponse {
                label,
                text: fs::read_to_string(&path)?,
                provenance: provenance.clone(),
            })
        })
        .collect()
}

fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T, HarnessError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content).map_err(|e| HarnessError::malformed(path, e.to_string()))
}

fn read_optional(path: &Path) -> Result<String, HarnessError> {
    if path.exists() {
        Ok(fs::read_to_string(path)?)
    } else {
        Ok(String::new())
    }
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.display().to_string())
}

fn is_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_alphabetic() => chars.all(|c| c == '_' || c.is_alphanumeric()),
        _ => false,
    }
}
