/// Solution Assembler - Candidate + Oracle → Runnable Unit
///
/// **Responsibility:**
/// Decide how a normalized candidate is executed and produce one driver
/// script per isolated run.
///
/// **Conventions:**
/// - Function entry point: the problem names a function; drivers import the
///   candidate module and call it (through the oracle's `check`, or once per
///   literal argument case)
/// - Program: the candidate reads stdin and writes stdout; the driver runs it
///   as `__main__`
/// - Wrapped function: a program-style problem answered with definitions
///   only; the driver calls the first function and prints its result
///
/// Drivers live in their own files so coverage, which is restricted to
/// `solution.py`, never measures harness code.

use covharness_common::normalize::reindent_function_body;
use covharness_common::types::{ArgCase, IoCase, Problem, TestOracle};
use covharness_common::HarnessError;
use serde_json::Value;

pub const SOLUTION_FILE: &str = "solution.py";
pub const ORACLE_FILE: &str = "oracle.py";

/// Driver exit status when the candidate does not define the entry point
pub const MISSING_ENTRY_EXIT_CODE: i64 = 3;
/// Driver exit status when the oracle module has no `check`
pub const MISSING_CHECK_EXIT_CODE: i64 = 4;
/// Written to stderr by a driver before exiting with one of the codes above
pub const MISSING_SYMBOL_MARKER: &str = "[covharness] missing symbol:";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Convention {
    FunctionEntryPoint,
    Program,
    WrappedFunction,
}

/// What a run must produce to pass
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Expectation {
    /// The driver asserts internally; a clean exit is a pass
    CleanExit,
    /// Captured stdout must match, ignoring trailing whitespace
    Stdout(String),
}

#[derive(Debug, Clone)]
pub struct DriverScript {
    pub case_index: usize,
    pub file_name: String,
    pub source: String,
    pub stdin: String,
    pub expectation: Expectation,
}

#[derive(Debug, Clone)]
pub struct AssembledUnit {
    pub convention: Convention,
    /// Contents of `solution.py`
    pub solution: String,
    /// Contents of `oracle.py`, for callable oracles only
    pub oracle: Option<String>,
    pub drivers: Vec<DriverScript>,
}

// Shared by every driver: import a file as a named module
const LOADER_PRELUDE: &str = r#"import importlib.util
import sys


def _load(name, path):
    spec = importlib.util.spec_from_file_location(name, path)
    module = importlib.util.module_from_spec(spec)
    sys.modules[name] = module
    spec.loader.exec_module(module)
    return module


"#;

const PLAIN_HELPER: &str = r#"def _plain(value):
    if isinstance(value, (list, tuple)):
        return [_plain(v) for v in value]
    if isinstance(value, dict):
        return {k: _plain(v) for k, v in value.items()}
    return value


"#;

/// Build the runnable unit for one (problem, normalized candidate) pair
pub fn assemble(problem: &Problem, normalized: &str) -> Result<AssembledUnit, HarnessError> {
    match (&problem.oracle, problem.entry_point.as_deref()) {
        (TestOracle::IoPairs(cases), _) => assemble_program(normalized, cases),
        (TestOracle::Callable { source }, Some(entry)) => {
            let solution = complete_signature(normalized, &problem.prompt, entry);
            Ok(AssembledUnit {
                convention: Convention::FunctionEntryPoint,
                solution,
                oracle: Some(source.clone()),
                drivers: vec![DriverScript {
                    case_index: 0,
                    file_name: driver_file_name(0),
                    source: oracle_driver(entry),
                    stdin: String::new(),
                    expectation: Expectation::CleanExit,
                }],
            })
        }
        (TestOracle::ArgCases(cases), Some(entry)) => {
            let solution = complete_signature(normalized, &problem.prompt, entry);
            let drivers = cases
                .iter()
                .enumerate()
                .map(|(idx, case)| DriverScript {
                    case_index: idx,
                    file_name: driver_file_name(idx),
                    source: arg_case_driver(entry, case),
                    stdin: String::new(),
                    expectation: Expectation::CleanExit,
                })
                .collect();
            Ok(AssembledUnit {
                convention: Convention::FunctionEntryPoint,
                solution,
                oracle: None,
                drivers,
            })
        }
        (_, None) => Err(HarnessError::NoEntryPointFound),
    }
}

fn assemble_program(normalized: &str, cases: &[IoCase]) -> Result<AssembledUnit, HarnessError> {
    let (convention, runner) = if is_function_based(normalized) {
        let name = first_function_name(normalized).ok_or(HarnessError::NoEntryPointFound)?;
        (Convention::WrappedFunction, wrapped_driver(&name))
    } else {
        (Convention::Program, program_driver())
    };

    let drivers = cases
        .iter()
        .enumerate()
        .map(|(idx, case)| DriverScript {
            case_index: idx,
            file_name: driver_file_name(idx),
            source: runner.clone(),
            stdin: case.input.clone(),
            expectation: Expectation::Stdout(case.expected_output.clone()),
        })
        .collect();

    Ok(AssembledUnit {
        convention,
        solution: normalized.to_string(),
        oracle: None,
        drivers,
    })
}

pub fn driver_file_name(case_index: usize) -> String {
    format!("driver_{}.py", case_index)
}

/// Python string literal for arbitrary text (JSON string syntax is valid Python)
fn py_str(text: &str) -> String {
    serde_json::to_string(text).unwrap_or_else(|_| "\"\"".to_string())
}

fn missing_entry_guard(entry: &str) -> String {
    format!(
        "entry = getattr(solution, {name}, None)\n\
         if entry is None:\n    \
         sys.stderr.write({marker} + \" entry point %s\\n\" % {name})\n    \
         sys.exit({code})\n",
        name = py_str(entry),
        marker = py_str(MISSING_SYMBOL_MARKER),
        code = MISSING_ENTRY_EXIT_CODE
    )
}

fn oracle_driver(entry: &str) -> String {
    let mut src = String::from(LOADER_PRELUDE);
    src.push_str(&format!("solution = _load(\"solution\", {})\n", py_str(SOLUTION_FILE)));
    src.push_str(&missing_entry_guard(entry));
    src.push_str(&format!("oracle = _load(\"oracle\", {})\n", py_str(ORACLE_FILE)));
    src.push_str(&format!(
        "check = getattr(oracle, \"check\", None)\n\
         if check is None:\n    \
         sys.stderr.write({} + \" oracle check\\n\")\n    \
         sys.exit({})\n",
        py_str(MISSING_SYMBOL_MARKER),
        MISSING_CHECK_EXIT_CODE
    ));
    src.push_str("check(entry)\n");
    src
}

fn arg_case_driver(entry: &str, case: &ArgCase) -> String {
    let args = Value::Array(case.args.clone()).to_string();
    let expected = case.expected.to_string();

    let mut src = String::from(LOADER_PRELUDE);
    src.push_str("import json\n\n");
    src.push_str(PLAIN_HELPER);
    src.push_str(&format!("solution = _load(\"solution\", {})\n", py_str(SOLUTION_FILE)));
    src.push_str(&missing_entry_guard(entry));
    src.push_str(&format!("args = json.loads({})\n", py_str(&args)));
    src.push_str(&format!("expected = json.loads({})\n", py_str(&expected)));
    src.push_str(
        "result = entry(*args)\n\
         if _plain(result) != _plain(expected):\n    \
         raise AssertionError(\"expected %r, got %r\" % (expected, result))\n",
    );
    src
}

fn program_driver() -> String {
    format!("import runpy\n\nrunpy.run_path({}, run_name=\"__main__\")\n", py_str(SOLUTION_FILE))
}

fn wrapped_driver(function: &str) -> String {
    let mut src = String::from(LOADER_PRELUDE);
    src.push_str(&format!("solution = _load(\"solution\", {})\n", py_str(SOLUTION_FILE)));
    src.push_str(&missing_entry_guard(function));
    src.push_str("result = entry()\nif result is not None:\n    print(result)\n");
    src
}

fn is_definition_header(stripped: &str) -> bool {
    stripped.starts_with("def ") || stripped.starts_with("async def ") || stripped.starts_with("class ")
}

/// Whether every top-level statement is an import or a definition.
///
/// Comments and blank lines are skipped, as are the indented lines of a
/// `def`/`class` block. Anything else at the top level (including an
/// `if __name__ == "__main__":` guard) marks the source as a self-driving
/// program.
pub fn is_function_based(code: &str) -> bool {
    let mut in_block = false;

    for line in code.trim().lines() {
        let stripped = line.trim();
        if stripped.is_empty() || stripped.starts_with('#') {
            continue;
        }

        if is_definition_header(stripped) {
            in_block = true;
            continue;
        }

        if in_block {
            if line.starts_with(char::is_whitespace) {
                continue;
            }
            in_block = false;
        }

        let allowed = stripped.starts_with("import ")
            || stripped.starts_with("from ")
            || stripped.starts_with('@');
        if !allowed {
            return false;
        }
    }

    true
}

fn function_name(header: &str) -> Option<String> {
    let rest = header
        .strip_prefix("async def ")
        .or_else(|| header.strip_prefix("def "))?;
    let name = rest.split('(').next()?.trim();
    (!name.is_empty()).then(|| name.to_string())
}

/// Name of the first top-level function definition
pub fn first_function_name(code: &str) -> Option<String> {
    code.lines()
        .filter(|line| !line.starts_with(char::is_whitespace))
        .find_map(function_name)
}

fn assigns(line: &str, name: &str) -> bool {
    match line.strip_prefix(name).map(str::trim_start) {
        Some(rest) => rest.starts_with('=') && !rest.starts_with("=="),
        None => false,
    }
}

/// Whether the candidate binds `entry` itself, by `def` or top-level assignment
fn defines(code: &str, entry: &str) -> bool {
    code.lines().any(|line| {
        function_name(line.trim_start()).as_deref() == Some(entry)
            || (!line.starts_with(char::is_whitespace) && assigns(line, entry))
    })
}

/// Code part of a line, without a trailing `#` comment outside string literals
fn strip_comment(line: &str) -> &str {
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for (idx, c) in line.char_indices() {
        match quote {
            Some(_) if escaped => escaped = false,
            Some(_) if c == '\\' => escaped = true,
            Some(q) if c == q => quote = None,
            Some(_) => {}
            None if c == '#' => return &line[..idx],
            None if c == '"' || c == '\'' => quote = Some(c),
            None => {}
        }
    }
    line
}

/// Complete a body-only candidate with the prompt's entry point header.
///
/// Applies when the candidate neither binds `entry` nor defines any top-level
/// function. The prompt is kept up to the header, which may span several
/// lines and ends at the first line whose code ends with `:`. The body is
/// re-indented under the header. Other candidates pass through.
pub fn complete_signature(candidate: &str, prompt: &str, entry: &str) -> String {
    if defines(candidate, entry) || first_function_name(candidate).is_some() {
        return candidate.to_string();
    }

    let lines: Vec<&str> = prompt.lines().collect();
    let header_start = lines
        .iter()
        .position(|line| function_name(line.trim_start()).as_deref() == Some(entry));
    let header_start = match header_start {
        Some(idx) => idx,
        None => return candidate.to_string(),
    };
    let header_end = lines[header_start..]
        .iter()
        .position(|line| strip_comment(line).trim_end().ends_with(':'))
        .map(|offset| header_start + offset)
        .unwrap_or(header_start);

    let mut function = lines[header_start..=header_end].join("\n");
    function.push('\n');
    function.push_str(candidate);

    let mut completed = lines[..header_start].join("\n");
    if header_start > 0 {
        completed.push('\n');
    }
    completed.push_str(&reindent_function_body(&function));
    completed
}
