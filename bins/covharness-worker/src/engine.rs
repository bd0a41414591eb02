/// Execution Engine - Abstraction for Candidate Execution
///
/// **Core Responsibility:**
/// Run one driver script in a fresh interpreter under coverage and capture
/// raw outputs.
///
/// **Critical Architectural Boundary:**
/// - Engine knows HOW to execute (local subprocess or Docker container)
/// - Engine does NOT know pass/fail rules
/// - Engine does NOT interpret coverage numbers
/// - Engine returns raw outputs for the evaluator to judge
///
/// Every run gets its own process, so module state can never leak between
/// test cases. Each run writes its own parallel-mode coverage data file;
/// [`ExecutionEngine::collect_coverage`] combines them into one JSON report.

use crate::assembler::{AssembledUnit, DriverScript, ORACLE_FILE, SOLUTION_FILE};
use crate::evaluator::RawExecution;
use anyhow::{bail, Context, Result};
use base64::{engine::general_purpose, Engine as _};
use bollard::container::{
    Config, CreateContainerOptions, KillContainerOptions, LogOutput, LogsOptions,
    RemoveContainerOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::Docker;
use covharness_common::config::{EngineKind, RuntimeConfig};
use futures_util::stream::StreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Safety limits to keep pathological inputs away from the interpreter
const MAX_SOURCE_CODE_BYTES: usize = 1024 * 1024; // 1MB
const MAX_TEST_INPUT_BYTES: usize = 10 * 1024 * 1024; // 10MB

pub const COVERAGE_JSON_FILE: &str = "coverage.json";

/// Grace period for draining pipes after a timed-out process was killed
const PIPE_DRAIN_GRACE: Duration = Duration::from_secs(2);

const CONTAINER_WORK_DIR: &str = "/work";

/// Write the candidate, oracle and drivers of a unit into its work directory
pub async fn write_unit(work_dir: &Path, unit: &AssembledUnit) -> Result<()> {
    // GUARDRAIL: reject oversized candidates before anything is spawned
    if unit.solution.len() > MAX_SOURCE_CODE_BYTES {
        bail!("Source code exceeds maximum size of {} bytes", MAX_SOURCE_CODE_BYTES);
    }

    tokio::fs::write(work_dir.join(SOLUTION_FILE), &unit.solution)
        .await
        .context("Failed to write candidate source")?;
    if let Some(oracle) = &unit.oracle {
        tokio::fs::write(work_dir.join(ORACLE_FILE), oracle)
            .await
            .context("Failed to write oracle source")?;
    }
    for driver in &unit.drivers {
        tokio::fs::write(work_dir.join(&driver.file_name), &driver.source)
            .await
            .with_context(|| format!("Failed to write {}", driver.file_name))?;
    }
    Ok(())
}

fn coverage_run_args(coverage_module: &str, driver_file: &str) -> Vec<String> {
    vec![
        "-m".to_string(),
        coverage_module.to_string(),
        "run".to_string(),
        "--branch".to_string(),
        "--parallel-mode".to_string(),
        format!("--include={}", SOLUTION_FILE),
        driver_file.to_string(),
    ]
}

fn coverage_report_args(coverage_module: &str) -> [Vec<String>; 2] {
    [
        vec!["-m".to_string(), coverage_module.to_string(), "combine".to_string()],
        vec![
            "-m".to_string(),
            coverage_module.to_string(),
            "json".to_string(),
            "-o".to_string(),
            COVERAGE_JSON_FILE.to_string(),
            format!("--include={}", SOLUTION_FILE),
        ],
    ]
}

async fn read_report(work_dir: &Path) -> Result<Option<String>> {
    let path = work_dir.join(COVERAGE_JSON_FILE);
    if !path.exists() {
        return Ok(None);
    }
    let json = tokio::fs::read_to_string(&path)
        .await
        .context("Failed to read coverage report")?;
    Ok(Some(json))
}

/// Swappable execution backend
pub enum ExecutionEngine {
    Process(ProcessEngine),
    Docker(DockerEngine),
}

impl ExecutionEngine {
    /// Build the engine selected by `kind`; the Docker engine checks its image up front
    pub async fn connect(kind: EngineKind, runtime: &RuntimeConfig) -> Result<Self> {
        match kind {
            EngineKind::Process => Ok(ExecutionEngine::Process(ProcessEngine::new(runtime))),
            EngineKind::Docker => {
                let engine = DockerEngine::new(runtime)?;
                engine.ensure_image().await.with_context(|| {
                    format!(
                        "Docker image '{}' is not available; build it with `covharness-cli build-image`",
                        engine.image
                    )
                })?;
                Ok(ExecutionEngine::Docker(engine))
            }
        }
    }

    pub fn kind(&self) -> EngineKind {
        match self {
            ExecutionEngine::Process(_) => EngineKind::Process,
            ExecutionEngine::Docker(_) => EngineKind::Docker,
        }
    }

    /// Run one driver in a fresh interpreter with a hard wall-clock timeout
    #[tracing::instrument(skip(self, work_dir, driver), fields(case_index = driver.case_index, engine = %self.kind()))]
    pub async fn run_case(
        &self,
        work_dir: &Path,
        driver: &DriverScript,
        timeout_ms: u64,
    ) -> Result<RawExecution> {
        if driver.stdin.len() > MAX_TEST_INPUT_BYTES {
            bail!("Test input exceeds maximum size of {} bytes", MAX_TEST_INPUT_BYTES);
        }

        match self {
            ExecutionEngine::Process(engine) => engine.run_case(work_dir, driver, timeout_ms).await,
            ExecutionEngine::Docker(engine) => engine.run_case(work_dir, driver, timeout_ms).await,
        }
    }

    /// Combine the per-run data files and export the JSON report.
    ///
    /// Returns `None` when no report was produced (no data, or the tool failed).
    #[tracing::instrument(skip(self, work_dir), fields(engine = %self.kind()))]
    pub async fn collect_coverage(&self, work_dir: &Path, timeout_ms: u64) -> Result<Option<String>> {
        match self {
            ExecutionEngine::Process(engine) => engine.collect_coverage(work_dir, timeout_ms).await?,
            ExecutionEngine::Docker(engine) => engine.collect_coverage(work_dir, timeout_ms).await?,
        }
        read_report(work_dir).await
    }
}

async fn read_pipe<R: AsyncRead + Unpin>(pipe: Option<R>) -> String {
    let mut buf = Vec::new();
    if let Some(mut pipe) = pipe {
        if let Err(e) = pipe.read_to_end(&mut buf).await {
            debug!(error = %e, "Pipe closed early");
        }
    }
    String::from_utf8_lossy(&buf).into_owned()
}

/// Local execution: one `python -m coverage run` subprocess per case
pub struct ProcessEngine {
    interpreter: String,
    coverage_module: String,
}

impl ProcessEngine {
    pub fn new(runtime: &RuntimeConfig) -> Self {
        Self {
            interpreter: runtime.interpreter.clone(),
            coverage_module: runtime.coverage_module.clone(),
        }
    }

    async fn run_case(
        &self,
        work_dir: &Path,
        driver: &DriverScript,
        timeout_ms: u64,
    ) -> Result<RawExecution> {
        let mut child = Command::new(&self.interpreter)
            .args(coverage_run_args(&self.coverage_module, &driver.file_name))
            .current_dir(work_dir)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn interpreter '{}'", self.interpreter))?;

        let start_time = Instant::now();

        // Feed stdin from its own task so a candidate that never reads can't block us
        let stdin = child.stdin.take();
        let input = driver.stdin.clone();
        let writer = tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(input.as_bytes()).await;
            }
        });
        let stdout_task = tokio::spawn(read_pipe(child.stdout.take()));
        let stderr_task = tokio::spawn(read_pipe(child.stderr.take()));

        // HARD TIMEOUT
        let status = match tokio::time::timeout(Duration::from_millis(timeout_ms), child.wait()).await {
            Ok(status) => Some(status.context("Failed to wait for interpreter")?),
            Err(_) => {
                warn!(timeout_ms, "Execution timed out - killing process");
                if let Err(e) = child.kill().await {
                    warn!(error = %e, "Failed to kill timed-out process");
                }
                None
            }
        };
        let execution_time_ms = start_time.elapsed().as_millis() as u64;
        writer.abort();

        let stdout = tokio::time::timeout(PIPE_DRAIN_GRACE, stdout_task)
            .await
            .ok()
            .and_then(|joined| joined.ok())
            .unwrap_or_default();
        let mut stderr = tokio::time::timeout(PIPE_DRAIN_GRACE, stderr_task)
            .await
            .ok()
            .and_then(|joined| joined.ok())
            .unwrap_or_default();

        let raw = match status {
            Some(status) => {
                let exit_code = status.code().map(i64::from);
                // No exit code means the process died from a signal
                let crashed = exit_code.is_none();
                if crashed {
                    stderr.push_str("\n[Process killed by signal]");
                }
                RawExecution {
                    stdout,
                    stderr,
                    exit_code,
                    crashed,
                    timed_out: false,
                    execution_time_ms,
                }
            }
            None => {
                stderr.push_str("\n[Execution timed out]");
                RawExecution {
                    stdout,
                    stderr,
                    exit_code: None,
                    crashed: false,
                    timed_out: true,
                    execution_time_ms,
                }
            }
        };

        debug!(exit_code = ?raw.exit_code, execution_ms = execution_time_ms, "Process finished");
        Ok(raw)
    }

    async fn collect_coverage(&self, work_dir: &Path, timeout_ms: u64) -> Result<()> {
        for args in coverage_report_args(&self.coverage_module) {
            let mut cmd = Command::new(&self.interpreter);
            cmd.args(&args)
                .current_dir(work_dir)
                .stdin(Stdio::null())
                .kill_on_drop(true);
            match tokio::time::timeout(Duration::from_millis(timeout_ms), cmd.output()).await {
                Ok(Ok(output)) if output.status.success() => {}
                Ok(Ok(output)) => {
                    debug!(
                        command = %args.join(" "),
                        stderr = %String::from_utf8_lossy(&output.stderr).trim(),
                        "Coverage tool reported no data"
                    );
                    return Ok(());
                }
                Ok(Err(e)) => {
                    return Err(e).with_context(|| format!("Failed to run '{}'", args.join(" ")));
                }
                Err(_) => {
                    warn!(command = %args.join(" "), "Coverage tool timed out");
                    return Ok(());
                }
            }
        }
        Ok(())
    }
}

/// Force-removes its container when dropped
struct ContainerGuard<'a> {
    docker: &'a Docker,
    container_id: String,
}

impl<'a> ContainerGuard<'a> {
    fn new(docker: &'a Docker, container_id: String) -> Self {
        Self { docker, container_id }
    }
}

impl Drop for ContainerGuard<'_> {
    fn drop(&mut self) {
        // Best-effort cleanup - cannot be async in Drop
        let container_id = self.container_id.clone();
        let docker = self.docker.clone();

        tokio::spawn(async move {
            let remove_options = RemoveContainerOptions {
                force: true,
                ..Default::default()
            };

            if let Err(e) = docker.remove_container(&container_id, Some(remove_options)).await {
                warn!(container_id = %container_id, error = %e, "Failed to cleanup container");
            }
        });
    }
}

/// Docker-based execution: one fresh container per case.
///
/// **Docker Execution Rules:**
/// 1. The sandbox image must carry the interpreter and the coverage package
/// 2. Containers run with the network disabled and CPU/memory limits
/// 3. The work directory is bind-mounted at `/work`
/// 4. Test input travels base64-encoded in `TEST_INPUT` and is decoded
///    into the interpreter's stdin
/// 5. Containers are force-removed by a drop guard
pub struct DockerEngine {
    docker: Docker,
    image: String,
    interpreter: String,
    coverage_module: String,
    memory_limit: i64,
    cpu_limit: i64,
    user: Option<String>,
}

impl DockerEngine {
    pub fn new(runtime: &RuntimeConfig) -> Result<Self> {
        let docker = Docker::connect_with_local_defaults()
            .context("Failed to connect to Docker daemon")?;

        Ok(DockerEngine {
            docker,
            image: runtime.docker.image.clone(),
            interpreter: runtime.interpreter.clone(),
            coverage_module: runtime.coverage_module.clone(),
            memory_limit: i64::from(runtime.docker.memory_limit_mb) * 1024 * 1024,
            cpu_limit: (f64::from(runtime.docker.cpu_limit) * 1_000_000_000.0) as i64,
            user: runtime.docker.user.clone(),
        })
    }

    /// Ensure the sandbox image is available (pull if needed)
    async fn ensure_image(&self) -> Result<()> {
        if self.docker.inspect_image(&self.image).await.is_ok() {
            debug!(image = %self.image, "Image cache hit");
            return Ok(());
        }

        warn!(image = %self.image, "Image cache miss (pulling now)");

        let options = Some(CreateImageOptions {
            from_image: self.image.as_str(),
            ..Default::default()
        });

        let mut stream = self.docker.create_image(options, None, None);
        while let Some(result) = stream.next().await {
            result.context("Failed to pull Docker image")?;
        }

        info!(image = %self.image, "Image pulled successfully");
        Ok(())
    }

    fn shell_command(&self, args: &[String]) -> String {
        format!("{} {}", self.interpreter, args.join(" "))
    }

    async fn run_case(
        &self,
        work_dir: &Path,
        driver: &DriverScript,
        timeout_ms: u64,
    ) -> Result<RawExecution> {
        let run = self.shell_command(&coverage_run_args(&self.coverage_module, &driver.file_name));
        let script = format!("printf '%s' \"$TEST_INPUT\" | base64 -d | {}", run);
        let env = vec![format!(
            "TEST_INPUT={}",
            general_purpose::STANDARD.encode(&driver.stdin)
        )];
        self.run_in_container(work_dir, script, env, timeout_ms).await
    }

    async fn collect_coverage(&self, work_dir: &Path, timeout_ms: u64) -> Result<()> {
        let [combine, export] = coverage_report_args(&self.coverage_module);
        let script = format!(
            "{} && {}",
            self.shell_command(&combine),
            self.shell_command(&export)
        );
        let raw = self.run_in_container(work_dir, script, Vec::new(), timeout_ms).await?;
        if raw.exit_code != Some(0) {
            debug!(stderr = %raw.stderr.trim(), "Coverage tool reported no data");
        }
        Ok(())
    }

    /// Execute a shell script in a fresh container with hardened safety guarantees
    ///
    /// **Safety Guarantees:**
    /// - Hard timeout: enforced via tokio::time::timeout, kills container on timeout
    /// - Guaranteed cleanup: container removed even on panic/cancellation via Drop guard
    /// - Crash classification: exit codes 137 (OOM kill) and 139 (segfault)
    async fn run_in_container(
        &self,
        work_dir: &Path,
        script: String,
        env: Vec<String>,
        timeout_ms: u64,
    ) -> Result<RawExecution> {
        let host_dir: PathBuf = work_dir
            .canonicalize()
            .context("Failed to resolve work directory")?;
        let container_name = format!("covharness-{}", uuid::Uuid::new_v4());

        let config = Config {
            image: Some(self.image.clone()),
            cmd: Some(vec!["sh".to_string(), "-c".to_string(), script]),
            env: Some(env),
            working_dir: Some(CONTAINER_WORK_DIR.to_string()),
            user: self.user.clone(),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            network_disabled: Some(true), // SECURITY: No network access
            host_config: Some(bollard::models::HostConfig {
                memory: Some(self.memory_limit),
                nano_cpus: Some(self.cpu_limit),
                binds: Some(vec![format!("{}:{}", host_dir.display(), CONTAINER_WORK_DIR)]),
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.as_str(),
            platform: None,
        };

        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .context("Failed to create Docker container")?;

        let container_id = container.id.clone();

        let _guard = ContainerGuard::new(&self.docker, container_id.clone());

        let start_time = Instant::now();

        self.docker
            .start_container(&container_id, None::<StartContainerOptions<String>>)
            .await
            .context("Failed to start Docker container")?;

        let execution_future = async {
            let mut stdout = String::new();
            let mut stderr = String::new();
            let mut exit_code: Option<i64> = None;

            let logs_options = Some(LogsOptions::<String> {
                stdout: true,
                stderr: true,
                follow: true,
                ..Default::default()
            });

            let mut logs_stream = self.docker.logs(&container_id, logs_options);
            while let Some(output) = logs_stream.next().await {
                match output {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Err(e) => {
                        warn!(error = %e, "Error reading container logs");
                        break;
                    }
                    _ => {}
                }
            }

            let wait_options = WaitContainerOptions {
                condition: "not-running",
            };

            let mut wait_stream = self.docker.wait_container(&container_id, Some(wait_options));
            match wait_stream.next().await {
                Some(Ok(response)) => exit_code = Some(response.status_code),
                // Non-zero exits surface as a wait error carrying the code
                Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => {
                    exit_code = Some(code)
                }
                Some(Err(e)) => warn!(error = %e, "Failed to get container exit code"),
                None => warn!("No wait response from container"),
            }

            (stdout, stderr, exit_code)
        };

        let raw = match tokio::time::timeout(Duration::from_millis(timeout_ms), execution_future).await {
            Ok((stdout, mut stderr, exit_code)) => {
                let crashed = matches!(exit_code, Some(137) | Some(139));
                match exit_code {
                    Some(137) => stderr.push_str("\n[Container killed: likely OOM or exceeded memory limit]"),
                    Some(139) => stderr.push_str("\n[Container killed: segmentation fault]"),
                    _ => {}
                }
                RawExecution {
                    stdout,
                    stderr,
                    exit_code,
                    crashed,
                    timed_out: false,
                    execution_time_ms: start_time.elapsed().as_millis() as u64,
                }
            }
            Err(_) => {
                warn!(timeout_ms, "Execution timed out - killing container");
                if let Err(e) = self
                    .docker
                    .kill_container(&container_id, None::<KillContainerOptions<String>>)
                    .await
                {
                    warn!(error = %e, "Failed to kill timed-out container");
                }
                RawExecution {
                    stdout: String::new(),
                    stderr: String::from("\n[Execution timed out]"),
                    exit_code: None,
                    crashed: false,
                    timed_out: true,
                    execution_time_ms: start_time.elapsed().as_millis() as u64,
                }
            }
        };

        debug!(exit_code = ?raw.exit_code, execution_ms = raw.execution_time_ms, "Container finished");
        Ok(raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_coverage_run_args_restrict_to_solution() {
        let args = coverage_run_args("coverage", "driver_2.py");
        assert_eq!(
            args,
            vec!["-m", "coverage", "run", "--branch", "--parallel-mode", "--include=solution.py", "driver_2.py"]
        );
    }

    #[test]
    fn test_coverage_report_args() {
        let [combine, export] = coverage_report_args("coverage");
        assert_eq!(combine, vec!["-m", "coverage", "combine"]);
        assert_eq!(export.last().map(String::as_str), Some("--include=solution.py"));
        assert!(export.contains(&COVERAGE_JSON_FILE.to_string()));
    }

    #[tokio::test]
    async fn test_write_unit_rejects_oversized_source() {
        let dir = tempfile::TempDir::new().unwrap();
        let unit = AssembledUnit {
            convention: crate::assembler::Convention::Program,
            solution: "x".repeat(MAX_SOURCE_CODE_BYTES + 1),
            oracle: None,
            drivers: Vec::new(),
        };
        assert!(write_unit(dir.path(), &unit).await.is_err());
        assert!(!dir.path().join(SOLUTION_FILE).exists());
    }

    #[tokio::test]
    async fn test_run_case_rejects_oversized_input() {
        let dir = tempfile::TempDir::new().unwrap();
        let engine = ExecutionEngine::Process(ProcessEngine::new(&RuntimeConfig::default()));
        let driver = DriverScript {
            case_index: 0,
            file_name: "driver_0.py".to_string(),
            source: String::new(),
            stdin: "1".repeat(MAX_TEST_INPUT_BYTES + 1),
            expectation: crate::assembler::Expectation::CleanExit,
        };
        assert!(engine.run_case(dir.path(), &driver, 1000).await.is_err());
    }
}
