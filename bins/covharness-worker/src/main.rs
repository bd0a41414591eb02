mod assembler;
mod classifier;
mod config;
mod coverage;
mod engine;
mod evaluator;
mod executor;


use anyhow::Context;
use clap::Parser;
use config::RuntimeConfigManager;
use covharness_common::config::{EngineKind, RunSettings, TestSelection, DEFAULT_RUNTIME_CONFIG_PATH};
use covharness_common::fixtures;
use covharness_common::report;
use covharness_common::types::{CandidateResponse, EvaluationRecord, TestSource};
use engine::ExecutionEngine;
use executor::{evaluate_isolated, EvaluationJob};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::signal;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

/// Run every LLM response against its problem's oracle and measure coverage
#[derive(Parser, Debug)]
#[command(name = "covharness", version, about)]
struct Args {
    /// Which tests to run: 1 | original, 2 | llm, both
    #[arg(default_value = "both")]
    test_type: TestSelection,

    /// Directory holding humaneval_problems/ and apps_problems/
    #[arg(long, default_value = ".")]
    root: PathBuf,

    /// Concurrent evaluations (overrides HARNESS_WORKERS)
    #[arg(long)]
    workers: Option<usize>,

    /// Per-case timeout in seconds (overrides HARNESS_TIMEOUT_SECONDS)
    #[arg(long)]
    timeout: Option<u64>,

    /// Execution backend: process | docker (overrides HARNESS_ENGINE)
    #[arg(long)]
    engine: Option<EngineKind>,

    /// JSONL file receiving one record per evaluation
    #[arg(long)]
    output: Option<PathBuf>,

    /// Text report destination
    #[arg(long)]
    report: Option<PathBuf>,

    /// Runtime config (interpreter, sandbox image and limits)
    #[arg(long)]
    config: Option<PathBuf>,
}

fn init_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_writer(std::io::stderr);

    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    let args = Args::parse();

    info!("covharness booting...");

    let mut settings = RunSettings::from_env().with_base_dir(&args.root);
    if let Some(workers) = args.workers {
        settings.max_workers = workers.max(1);
    }
    if let Some(timeout) = args.timeout {
        settings.timeout_seconds = timeout;
    }
    if let Some(engine) = args.engine {
        settings.engine = engine;
    }
    settings.records_path = args
        .output
        .clone()
        .unwrap_or_else(|| args.root.join(&settings.records_path));
    settings.report_path = args
        .report
        .clone()
        .unwrap_or_else(|| args.root.join(&settings.report_path));
    settings.runtime_config_path = args
        .config
        .clone()
        .unwrap_or_else(|| args.root.join(DEFAULT_RUNTIME_CONFIG_PATH));

    let runtime = RuntimeConfigManager::load_or_default(&settings.runtime_config_path)?;

    info!(
        test_type = %args.test_type,
        engine = %settings.engine,
        workers = settings.max_workers,
        timeout_s = settings.timeout_seconds,
        interpreter = %runtime.runtime().interpreter,
        "Harness configured"
    );
    if settings.engine == EngineKind::Docker {
        info!(image = %runtime.image(), "Docker sandbox image");
    }

    let engine = Arc::new(
        ExecutionEngine::connect(settings.engine, runtime.runtime())
            .await
            .context("Failed to initialize execution engine")?,
    );

    let jobs = build_jobs(&settings, args.test_type);
    if jobs.is_empty() {
        warn!("No evaluations to run - check the problem folders and llm_response files");
    }
    info!(jobs = jobs.len(), "Evaluation plan ready");

    // Single writer owns the sink; evaluations only send records
    let sink = tokio::fs::File::create(&settings.records_path)
        .await
        .with_context(|| format!("Failed to create {}", settings.records_path.display()))?;
    let (tx, rx) = mpsc::channel::<EvaluationRecord>(64);
    let writer = tokio::spawn(record_writer(sink, rx));

    let shutdown = async {
        match signal::ctrl_c().await {
            Ok(()) => warn!("Received shutdown signal, reporting finished evaluations..."),
            Err(e) => {
                error!(error = %e, "Failed to install CTRL+C handler");
                std::future::pending::<()>().await;
            }
        }
    };

    run_jobs(jobs, engine, &settings, &tx, shutdown).await;
    drop(tx);

    let mut records = writer
        .await
        .context("Record writer task failed")??;
    records.sort_by(|a, b| {
        (a.type_label(), &a.problem_id, &a.candidate).cmp(&(b.type_label(), &b.problem_id, &b.candidate))
    });

    print!("{}", report::render(&records));
    report::write_report(&records, &settings.report_path)
        .with_context(|| format!("Failed to write {}", settings.report_path.display()))?;

    info!(
        evaluations = records.len(),
        all_passed = records.iter().filter(|r| r.all_passed).count(),
        records = %settings.records_path.display(),
        report = %settings.report_path.display(),
        "Harness run complete"
    );
    Ok(())
}

/// Run jobs with at most `max_workers` in flight.
///
/// When `shutdown` resolves, evaluations in flight are aborted (their
/// subprocesses are killed on drop) and jobs not yet started are skipped.
#[instrument(skip_all, fields(workers = settings.max_workers))]
async fn run_jobs(
    jobs: Vec<EvaluationJob>,
    engine: Arc<ExecutionEngine>,
    settings: &RunSettings,
    tx: &mpsc::Sender<EvaluationRecord>,
    shutdown: impl Future<Output = ()>,
) {
    let timeout_ms = settings.timeout_ms();
    let mut pending = jobs.into_iter();
    let mut running = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        while running.len() < settings.max_workers {
            match pending.next() {
                Some(job) => {
                    running.spawn(evaluate_isolated(job, Arc::clone(&engine), timeout_ms));
                }
                None => break,
            }
        }

        let joined = tokio::select! {
            biased;
            _ = &mut shutdown => {
                warn!(
                    in_flight = running.len(),
                    not_started = pending.len(),
                    "Cancelling unfinished evaluations"
                );
                running.shutdown().await;
                return;
            }
            joined = running.join_next() => joined,
        };

        match joined {
            Some(Ok(record)) => {
                if tx.send(record).await.is_err() {
                    error!("Record writer stopped, abandoning remaining evaluations");
                    running.shutdown().await;
                    return;
                }
            }
            Some(Err(e)) => error!(error = %e, "Evaluation task failed to complete"),
            None => return,
        }
    }
}

async fn record_writer(
    mut sink: tokio::fs::File,
    mut rx: mpsc::Receiver<EvaluationRecord>,
) -> anyhow::Result<Vec<EvaluationRecord>> {
    let mut records = Vec::new();
    while let Some(record) = rx.recv().await {
        let mut line = serde_json::to_string(&record).context("Failed to serialize record")?;
        line.push('\n');
        sink.write_all(line.as_bytes())
            .await
            .context("Failed to write record")?;
        sink.flush().await.context("Failed to flush records")?;
        records.push(record);
    }
    Ok(records)
}

/// Expand problem folders × candidates × selected sources into jobs.
///
/// A folder that fails to load is logged and skipped; its siblings continue.
fn build_jobs(settings: &RunSettings, selection: TestSelection) -> Vec<EvaluationJob> {
    let mut jobs = Vec::new();

    for root in &settings.problem_roots {
        let folders = match fixtures::discover_problems(&root.path) {
            Ok(folders) => folders,
            Err(e) => {
                error!(root = %root.path.display(), error = %e, "Failed to list problem folders");
                continue;
            }
        };
        info!(suite = %root.suite, root = %root.path.display(), problems = folders.len(), "Discovered problems");

        for folder in folders {
            let candidates = match fixtures::load_candidates(&folder, &settings.provenance) {
                Ok(candidates) => candidates,
                Err(e) => {
                    error!(folder = %folder.display(), error = %e, "Failed to read responses");
                    continue;
                }
            };
            if candidates.is_empty() {
                warn!(folder = %folder.display(), "No LLM response found");
                continue;
            }

            for source in selection.sources() {
                jobs.extend(jobs_for(&folder, root.suite, source, &candidates));
            }
        }
    }

    jobs
}

fn jobs_for(
    folder: &Path,
    suite: covharness_common::types::Suite,
    source: TestSource,
    candidates: &[CandidateResponse],
) -> Vec<EvaluationJob> {
    match fixtures::load_problem(folder, suite, source) {
        Ok(Some(problem)) => {
            let problem = Arc::new(problem);
            candidates
                .iter()
                .map(|c| EvaluationJob::new(Arc::clone(&problem), c.clone(), source))
                .collect()
        }
        Ok(None) => {
            debug!(folder = %folder.display(), source = %source, "No oracle for this test source");
            Vec::new()
        }
        Err(e) => {
            error!(folder = %folder.display(), source = %source, error = %e, "Skipping malformed problem");
            Vec::new()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use covharness_common::types::Suite;
    use std::fs;
    use tempfile::TempDir;

    fn write_apps_problem(root: &Path, name: &str, with_llm_tests: bool) {
        let folder = root.join("apps_problems").join(name);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("problem.txt"), "Sum two numbers.").unwrap();
        fs::write(
            folder.join("test_cases.json"),
            r#"{"inputs": ["1\n2\n"], "outputs": ["3\n"]}"#,
        )
        .unwrap();
        if with_llm_tests {
            fs::write(
                folder.join("test_cases_llm.json"),
                r#"{"inputs": ["2\n2\n", "0\n0\n"], "outputs": ["4\n", "0\n"]}"#,
            )
            .unwrap();
        }
        fs::write(folder.join("llm_response1.txt"), "print(int(input()) + int(input()))").unwrap();
        fs::write(folder.join("llm_response2.txt"), "print(3)").unwrap();
    }

    #[test]
    fn test_args_default_to_both() {
        let args = Args::parse_from(["covharness"]);
        assert_eq!(args.test_type, TestSelection::Both);
        assert_eq!(args.root, PathBuf::from("."));

        let args = Args::parse_from(["covharness", "2", "--workers", "8", "--engine", "docker"]);
        assert_eq!(args.test_type, TestSelection::Llm);
        assert_eq!(args.workers, Some(8));
        assert_eq!(args.engine, Some(EngineKind::Docker));

        assert!(Args::try_parse_from(["covharness", "3"]).is_err());
    }

    #[test]
    fn test_build_jobs_expands_sources_and_candidates() {
        let dir = TempDir::new().unwrap();
        write_apps_problem(dir.path(), "problem_001", true);
        write_apps_problem(dir.path(), "problem_002", false);
        let settings = RunSettings::new().with_base_dir(dir.path());

        let jobs = build_jobs(&settings, TestSelection::Both);
        // 2 problems × 2 candidates original, 1 problem × 2 candidates llm
        assert_eq!(jobs.len(), 6);
        assert!(jobs.iter().all(|j| j.problem.suite == Suite::Apps));
        assert_eq!(
            jobs.iter().filter(|j| j.test_source == TestSource::Llm).count(),
            2
        );

        let llm_only = build_jobs(&settings, TestSelection::Llm);
        assert_eq!(llm_only.len(), 2);
        assert_eq!(llm_only[0].problem.oracle.case_count(), 2);
    }

    #[test]
    fn test_malformed_problem_does_not_stop_siblings() {
        let dir = TempDir::new().unwrap();
        write_apps_problem(dir.path(), "problem_001", false);
        write_apps_problem(dir.path(), "problem_002", false);
        fs::write(
            dir.path().join("apps_problems/problem_001/test_cases.json"),
            r#"{"inputs": ["1"], "outputs": []}"#,
        )
        .unwrap();

        let settings = RunSettings::new().with_base_dir(dir.path());
        let jobs = build_jobs(&settings, TestSelection::Original);
        assert_eq!(jobs.len(), 2);
        assert!(jobs.iter().all(|j| j.problem.id == "problem_002"));
    }

    fn empty_response_jobs(dir: &Path) -> (RunSettings, Vec<EvaluationJob>) {
        write_apps_problem(dir, "problem_001", true);
        write_apps_problem(dir, "problem_002", false);
        let mut settings = RunSettings::new().with_base_dir(dir);
        settings.max_workers = 2;
        let jobs = build_jobs(&settings, TestSelection::Both)
            .into_iter()
            .map(|mut job| {
                job.candidate.text = String::new();
                job
            })
            .collect();
        (settings, jobs)
    }

    fn process_engine() -> Arc<ExecutionEngine> {
        Arc::new(ExecutionEngine::Process(engine::ProcessEngine::new(&Default::default())))
    }

    #[tokio::test]
    async fn test_run_jobs_sends_every_record() {
        let dir = TempDir::new().unwrap();
        let (settings, jobs) = empty_response_jobs(dir.path());
        let (tx, mut rx) = mpsc::channel(16);

        run_jobs(jobs, process_engine(), &settings, &tx, std::future::pending()).await;
        drop(tx);

        let mut received = 0;
        while let Some(record) = rx.recv().await {
            assert_eq!(record.verdict, covharness_common::types::Verdict::FailedIncomplete);
            received += 1;
        }
        assert_eq!(received, 6);
    }

    #[tokio::test]
    async fn test_run_jobs_stops_on_shutdown() {
        let dir = TempDir::new().unwrap();
        let (settings, jobs) = empty_response_jobs(dir.path());
        let (tx, mut rx) = mpsc::channel(16);

        run_jobs(jobs, process_engine(), &settings, &tx, std::future::ready(())).await;
        drop(tx);

        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_record_writer_writes_jsonl() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("records.jsonl");
        let sink = tokio::fs::File::create(&path).await.unwrap();
        let (tx, rx) = mpsc::channel(4);
        let writer = tokio::spawn(record_writer(sink, rx));

        let settings = RunSettings::new().with_base_dir(dir.path());
        write_apps_problem(dir.path(), "problem_001", false);
        let jobs = build_jobs(&settings, TestSelection::Original);
        for job in &jobs {
            let mut job = job.clone();
            job.candidate.text = String::new();
            tx.send(evaluate_isolated(job, process_engine(), 1000).await).await.unwrap();
        }
        drop(tx);

        let written = writer.await.unwrap().unwrap();
        assert_eq!(written.len(), 2);
        let loaded = report::load_records(&path).unwrap();
        assert_eq!(loaded, written);
    }
}
