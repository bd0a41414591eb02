// CLI commands for operating the coverage harness
use anyhow::{bail, Context, Result};
use covharness_common::config::{
    RuntimeConfig, DEFAULT_RECORDS_PATH, DEFAULT_REPORT_PATH, DEFAULT_RUNTIME_CONFIG_PATH,
};
use covharness_common::normalize::{extract_code, normalize_response};
use covharness_common::report;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

const PYTHON_DOCKERFILE_PATH: &str = "dockerfiles/python/Dockerfile";
const COVERAGE_PACKAGE_VERSION: &str = "7.4.4";

/// Load runtime configuration, or defaults when the file is absent
fn load_runtime_config(config_path: &Path) -> Result<RuntimeConfig> {
    if !config_path.exists() {
        return Ok(RuntimeConfig::default());
    }

    let content = fs::read_to_string(config_path)
        .with_context(|| format!("Failed to read {}", config_path.display()))?;
    serde_json::from_str(&content)
        .with_context(|| format!("Failed to parse {}", config_path.display()))
}

/// Re-render the text report from a records file
pub fn render_report(records_path: &Path, output: Option<&Path>) -> Result<String> {
    let records = report::load_records(records_path)
        .with_context(|| format!("Failed to load records from {}", records_path.display()))?;

    if let Some(output) = output {
        report::write_report(&records, output)
            .with_context(|| format!("Failed to write {}", output.display()))?;
    }

    Ok(report::render(&records))
}

/// Normalize a raw response file the way the harness does before running it
pub fn normalize_file(path: &Path, extract_only: bool) -> Result<String> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;

    if extract_only {
        return Ok(extract_code(&raw));
    }
    normalize_response(&raw).with_context(|| format!("Cannot normalize {}", path.display()))
}

/// Generate the Python sandbox Dockerfile
fn generate_python_dockerfile(version: &str) -> String {
    format!(
        r#"# GENERATED BY covharness-cli - DO NOT EDIT
# Python sandbox for candidate execution under coverage
FROM python:{version}

ENV PYTHONUNBUFFERED=1 \
    PYTHONDONTWRITEBYTECODE=1 \
    PIP_NO_CACHE_DIR=1 \
    PIP_DISABLE_PIP_VERSION_CHECK=1

# Coverage backend is installed at build time; containers run without network
RUN pip install --no-cache-dir coverage=={coverage}

# Work directory is bind-mounted per evaluation
RUN useradd -m -u 1000 harness && \
    mkdir -p /work && \
    chown harness:harness /work

WORKDIR /work
USER harness
"#,
        version = version,
        coverage = COVERAGE_PACKAGE_VERSION
    )
}

/// Initialize a harness workspace
pub async fn init_project(path: &str) -> Result<()> {
    println!("🚀 Initializing covharness workspace at: {}", path);

    let project_path = Path::new(path);

    let dirs = ["config", "dockerfiles/python", "humaneval_problems", "apps_problems"];

    for dir in &dirs {
        let dir_path = project_path.join(dir);
        fs::create_dir_all(&dir_path)
            .with_context(|| format!("Failed to create directory: {}", dir))?;
        println!("  ✅ Created: {}", dir);
    }

    let runtime_path = project_path.join(DEFAULT_RUNTIME_CONFIG_PATH);
    let runtime = if runtime_path.exists() {
        println!("  ⏭  Kept existing: {}", DEFAULT_RUNTIME_CONFIG_PATH);
        load_runtime_config(&runtime_path)?
    } else {
        let runtime = RuntimeConfig::default();
        let json_content = serde_json::to_string_pretty(&runtime)?;
        fs::write(&runtime_path, json_content)
            .with_context(|| format!("Failed to write {}", runtime_path.display()))?;
        println!("  ✅ Created: {}", DEFAULT_RUNTIME_CONFIG_PATH);
        runtime
    };

    let dockerfile_path = project_path.join(PYTHON_DOCKERFILE_PATH);
    if !dockerfile_path.exists() {
        fs::write(&dockerfile_path, generate_python_dockerfile(&runtime.docker.python_version))
            .with_context(|| format!("Failed to write {}", dockerfile_path.display()))?;
        println!("  ✅ Created: {}", PYTHON_DOCKERFILE_PATH);
    }

    println!("✅ Workspace initialized successfully!");
    println!("\n📋 Next steps:");
    println!("  1. Add problem_* folders under humaneval_problems/ and apps_problems/");
    println!("  2. Build the sandbox image (optional): covharness-cli build-image");
    println!("  3. Run the harness: covharness both");
    println!("  4. Results: {} and {}", DEFAULT_RECORDS_PATH, DEFAULT_REPORT_PATH);

    Ok(())
}

/// Build the Python sandbox image named in the runtime config
pub async fn build_docker_image(config_path: &Path, no_cache: bool) -> Result<()> {
    let runtime = load_runtime_config(config_path)?;
    let image_latest = runtime.docker.image.clone();
    let repository = image_latest
        .split(':')
        .next()
        .unwrap_or(image_latest.as_str())
        .to_string();
    let image_versioned = format!("{}:{}-v1", repository, runtime.docker.python_version);

    println!("🐳 Building sandbox image: {}", image_latest);

    let dockerfile_path = PathBuf::from(PYTHON_DOCKERFILE_PATH);
    if !dockerfile_path.exists() {
        bail!(
            "Dockerfile not found at {}. Generate it first with the init command.",
            dockerfile_path.display()
        );
    }

    println!("📦 Building tags:");
    println!("  - {}", image_versioned);
    println!("  - {}", image_latest);

    let build_context = ".";
    println!("📂 Build context: {}", build_context);
    println!("📄 Dockerfile: {}", dockerfile_path.display());

    let mut docker_args = vec![
        "build".to_string(),
        "-t".to_string(),
        image_versioned.clone(),
        "-t".to_string(),
        image_latest.clone(),
        "-f".to_string(),
        dockerfile_path.to_string_lossy().to_string(),
    ];

    if no_cache {
        docker_args.push("--no-cache".to_string());
    }

    docker_args.push(build_context.to_string());

    println!("\n🔨 Running: docker {}", docker_args.join(" "));

    let status = Command::new("docker")
        .args(&docker_args)
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit())
        .status()
        .context("Failed to execute docker build. Is Docker installed and running?")?;

    if !status.success() {
        bail!("Docker build failed with exit code: {:?}", status.code());
    }

    println!("\n✅ Docker image built successfully!");
    println!("  - {}", image_versioned);
    println!("  - {}", image_latest);

    Ok(())
}
