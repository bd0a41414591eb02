mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};
use covharness_common::config::{DEFAULT_RECORDS_PATH, DEFAULT_RUNTIME_CONFIG_PATH};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "covharness-cli")]
#[command(about = "covharness CLI - Reports, candidate inspection and sandbox setup", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Render the coverage report from an evaluation records file
    Report {
        /// JSONL records written by the harness
        #[arg(short, long, default_value = DEFAULT_RECORDS_PATH)]
        records: PathBuf,

        /// Also write the table report to this file
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print a response file as the harness would execute it
    Normalize {
        /// Raw response file (e.g. llm_response1.txt)
        file: PathBuf,

        /// Only strip the code fence, skip re-indentation
        #[arg(long, default_value = "false")]
        extract_only: bool,
    },

    /// Build the Python sandbox image used by the Docker engine
    BuildImage {
        /// Runtime config naming the image and Python version
        #[arg(short, long, default_value = DEFAULT_RUNTIME_CONFIG_PATH)]
        config: PathBuf,

        /// Skip build cache
        #[arg(long, default_value = "false")]
        no_cache: bool,
    },

    /// Initialize a harness workspace
    Init {
        /// Workspace path
        #[arg(short, long, default_value = ".")]
        path: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Report { records, output } => {
            let text = commands::render_report(&records, output.as_deref())?;
            print!("{}", text);
        }
        Commands::Normalize { file, extract_only } => {
            let code = commands::normalize_file(&file, extract_only)?;
            println!("{}", code);
        }
        Commands::BuildImage { config, no_cache } => {
            commands::build_docker_image(&config, no_cache).await?;
        }
        Commands::Init { path } => {
            commands::init_project(&path).await?;
        }
    }

    Ok(())
}
