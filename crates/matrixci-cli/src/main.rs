//! MatrixCI CLI tool.

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

mod commands;

#[derive(Parser)]
#[command(name = "matrixci")]
#[command(about = "Build-matrix CI for pull requests", long_about = None)]
struct Cli {
    /// Emit logs as JSON
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a workflow file
    Validate {
        /// Path to the workflow file
        #[arg(env = "MATRIXCI_WORKFLOW", default_value = "matrixci.kdl")]
        path: PathBuf,
    },
    /// Show the job instances a workflow expands to
    Expand {
        /// Workflow file; matrixci.kdl or the built-in workflow when unset
        #[arg(long, env = "MATRIXCI_WORKFLOW")]
        workflow: Option<PathBuf>,
        /// Print instances as JSON
        #[arg(long)]
        json: bool,
    },
    /// Run a workflow locally for a synthesised pull request event
    Run {
        /// Workflow file; matrixci.kdl or the built-in workflow when unset
        #[arg(long, env = "MATRIXCI_WORKFLOW")]
        workflow: Option<PathBuf>,
        /// Settings file
        #[arg(long, env = "MATRIXCI_SETTINGS")]
        settings: Option<PathBuf>,
        /// Repository to check out
        #[arg(long, env = "MATRIXCI_SOURCE", default_value = ".")]
        source: PathBuf,
        /// Head commit; HEAD of the source repository when unset
        #[arg(long)]
        sha: Option<String>,
        /// Pull request number
        #[arg(long, default_value = "1")]
        pr: u64,
        /// Pull request activity type
        #[arg(long, default_value = "opened")]
        action: String,
    },
    /// Print the built-in workflow
    DefaultWorkflow,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
    }

    match cli.command {
        Commands::Validate { path } => {
            commands::validate(&path)?;
        }
        Commands::Expand { workflow, json } => {
            commands::expand::expand(workflow.as_deref(), json)?;
        }
        Commands::Run {
            workflow,
            settings,
            source,
            sha,
            pr,
            action,
        } => {
            let options = commands::run::RunOptions {
                source,
                sha,
                pr,
                action,
            };
            commands::run::run_local(workflow.as_deref(), settings.as_deref(), options).await?;
        }
        Commands::DefaultWorkflow => {
            print!("{}", matrixci_config::DEFAULT_WORKFLOW.trim_start());
        }
    }

    Ok(())
}
