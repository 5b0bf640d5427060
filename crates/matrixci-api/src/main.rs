//! MatrixCI webhook server

use anyhow::Context;
use clap::Parser;
use matrixci_api::services::GitHubStatusReporter;
use matrixci_api::{AppState, routes};
use matrixci_config::{Settings, default_workflow, load_settings, load_workflow};
use matrixci_executor::provider_from_settings;
use matrixci_scheduler::{
    JobExecutor, LogReporter, RunOrchestrator, RunRegistry, TriggerDispatcher, WorkerPool,
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "matrixci-server")]
#[command(about = "MatrixCI webhook server", long_about = None)]
struct Args {
    /// Workflow file; the built-in workflow when unset
    #[arg(long, env = "MATRIXCI_WORKFLOW")]
    workflow: Option<PathBuf>,

    /// Settings file
    #[arg(long, env = "MATRIXCI_SETTINGS")]
    settings: Option<PathBuf>,

    /// Shared secret for webhook signatures
    #[arg(long, env = "MATRIXCI_WEBHOOK_SECRET", hide_env_values = true)]
    webhook_secret: Option<String>,

    /// Token for posting commit statuses
    #[arg(long, env = "MATRIXCI_GITHUB_TOKEN", hide_env_values = true)]
    github_token: Option<String>,

    /// Clone URL or local path to check out instead of the event's repository
    #[arg(long, env = "MATRIXCI_SOURCE")]
    source: Option<String>,

    /// Address to listen on
    #[arg(long, env = "MATRIXCI_ADDR", default_value = "0.0.0.0:3000")]
    addr: SocketAddr,

    /// Emit logs as JSON
    #[arg(long)]
    log_json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    if args.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    let workflow = match &args.workflow {
        Some(path) => load_workflow(path)
            .with_context(|| format!("Failed to load workflow {}", path.display()))?,
        None => default_workflow().context("Failed to parse built-in workflow")?,
    };
    let settings = match &args.settings {
        Some(path) => load_settings(path)
            .with_context(|| format!("Failed to load settings {}", path.display()))?,
        None => Settings::default(),
    };

    let source_dir = args
        .source
        .as_deref()
        .map(Path::new)
        .filter(|path| path.is_dir());
    let provider = provider_from_settings(&settings, source_dir)
        .context("Failed to set up environment provider")?;
    info!(
        provider = provider.name(),
        max_parallel = settings.max_parallel,
        workflow = %workflow.name,
        "Starting orchestrator"
    );

    let executor = JobExecutor::new(provider).with_job_timeout(settings.job_timeout);
    let mut orchestrator =
        RunOrchestrator::new(Arc::new(executor), WorkerPool::new(settings.max_parallel))
            .with_reporter(Arc::new(LogReporter));
    if let Some(token) = args.github_token {
        info!("Reporting commit statuses to GitHub");
        orchestrator = orchestrator.with_reporter(Arc::new(GitHubStatusReporter::new(token)));
    }

    let registry = RunRegistry::new().with_retention(settings.retained_runs);
    let mut dispatcher = TriggerDispatcher::new(workflow, orchestrator, registry)
        .with_delivery_window(settings.delivery_window);
    if let Some(source) = &args.source {
        dispatcher = dispatcher.with_source_url(source);
    }

    let mut state = AppState::new(dispatcher);
    if let Some(secret) = args.webhook_secret {
        state = state.with_webhook_secret(secret);
    } else {
        warn!("No webhook secret configured, signatures are not verified");
    }

    // Build router
    let app = routes::router(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        );

    info!("Starting server on {}", args.addr);

    let listener = TcpListener::bind(args.addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
