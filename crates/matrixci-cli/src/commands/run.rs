//! Local run execution command.

use anyhow::{Context, Result};
use matrixci_config::{Settings, load_settings};
use matrixci_core::environment::LogStream;
use matrixci_core::event::{PullRequestEvent, TriggerEvent};
use matrixci_core::job::{JobReport, JobState};
use matrixci_core::run::RunStatus;
use matrixci_executor::provider_from_settings;
use matrixci_scheduler::{
    DispatchOutcome, JobExecutor, LogReporter, RunEvent, RunOrchestrator, RunRegistry,
    TriggerDispatcher, WorkerPool,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

use super::resolve_workflow;

/// The synthesised pull request event to run for.
pub struct RunOptions {
    pub source: PathBuf,
    pub sha: Option<String>,
    pub pr: u64,
    pub action: String,
}

/// Run a workflow locally against the source repository.
pub async fn run_local(
    workflow: Option<&Path>,
    settings: Option<&Path>,
    options: RunOptions,
) -> Result<()> {
    let source = options
        .source
        .canonicalize()
        .with_context(|| format!("Failed to resolve source: {}", options.source.display()))?;
    let workflow = resolve_workflow(workflow, &source)?;
    let settings = match settings {
        Some(path) => load_settings(path)
            .with_context(|| format!("Failed to load settings: {}", path.display()))?,
        None => Settings::default(),
    };

    let head_sha = match options.sha {
        Some(sha) => sha,
        None => {
            let sha = head_commit(&source).await?;
            debug!(sha = %sha, "Resolved HEAD of source repository");
            sha
        }
    };

    let event = TriggerEvent::pull_request(
        uuid::Uuid::new_v4().to_string(),
        PullRequestEvent {
            number: options.pr,
            action: options.action,
            repository: repository_name(&source),
            head_sha,
            head_ref: None,
            head_clone_url: None,
        },
    );

    let provider = provider_from_settings(&settings, Some(source.as_path()))
        .context("Failed to set up environment provider")?;

    println!("Running workflow: {}", workflow.name);
    println!("Provider: {}", provider.name());
    println!("Source: {}", source.display());

    let executor = JobExecutor::new(provider).with_job_timeout(settings.job_timeout);
    let orchestrator =
        RunOrchestrator::new(Arc::new(executor), WorkerPool::new(settings.max_parallel))
            .with_reporter(Arc::new(LogReporter));
    let dispatcher = TriggerDispatcher::new(workflow, orchestrator, RunRegistry::new())
        .with_source_url(source.to_string_lossy());

    let handle = match dispatcher.dispatch(event).await {
        DispatchOutcome::Started(handle) => handle,
        DispatchOutcome::Ignored | DispatchOutcome::Duplicate => {
            anyhow::bail!("Event does not trigger workflow '{}'", dispatcher.workflow().name);
        }
    };

    info!(run_id = %handle.run_id, pr = options.pr, "Dispatched local run");
    println!("\n--- Starting run {} ---\n", handle.run_id);

    let (mut events, done) = handle.into_parts();
    while let Some(event) = events.recv().await {
        if let Some(line) = render(&event) {
            println!("{}", line);
        }
    }

    let report = done.await.context("Run task failed")?;

    println!("\n--- Job Summary ---");
    for job in &report.jobs {
        println!("  {} - {}", job.name, summarize(job));
    }

    match report.status {
        RunStatus::Succeeded => {
            println!("\n✓ Run succeeded!");
            Ok(())
        }
        status => anyhow::bail!("Run {}", status.label()),
    }
}

fn render(event: &RunEvent) -> Option<String> {
    let line = match event {
        RunEvent::JobStarted {
            job, environment, ..
        } => format!("▶ Job '{}' started on {}", job, environment),
        RunEvent::StepStarted { job, step } => format!("  [{}] ▶ {}", job, step),
        RunEvent::StepLog { job, line, .. } => {
            let stream_marker = match line.stream {
                LogStream::Stdout => " ",
                LogStream::Stderr => "!",
                LogStream::System => "*",
            };
            format!("  [{}]{} {}", job, stream_marker, line.content)
        }
        RunEvent::StepCompleted {
            job,
            step,
            success: false,
        } => format!("  [{}] ✗ {}", job, step),
        RunEvent::StepCompleted { .. } => return None,
        RunEvent::JobCompleted { job, success: true } => {
            format!("✓ Job '{}' succeeded\n", job)
        }
        RunEvent::JobCompleted { job, success: false } => format!("✗ Job '{}' failed\n", job),
        RunEvent::RunCompleted { status } => format!("--- Run {} ---", status.label()),
    };
    Some(line)
}

fn summarize(job: &JobReport) -> String {
    match &job.state {
        JobState::Succeeded { .. } => "✓ succeeded".to_string(),
        JobState::Failed {
            failed_step: Some(step),
            message,
            ..
        } => format!("✗ failed at '{}': {}", step, message),
        JobState::Failed { message, .. } => format!("✗ failed: {}", message),
        JobState::Pending => "○ pending".to_string(),
        JobState::Running { .. } => "▶ running".to_string(),
    }
}

/// Repository name for the synthesised event: `local/<directory>`.
fn repository_name(source: &Path) -> String {
    let name = source
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "source".to_string());
    format!("local/{}", name)
}

async fn head_commit(source: &Path) -> Result<String> {
    let output = tokio::process::Command::new("git")
        .args(["rev-parse", "HEAD"])
        .current_dir(source)
        .output()
        .await
        .context("Failed to run git")?;
    if !output.status.success() {
        anyhow::bail!(
            "Could not determine HEAD of {}; pass --sha",
            source.display()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}
