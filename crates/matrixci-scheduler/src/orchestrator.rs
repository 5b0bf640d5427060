//! Run orchestrator - expands a workflow and runs its jobs to a verdict.

use chrono::Utc;
use matrixci_core::job::JobInstance;
use matrixci_core::reporter::StatusReporter;
use matrixci_core::run::{RunReport, RunStatus};
use matrixci_core::workflow::Workflow;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::aggregator::{RunAggregator, RunVerdict};
use crate::context::RunContext;
use crate::events::RunEvent;
use crate::expander::MatrixExpander;
use crate::job::{JobExecutor, JobOutcome};
use crate::pool::WorkerPool;

/// Orchestrates one run at a time per call to [`RunOrchestrator::execute`].
///
/// Jobs of a run are independent of each other and share the worker pool
/// with jobs of every other run.
#[derive(Clone)]
pub struct RunOrchestrator {
    executor: Arc<JobExecutor>,
    pool: WorkerPool,
    reporters: Vec<Arc<dyn StatusReporter>>,
}

impl RunOrchestrator {
    pub fn new(executor: Arc<JobExecutor>, pool: WorkerPool) -> Self {
        Self {
            executor,
            pool,
            reporters: Vec::new(),
        }
    }

    /// Add a status reporter notified about every job and run.
    pub fn with_reporter(mut self, reporter: Arc<dyn StatusReporter>) -> Self {
        self.reporters.push(reporter);
        self
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.pool
    }

    /// Execute a run, returning a channel of events and a handle to get the
    /// final report.
    pub fn execute(
        &self,
        workflow: &Workflow,
        ctx: RunContext,
    ) -> (mpsc::Receiver<RunEvent>, tokio::task::JoinHandle<RunReport>) {
        let (tx, rx) = mpsc::channel(100);
        let jobs = MatrixExpander::expand_workflow(workflow, &ctx.vars);
        let this = self.clone();

        let handle = tokio::spawn(async move { this.execute_inner(jobs, ctx, tx).await });

        (rx, handle)
    }

    async fn execute_inner(
        self,
        jobs: Vec<JobInstance>,
        ctx: RunContext,
        tx: mpsc::Sender<RunEvent>,
    ) -> RunReport {
        info!(
            run_id = %ctx.run_id(),
            workflow = %ctx.info.workflow,
            jobs = jobs.len(),
            "Run started"
        );

        let (outcome_tx, outcome_rx) = mpsc::channel(jobs.len().max(1));
        let aggregator = RunAggregator::new(&jobs, outcome_rx);

        let handles: Vec<_> = jobs
            .into_iter()
            .map(|job| {
                let executor = self.executor.clone();
                let reporters = self.reporters.clone();
                let ctx = ctx.clone();
                let events = tx.clone();
                let outcomes = outcome_tx.clone();
                self.pool.submit(async move {
                    if !ctx.cancel.is_cancelled() {
                        for reporter in &reporters {
                            if let Err(e) = reporter.job_started(&ctx.info, &job).await {
                                warn!(reporter = reporter.name(), error = %e, "Failed to report job start");
                            }
                        }
                    }

                    let outcome = executor.run(&ctx, job, &events).await;

                    if let JobOutcome::Completed(report) = &outcome {
                        for reporter in &reporters {
                            if let Err(e) = reporter.job_finished(&ctx.info, report).await {
                                warn!(reporter = reporter.name(), error = %e, "Failed to report job result");
                            }
                        }
                    }

                    let _ = outcomes.send(outcome).await;
                })
            })
            .collect();
        drop(outcome_tx);

        let verdict = aggregator.join().await;

        // Cancelled jobs may still be tearing down their environments.
        for handle in handles {
            if let Err(e) = handle.await {
                warn!(run_id = %ctx.run_id(), error = %e, "Job task ended abnormally");
            }
        }

        let (status, jobs) = match verdict {
            RunVerdict::Completed { status, jobs } => (status, jobs),
            RunVerdict::Cancelled => {
                // A cancelled job implies the signal fired.
                let by = ctx.cancel.superseded_by().unwrap_or(ctx.run_id());
                (RunStatus::Superseded { by }, Vec::new())
            }
        };

        info!(run_id = %ctx.run_id(), status = status.label(), "Run completed");

        let report = RunReport {
            info: ctx.info.clone(),
            status: status.clone(),
            jobs,
            finished_at: Utc::now(),
        };

        for reporter in &self.reporters {
            if let Err(e) = reporter.run_finished(&report).await {
                warn!(reporter = reporter.name(), error = %e, "Failed to report run result");
            }
        }

        let _ = tx.send(RunEvent::RunCompleted { status }).await;

        report
    }
}
