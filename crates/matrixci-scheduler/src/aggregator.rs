//! Run aggregation: a blocking join over job outcomes, then an AND-reduction.

use chrono::Utc;
use matrixci_core::JobId;
use matrixci_core::job::{JobInstance, JobReport, JobState, StepReport};
use matrixci_core::run::RunStatus;
use matrixci_core::workflow::EnvironmentId;
use std::collections::HashMap;
use tokio::sync::mpsc;
use tracing::{error, info};

use crate::job::JobOutcome;

/// AND-reduction over terminal job states: Succeeded only if every job
/// succeeded. There is no quorum.
pub fn aggregate<'a>(states: impl IntoIterator<Item = &'a JobState>) -> RunStatus {
    if states.into_iter().all(JobState::is_success) {
        RunStatus::Succeeded
    } else {
        RunStatus::Failed
    }
}

/// Result of joining all jobs of a run.
#[derive(Debug)]
pub enum RunVerdict {
    Completed {
        status: RunStatus,
        /// Reports in expansion order.
        jobs: Vec<JobReport>,
    },
    /// At least one job was cancelled; partial results are discarded.
    Cancelled,
}

struct ExpectedJob {
    id: JobId,
    name: String,
    template: String,
    environment: EnvironmentId,
    steps: Vec<String>,
}

/// Collects the outcome of every job of one run from a channel.
pub struct RunAggregator {
    expected: Vec<ExpectedJob>,
    rx: mpsc::Receiver<JobOutcome>,
}

impl RunAggregator {
    pub fn new(jobs: &[JobInstance], rx: mpsc::Receiver<JobOutcome>) -> Self {
        let expected = jobs
            .iter()
            .map(|job| ExpectedJob {
                id: job.id,
                name: job.name.clone(),
                template: job.template.clone(),
                environment: job.environment.clone(),
                steps: job.steps.iter().map(|s| s.name.clone()).collect(),
            })
            .collect();
        Self { expected, rx }
    }

    /// Wait until every expected job has reported, then aggregate.
    ///
    /// A job whose sender went away without reporting (its task panicked)
    /// counts as failed.
    pub async fn join(mut self) -> RunVerdict {
        let mut reports: HashMap<JobId, JobReport> = HashMap::new();
        let mut cancelled = false;

        while reports.len() < self.expected.len() && !cancelled {
            match self.rx.recv().await {
                Some(JobOutcome::Completed(report)) => {
                    reports.insert(report.job_id, report);
                }
                Some(JobOutcome::Cancelled { job_id }) => {
                    info!(%job_id, "Job cancelled, discarding run results");
                    cancelled = true;
                }
                None => break,
            }
        }

        if cancelled {
            return RunVerdict::Cancelled;
        }

        let jobs: Vec<JobReport> = self
            .expected
            .into_iter()
            .map(|expected| match reports.remove(&expected.id) {
                Some(report) => report,
                None => {
                    error!(job = %expected.name, "Job ended without reporting");
                    JobReport {
                        job_id: expected.id,
                        name: expected.name,
                        template: expected.template,
                        environment: expected.environment,
                        state: JobState::Failed {
                            started_at: None,
                            finished_at: Utc::now(),
                            failed_step: None,
                            exit_code: None,
                            message: "job ended without reporting a result".to_string(),
                        },
                        steps: expected.steps.into_iter().map(StepReport::skipped).collect(),
                    }
                }
            })
            .collect();

        let status = aggregate(jobs.iter().map(|j| &j.state));
        RunVerdict::Completed { status, jobs }
    }
}
