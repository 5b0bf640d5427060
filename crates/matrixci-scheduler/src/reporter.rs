//! Status reporter that writes checks to the log.

use async_trait::async_trait;
use matrixci_core::Result;
use matrixci_core::job::{JobInstance, JobReport, JobState};
use matrixci_core::reporter::StatusReporter;
use matrixci_core::run::{RunInfo, RunReport};
use tracing::{info, warn};

/// Reports each job check and the run status as structured log events.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogReporter;

#[async_trait]
impl StatusReporter for LogReporter {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn job_started(&self, run: &RunInfo, job: &JobInstance) -> Result<()> {
        info!(run_id = %run.run_id, check = %job.name, state = "pending", "Check started");
        Ok(())
    }

    async fn job_finished(&self, run: &RunInfo, report: &JobReport) -> Result<()> {
        match &report.state {
            JobState::Failed {
                failed_step,
                exit_code,
                message,
                ..
            } => warn!(
                run_id = %run.run_id,
                check = %report.name,
                state = "failure",
                step = failed_step.as_deref().unwrap_or("-"),
                ?exit_code,
                message = %message,
                "Check failed"
            ),
            state => info!(
                run_id = %run.run_id,
                check = %report.name,
                state = state.label(),
                steps = report.executed_steps(),
                "Check finished"
            ),
        }
        Ok(())
    }

    async fn run_finished(&self, report: &RunReport) -> Result<()> {
        let passed = report.jobs.iter().filter(|j| j.passed()).count();
        info!(
            run_id = %report.info.run_id,
            status = report.status.label(),
            passed,
            total = report.jobs.len(),
            "Run status"
        );
        Ok(())
    }
}
