//! Live events emitted while a run executes.

use matrixci_core::JobId;
use matrixci_core::environment::LogLine;
use matrixci_core::run::RunStatus;
use matrixci_core::workflow::EnvironmentId;

#[derive(Debug, Clone)]
pub enum RunEvent {
    JobStarted {
        job_id: JobId,
        job: String,
        environment: EnvironmentId,
    },
    StepStarted {
        job: String,
        step: String,
    },
    StepLog {
        job: String,
        step: String,
        line: LogLine,
    },
    StepCompleted {
        job: String,
        step: String,
        success: bool,
    },
    JobCompleted {
        job: String,
        success: bool,
    },
    RunCompleted {
        status: RunStatus,
    },
}
