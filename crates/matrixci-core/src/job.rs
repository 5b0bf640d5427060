//! Job instances, job states and job reports.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::JobId;
use crate::workflow::{EnvironmentId, Step};

/// The matrix value a job instance was expanded from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixValue {
    pub key: String,
    pub value: String,
}

/// One concrete job: a template bound to a single environment.
///
/// Steps are owned by value; no two instances share a step list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobInstance {
    pub id: JobId,
    /// Display name, e.g. "build (ubuntu-latest)".
    pub name: String,
    /// Name of the template this instance came from.
    pub template: String,
    pub environment: EnvironmentId,
    pub matrix: Option<MatrixValue>,
    pub steps: Vec<Step>,
    /// Merged workflow and job environment variables.
    pub env: HashMap<String, String>,
}

/// Lifecycle of a job: Pending -> Running -> {Succeeded, Failed}.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Pending,
    Running {
        started_at: DateTime<Utc>,
    },
    Succeeded {
        started_at: DateTime<Utc>,
        finished_at: DateTime<Utc>,
    },
    Failed {
        started_at: Option<DateTime<Utc>>,
        finished_at: DateTime<Utc>,
        /// Step that failed; `None` when the environment could not be provisioned.
        failed_step: Option<String>,
        exit_code: Option<i32>,
        message: String,
    },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Succeeded { .. } | JobState::Failed { .. })
    }

    pub fn is_success(&self) -> bool {
        matches!(self, JobState::Succeeded { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            JobState::Pending => "pending",
            JobState::Running { .. } => "running",
            JobState::Succeeded { .. } => "succeeded",
            JobState::Failed { .. } => "failed",
        }
    }
}

/// Outcome of one step.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum StepStatus {
    Succeeded,
    Failed {
        exit_code: Option<i32>,
        message: String,
    },
    /// Never executed because an earlier step failed.
    Skipped,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepReport {
    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            status: StepStatus::Skipped,
            started_at: None,
            finished_at: None,
        }
    }
}

/// Terminal report of a job, consumed by the run aggregator and reporters.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobReport {
    pub job_id: JobId,
    pub name: String,
    pub template: String,
    pub environment: EnvironmentId,
    pub state: JobState,
    pub steps: Vec<StepReport>,
}

impl JobReport {
    pub fn passed(&self) -> bool {
        self.state.is_success()
    }

    /// Number of steps that actually ran.
    pub fn executed_steps(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status != StepStatus::Skipped)
            .count()
    }
}
