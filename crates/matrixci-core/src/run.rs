//! Runs: one execution of all jobs triggered by a single event.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::RunId;
use crate::event::TriggerEvent;
use crate::job::JobReport;

/// Immutable facts about a run, shared with every job and reporter.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub run_id: RunId,
    pub workflow: String,
    pub delivery_id: String,
    pub repository: Option<String>,
    pub pull_request: Option<u64>,
    pub head_sha: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl RunInfo {
    pub fn from_event(workflow: impl Into<String>, event: &TriggerEvent) -> Self {
        let pr = event.pull_request_event();
        Self {
            run_id: RunId::new(),
            workflow: workflow.into(),
            delivery_id: event.delivery_id.clone(),
            repository: pr.map(|p| p.repository.clone()),
            pull_request: pr.map(|p| p.number),
            head_sha: pr.map(|p| p.head_sha.clone()),
            created_at: Utc::now(),
        }
    }
}

/// Overall run status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunStatus {
    Queued,
    Running,
    /// Every job succeeded.
    Succeeded,
    /// At least one job failed.
    Failed,
    /// Cancelled because a newer event for the same pull request arrived.
    /// No job results are aggregated.
    Superseded { by: RunId },
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Succeeded | RunStatus::Failed | RunStatus::Superseded { .. }
        )
    }

    pub fn label(&self) -> &'static str {
        match self {
            RunStatus::Queued => "queued",
            RunStatus::Running => "running",
            RunStatus::Succeeded => "succeeded",
            RunStatus::Failed => "failed",
            RunStatus::Superseded { .. } => "superseded",
        }
    }
}

/// Final report of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunReport {
    pub info: RunInfo,
    pub status: RunStatus,
    /// Job reports in expansion order. Empty for a superseded run.
    pub jobs: Vec<JobReport>,
    pub finished_at: DateTime<Utc>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.status == RunStatus::Succeeded
    }

    pub fn job(&self, name: &str) -> Option<&JobReport> {
        self.jobs.iter().find(|j| j.name == name)
    }
}
