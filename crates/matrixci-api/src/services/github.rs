//! GitHub commit status reporting.

use async_trait::async_trait;
use matrixci_core::job::{JobInstance, JobReport, JobState};
use matrixci_core::reporter::StatusReporter;
use matrixci_core::run::{RunInfo, RunReport, RunStatus};
use serde::Serialize;
use tracing::debug;

const DEFAULT_API_URL: &str = "https://api.github.com";
const CONTEXT_PREFIX: &str = "matrixci";

/// State of a commit status, as GitHub spells it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitState {
    Pending,
    Success,
    Failure,
    Error,
}

/// Body of `POST /repos/{owner}/{repo}/statuses/{sha}`.
#[derive(Debug, Clone, Serialize)]
pub struct CommitStatus {
    pub state: CommitState,
    pub context: String,
    pub description: String,
}

impl CommitStatus {
    /// Check for a job that has just started.
    pub fn pending(job: &JobInstance) -> Self {
        Self {
            state: CommitState::Pending,
            context: format!("{}/{}", CONTEXT_PREFIX, job.name),
            description: format!("Running on {}", job.environment),
        }
    }

    /// Check for a finished job.
    pub fn for_job(report: &JobReport) -> Self {
        let (state, description) = match &report.state {
            JobState::Succeeded { .. } => (CommitState::Success, "Passed".to_string()),
            JobState::Failed {
                failed_step: Some(step),
                ..
            } => (CommitState::Failure, format!("Failed at step '{}'", step)),
            JobState::Failed { message, .. } => (CommitState::Error, truncate(message)),
            other => (CommitState::Pending, other.label().to_string()),
        };
        Self {
            state,
            context: format!("{}/{}", CONTEXT_PREFIX, report.name),
            description,
        }
    }

    /// Overall status of a run; superseded runs post nothing.
    pub fn for_run(report: &RunReport) -> Option<Self> {
        let passed = report.jobs.iter().filter(|j| j.passed()).count();
        let total = report.jobs.len();
        let state = match report.status {
            RunStatus::Succeeded => CommitState::Success,
            RunStatus::Failed => CommitState::Failure,
            RunStatus::Superseded { .. } => return None,
            RunStatus::Queued | RunStatus::Running => CommitState::Pending,
        };
        Some(Self {
            state,
            context: CONTEXT_PREFIX.to_string(),
            description: format!("{}/{} jobs passed", passed, total),
        })
    }
}

// GitHub rejects descriptions longer than 140 characters.
fn truncate(message: &str) -> String {
    message.chars().take(140).collect()
}

/// GitHub API error.
#[derive(Debug, thiserror::Error)]
pub enum GitHubError {
    #[error("Request failed: {0}")]
    Request(String),

    #[error("API error: {0}")]
    Api(String),
}

impl From<GitHubError> for matrixci_core::Error {
    fn from(err: GitHubError) -> Self {
        matrixci_core::Error::Internal(err.to_string())
    }
}

/// Posts one commit status per job, plus one for the run.
pub struct GitHubStatusReporter {
    client: reqwest::Client,
    access_token: String,
    api_url: String,
}

impl GitHubStatusReporter {
    pub fn new(access_token: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            access_token,
            api_url: DEFAULT_API_URL.to_string(),
        }
    }

    /// Talk to a GitHub Enterprise instance instead of github.com.
    pub fn with_api_url(mut self, url: impl Into<String>) -> Self {
        self.api_url = url.into().trim_end_matches('/').to_string();
        self
    }

    /// Create a commit status on `sha` in `repository` (owner/name).
    pub async fn create_status(
        &self,
        repository: &str,
        sha: &str,
        status: &CommitStatus,
    ) -> Result<(), GitHubError> {
        let url = format!("{}/repos/{}/statuses/{}", self.api_url, repository, sha);

        let response = self
            .client
            .post(&url)
            .header("Authorization", format!("Bearer {}", self.access_token))
            .header("User-Agent", "MatrixCI")
            .header("Accept", "application/vnd.github+json")
            .json(status)
            .send()
            .await
            .map_err(|e| GitHubError::Request(e.to_string()))?;

        if !response.status().is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(GitHubError::Api(format!(
                "Failed to create status {}: {}",
                status.context, text
            )));
        }

        debug!(repository, sha, context = %status.context, "Posted commit status");
        Ok(())
    }

    async fn post(&self, run: &RunInfo, status: CommitStatus) -> matrixci_core::Result<()> {
        let (Some(repository), Some(sha)) = (&run.repository, &run.head_sha) else {
            return Ok(());
        };
        Ok(self.create_status(repository, sha, &status).await?)
    }
}

#[async_trait]
impl StatusReporter for GitHubStatusReporter {
    fn name(&self) -> &'static str {
        "github"
    }

    async fn job_started(&self, run: &RunInfo, job: &JobInstance) -> matrixci_core::Result<()> {
        self.post(run, CommitStatus::pending(job)).await
    }

    async fn job_finished(&self, run: &RunInfo, report: &JobReport) -> matrixci_core::Result<()> {
        self.post(run, CommitStatus::for_job(report)).await
    }

    async fn run_finished(&self, report: &RunReport) -> matrixci_core::Result<()> {
        match CommitStatus::for_run(report) {
            Some(status) => self.post(&report.info, status).await,
            None => Ok(()),
        }
    }
}
