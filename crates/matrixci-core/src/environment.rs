//! Environment provider trait and step execution types.
//!
//! Providers hand out isolated, ephemeral execution contexts (a scratch
//! directory, a container, ...) that run the steps of exactly one job.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::workflow::{EnvironmentId, StepAction};
use crate::{JobId, Result, RunId};

/// Where the checkout step fetches source from.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceSpec {
    /// Clone URL or local path.
    pub url: String,
    /// Revision to check out; the default branch head when absent.
    pub sha: Option<String>,
}

/// Per-step inputs owned by the running job.
#[derive(Debug, Clone)]
pub struct StepContext {
    pub run_id: RunId,
    pub job_id: JobId,
    pub job_name: String,
    pub step_name: String,
    /// Environment variables for the external command.
    pub env: HashMap<String, String>,
    pub source: Option<SourceSpec>,
}

/// A line of output forwarded from an external tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLine {
    pub timestamp: DateTime<Utc>,
    pub stream: LogStream,
    pub content: String,
}

impl LogLine {
    pub fn new(stream: LogStream, content: impl Into<String>) -> Self {
        Self {
            timestamp: Utc::now(),
            stream,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(LogStream::System, content)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogStream {
    Stdout,
    Stderr,
    System,
}

/// Binary outcome of one external action, plus whatever it printed.
#[derive(Debug, Clone, Default)]
pub struct StepOutcome {
    /// Exit code; `None` when the process was killed by a signal.
    pub exit_code: Option<i32>,
    pub logs: Vec<LogLine>,
}

impl StepOutcome {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Provisions environments for job instances.
#[async_trait]
pub trait EnvironmentProvider: Send + Sync {
    /// Name of this provider.
    fn name(&self) -> &'static str;

    /// Whether this provider can provision the given environment.
    fn supports(&self, env: &EnvironmentId) -> bool;

    /// Acquire a fresh environment exclusively for one job.
    async fn provision(&self, env: &EnvironmentId, job_id: JobId) -> Result<Box<dyn Environment>>;
}

/// An acquired execution context. Owned by exactly one job.
#[async_trait]
pub trait Environment: Send {
    /// The environment identifier this context was provisioned for.
    fn id(&self) -> &EnvironmentId;

    /// Provider-specific handle (directory path, container id).
    fn handle(&self) -> &str;

    /// Run one step action to completion.
    ///
    /// An `Err` means the action could not be started at all; a started action
    /// reports failure through its exit code.
    async fn execute(&mut self, action: &StepAction, ctx: &StepContext) -> Result<StepOutcome>;

    /// Release the environment. Consumes it so it cannot be torn down twice.
    async fn teardown(self: Box<Self>) -> Result<()>;
}
