//! Status reporting back to the originating pull request.

use async_trait::async_trait;

use crate::Result;
use crate::job::{JobInstance, JobReport};
use crate::run::{RunInfo, RunReport};

/// Surfaces one check per job plus the overall run status.
#[async_trait]
pub trait StatusReporter: Send + Sync {
    /// Name of this reporter.
    fn name(&self) -> &'static str;

    /// A job moved to Running.
    async fn job_started(&self, _run: &RunInfo, _job: &JobInstance) -> Result<()> {
        Ok(())
    }

    /// A job reached a terminal state.
    async fn job_finished(&self, run: &RunInfo, report: &JobReport) -> Result<()>;

    /// The run reached a terminal state.
    async fn run_finished(&self, report: &RunReport) -> Result<()>;
}
