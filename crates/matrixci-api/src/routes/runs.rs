//! Run query endpoints.

use axum::extract::{Path, State};
use axum::routing::get;
use axum::{Json, Router};
use chrono::{DateTime, Utc};
use matrixci_core::RunId;
use matrixci_core::run::RunStatus;
use matrixci_scheduler::RunRecord;
use serde::Serialize;

use crate::AppState;
use crate::error::ApiError;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(list_runs))
        .route("/{run_id}", get(get_run))
}

/// One line of the run listing.
#[derive(Debug, Serialize)]
pub struct RunSummary {
    pub run_id: RunId,
    pub workflow: String,
    pub repository: Option<String>,
    pub pull_request: Option<u64>,
    pub head_sha: Option<String>,
    #[serde(flatten)]
    pub status: RunStatus,
    pub jobs_total: usize,
    pub jobs_passed: usize,
    pub created_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl From<RunRecord> for RunSummary {
    fn from(record: RunRecord) -> Self {
        Self {
            run_id: record.info.run_id,
            workflow: record.info.workflow,
            repository: record.info.repository,
            pull_request: record.info.pull_request,
            head_sha: record.info.head_sha,
            status: record.status,
            jobs_total: record.jobs.len(),
            jobs_passed: record.jobs.iter().filter(|j| j.passed()).count(),
            created_at: record.info.created_at,
            finished_at: record.finished_at,
        }
    }
}

async fn list_runs(State(state): State<AppState>) -> Json<Vec<RunSummary>> {
    let runs = state.registry.list().await;
    Json(runs.into_iter().map(RunSummary::from).collect())
}

async fn get_run(
    State(state): State<AppState>,
    Path(run_id): Path<String>,
) -> Result<Json<RunRecord>, ApiError> {
    let run_id: RunId = run_id
        .parse()
        .map_err(|_| ApiError::BadRequest(format!("invalid run id: {}", run_id)))?;

    state
        .registry
        .get(run_id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("run {} not found", run_id)))
}
