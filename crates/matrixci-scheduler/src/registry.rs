//! In-memory registry of runs and their latest status.

use chrono::{DateTime, Utc};
use matrixci_core::RunId;
use matrixci_core::job::JobReport;
use matrixci_core::run::{RunInfo, RunReport, RunStatus};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

/// What the registry knows about one run.
#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub info: RunInfo,
    pub status: RunStatus,
    pub jobs: Vec<JobReport>,
    pub finished_at: Option<DateTime<Utc>>,
}

/// Number of finished runs kept before the oldest are evicted.
pub const DEFAULT_RETAINED_RUNS: usize = 1_000;

/// Runs by id. Runs that have not finished are always kept; finished runs
/// beyond the retention limit are evicted oldest first.
#[derive(Debug, Clone)]
pub struct RunRegistry {
    runs: Arc<RwLock<HashMap<RunId, RunRecord>>>,
    retained: usize,
}

impl Default for RunRegistry {
    fn default() -> Self {
        Self {
            runs: Arc::default(),
            retained: DEFAULT_RETAINED_RUNS,
        }
    }
}

impl RunRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Keep at most `retained` finished runs.
    pub fn with_retention(mut self, retained: usize) -> Self {
        self.retained = retained;
        self
    }

    pub async fn insert(&self, info: RunInfo) {
        let record = RunRecord {
            info,
            status: RunStatus::Queued,
            jobs: Vec::new(),
            finished_at: None,
        };
        self.runs.write().await.insert(record.info.run_id, record);
    }

    pub async fn set_running(&self, run_id: RunId) {
        if let Some(record) = self.runs.write().await.get_mut(&run_id) {
            record.status = RunStatus::Running;
        }
    }

    /// Record the final report of a run.
    pub async fn complete(&self, report: RunReport) {
        let record = RunRecord {
            status: report.status,
            jobs: report.jobs,
            finished_at: Some(report.finished_at),
            info: report.info,
        };
        let mut runs = self.runs.write().await;
        runs.insert(record.info.run_id, record);
        evict_finished(&mut runs, self.retained);
    }

    pub async fn get(&self, run_id: RunId) -> Option<RunRecord> {
        self.runs.read().await.get(&run_id).cloned()
    }

    /// All runs, newest first.
    pub async fn list(&self) -> Vec<RunRecord> {
        let mut runs: Vec<_> = self.runs.read().await.values().cloned().collect();
        runs.sort_by(|a, b| {
            b.info
                .created_at
                .cmp(&a.info.created_at)
                .then_with(|| b.info.run_id.cmp(&a.info.run_id))
        });
        runs
    }
}

fn evict_finished(runs: &mut HashMap<RunId, RunRecord>, retained: usize) {
    let mut finished: Vec<(DateTime<Utc>, RunId)> = runs
        .values()
        .filter_map(|r| r.finished_at.map(|at| (at, r.info.run_id)))
        .collect();
    if finished.len() <= retained {
        return;
    }
    finished.sort();
    let excess = finished.len() - retained;
    for (_, run_id) in finished.into_iter().take(excess) {
        runs.remove(&run_id);
    }
    debug!(evicted = excess, "Evicted finished runs");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::pull_request;

    #[tokio::test]
    async fn test_record_lifecycle() {
        let registry = RunRegistry::new();
        let info = RunInfo::from_event("ci", &pull_request("d-1", 7, "opened"));
        let run_id = info.run_id;

        registry.insert(info.clone()).await;
        assert_eq!(registry.get(run_id).await.unwrap().status, RunStatus::Queued);

        registry.set_running(run_id).await;
        assert_eq!(registry.get(run_id).await.unwrap().status, RunStatus::Running);

        registry
            .complete(RunReport {
                info,
                status: RunStatus::Succeeded,
                jobs: vec![],
                finished_at: Utc::now(),
            })
            .await;
        let record = registry.get(run_id).await.unwrap();
        assert_eq!(record.status, RunStatus::Succeeded);
        assert!(record.finished_at.is_some());
    }

    #[tokio::test]
    async fn test_list_is_newest_first() {
        let registry = RunRegistry::new();
        let older = RunInfo::from_event("ci", &pull_request("d-1", 1, "opened"));
        let mut newer = RunInfo::from_event("ci", &pull_request("d-2", 1, "synchronize"));
        newer.created_at = older.created_at + chrono::Duration::seconds(1);

        registry.insert(older.clone()).await;
        registry.insert(newer.clone()).await;

        let ids: Vec<_> = registry.list().await.iter().map(|r| r.info.run_id).collect();
        assert_eq!(ids, vec![newer.run_id, older.run_id]);
    }

    fn finished(info: RunInfo, at: DateTime<Utc>) -> RunReport {
        RunReport {
            info,
            status: RunStatus::Succeeded,
            jobs: vec![],
            finished_at: at,
        }
    }

    #[tokio::test]
    async fn test_oldest_finished_runs_are_evicted() {
        let registry = RunRegistry::new().with_retention(2);
        let start = Utc::now();
        let infos: Vec<_> = (0..4)
            .map(|i| RunInfo::from_event("ci", &pull_request(&format!("d-{}", i), i, "opened")))
            .collect();
        let in_flight = RunInfo::from_event("ci", &pull_request("d-live", 9, "opened"));
        registry.insert(in_flight.clone()).await;

        for (i, info) in infos.iter().enumerate() {
            registry.insert(info.clone()).await;
            let at = start + chrono::Duration::seconds(i as i64);
            registry.complete(finished(info.clone(), at)).await;
        }

        assert!(registry.get(infos[0].run_id).await.is_none());
        assert!(registry.get(infos[1].run_id).await.is_none());
        assert!(registry.get(infos[2].run_id).await.is_some());
        assert!(registry.get(infos[3].run_id).await.is_some());
        // unfinished runs are never evicted
        assert_eq!(
            registry.get(in_flight.run_id).await.unwrap().status,
            RunStatus::Queued
        );
        assert_eq!(registry.list().await.len(), 3);
    }
}
