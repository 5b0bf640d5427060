//! Trigger dispatcher: filters events and starts one run per matching delivery.

use chrono::Utc;
use matrixci_core::RunId;
use matrixci_core::environment::SourceSpec;
use matrixci_core::event::TriggerEvent;
use matrixci_core::run::{RunInfo, RunReport, RunStatus};
use matrixci_core::workflow::Workflow;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, oneshot};
use tracing::{debug, error, info};

use crate::context::{CancelHandle, RunContext, cancellation};
use crate::events::RunEvent;
use crate::orchestrator::RunOrchestrator;
use crate::registry::RunRegistry;

/// What happened to a dispatched event.
#[derive(Debug)]
pub enum DispatchOutcome {
    /// The event matches no trigger of the workflow.
    Ignored,
    /// A run was already started for this delivery.
    Duplicate,
    Started(RunHandle),
}

impl DispatchOutcome {
    pub fn run_id(&self) -> Option<RunId> {
        match self {
            DispatchOutcome::Started(handle) => Some(handle.run_id),
            _ => None,
        }
    }
}

/// A started run.
#[derive(Debug)]
pub struct RunHandle {
    pub run_id: RunId,
    /// Live events; dropping the receiver does not affect the run.
    pub events: mpsc::Receiver<RunEvent>,
    done: oneshot::Receiver<RunReport>,
}

impl RunHandle {
    /// Wait for the final report, discarding live events.
    pub async fn wait(self) -> Option<RunReport> {
        drop(self.events);
        self.done.await.ok()
    }

    /// Split into the event stream and the final report.
    pub fn into_parts(self) -> (mpsc::Receiver<RunEvent>, oneshot::Receiver<RunReport>) {
        (self.events, self.done)
    }
}

/// Number of recent delivery ids remembered for redelivery detection.
pub const DEFAULT_DELIVERY_WINDOW: usize = 10_000;

/// The most recent delivery ids, oldest forgotten first.
struct DeliveryWindow {
    order: VecDeque<String>,
    ids: HashSet<String>,
    capacity: usize,
}

impl DeliveryWindow {
    fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::new(),
            ids: HashSet::new(),
            capacity: capacity.max(1),
        }
    }

    /// Remember `id`; false if it is already in the window.
    fn insert(&mut self, id: &str) -> bool {
        if self.ids.contains(id) {
            return false;
        }
        if self.order.len() == self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
        self.order.push_back(id.to_string());
        self.ids.insert(id.to_string());
        true
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.order.len()
    }
}

struct DispatchState {
    /// Delivery ids that recently started a run.
    seen: DeliveryWindow,
    /// Runs in flight, by pull request.
    in_flight: HashMap<String, (RunId, CancelHandle)>,
}

impl DispatchState {
    fn new(window: usize) -> Self {
        Self {
            seen: DeliveryWindow::new(window),
            in_flight: HashMap::new(),
        }
    }
}

/// Starts runs of one workflow for the events that trigger it.
pub struct TriggerDispatcher {
    workflow: Arc<Workflow>,
    orchestrator: RunOrchestrator,
    registry: RunRegistry,
    source_url: Option<String>,
    state: Arc<Mutex<DispatchState>>,
}

impl TriggerDispatcher {
    pub fn new(workflow: Workflow, orchestrator: RunOrchestrator, registry: RunRegistry) -> Self {
        Self {
            workflow: Arc::new(workflow),
            orchestrator,
            registry,
            source_url: None,
            state: Arc::new(Mutex::new(DispatchState::new(DEFAULT_DELIVERY_WINDOW))),
        }
    }

    /// Remember this many recent delivery ids for redelivery detection.
    pub fn with_delivery_window(mut self, window: usize) -> Self {
        self.state = Arc::new(Mutex::new(DispatchState::new(window)));
        self
    }

    /// Check out from this URL or path instead of the event's repository.
    pub fn with_source_url(mut self, url: impl Into<String>) -> Self {
        self.source_url = Some(url.into());
        self
    }

    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }

    pub fn registry(&self) -> &RunRegistry {
        &self.registry
    }

    pub fn orchestrator(&self) -> &RunOrchestrator {
        &self.orchestrator
    }

    /// Dispatch one event.
    ///
    /// Events that match no trigger start nothing. A redelivered event is
    /// recognised by its delivery id, within the window of recent deliveries,
    /// and starts nothing. A pull request event
    /// supersedes the run in flight for the same pull request.
    pub async fn dispatch(&self, event: TriggerEvent) -> DispatchOutcome {
        if !self.workflow.is_triggered_by(&event) {
            debug!(
                event = event.name(),
                delivery = %event.delivery_id,
                "Event matches no trigger, ignoring"
            );
            return DispatchOutcome::Ignored;
        }

        let mut state = self.state.lock().await;
        if !state.seen.insert(&event.delivery_id) {
            info!(delivery = %event.delivery_id, "Duplicate delivery, ignoring");
            return DispatchOutcome::Duplicate;
        }

        let info = RunInfo::from_event(&self.workflow.name, &event);
        let run_id = info.run_id;
        let (cancel, signal) = cancellation();

        if let Some(key) = event.supersession_key() {
            if let Some((previous, handle)) = state.in_flight.insert(key.clone(), (run_id, cancel)) {
                info!(run_id = %previous, superseded_by = %run_id, pr = %key, "Superseding run");
                handle.cancel(run_id);
            }
        }
        drop(state);

        let source = self.source_for(&event);
        self.registry.insert(info.clone()).await;
        self.registry.set_running(run_id).await;

        info!(
            run_id = %run_id,
            delivery = %event.delivery_id,
            sha = event.head_sha().unwrap_or("-"),
            "Starting run"
        );

        let ctx = RunContext::new(info.clone(), source, signal);
        let (events, join) = self.orchestrator.execute(&self.workflow, ctx);
        let (done_tx, done_rx) = oneshot::channel();

        let registry = self.registry.clone();
        let state = self.state.clone();
        let key = event.supersession_key();
        tokio::spawn(async move {
            let report = match join.await {
                Ok(report) => report,
                Err(e) => {
                    error!(run_id = %run_id, error = %e, "Run task failed");
                    RunReport {
                        info,
                        status: RunStatus::Failed,
                        jobs: Vec::new(),
                        finished_at: Utc::now(),
                    }
                }
            };

            if let Some(key) = key {
                let mut state = state.lock().await;
                if state.in_flight.get(&key).is_some_and(|(id, _)| *id == run_id) {
                    state.in_flight.remove(&key);
                }
            }

            registry.complete(report.clone()).await;
            let _ = done_tx.send(report);
        });

        DispatchOutcome::Started(RunHandle {
            run_id,
            events,
            done: done_rx,
        })
    }

    /// Where jobs check out from: the configured override, else the
    /// repository holding the head commit (a fork's own clone URL for pull
    /// requests opened from forks).
    fn source_for(&self, event: &TriggerEvent) -> Option<SourceSpec> {
        let sha = event.head_sha().map(str::to_string);
        let url = match (&self.source_url, event.pull_request_event()) {
            (Some(url), _) => url.clone(),
            (None, Some(pr)) => match &pr.head_clone_url {
                Some(url) => url.clone(),
                None if !pr.repository.is_empty() => {
                    format!("https://github.com/{}.git", pr.repository)
                }
                None => return None,
            },
            (None, None) => return None,
        };
        Some(SourceSpec { url, sha })
    }
}
