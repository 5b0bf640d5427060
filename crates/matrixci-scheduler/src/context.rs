//! Run context and cooperative cancellation.

use matrixci_config::VariableContext;
use matrixci_core::RunId;
use matrixci_core::environment::SourceSpec;
use matrixci_core::run::RunInfo;
use tokio::sync::watch;

/// Everything a job needs to know about the run it belongs to.
///
/// Passed explicitly to each job executor; there is no ambient "current run".
#[derive(Debug, Clone)]
pub struct RunContext {
    pub info: RunInfo,
    /// Run-level variables; job-level values are layered on at expansion.
    pub vars: VariableContext,
    /// Where checkout steps fetch from.
    pub source: Option<SourceSpec>,
    pub cancel: CancelSignal,
}

impl RunContext {
    pub fn new(info: RunInfo, source: Option<SourceSpec>, cancel: CancelSignal) -> Self {
        let mut vars = VariableContext::for_run(&info);
        vars.populate_env();
        Self {
            info,
            vars,
            source,
            cancel,
        }
    }

    pub fn run_id(&self) -> RunId {
        self.info.run_id
    }
}

/// Create a linked cancel handle and signal.
pub fn cancellation() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(None);
    (CancelHandle { tx }, CancelSignal { rx })
}

/// Owner side: cancels the run, recording which run superseded it.
#[derive(Debug)]
pub struct CancelHandle {
    tx: watch::Sender<Option<RunId>>,
}

impl CancelHandle {
    pub fn cancel(&self, superseded_by: RunId) {
        self.tx.send_replace(Some(superseded_by));
    }
}

/// Observer side, cloned into every job of the run.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    rx: watch::Receiver<Option<RunId>>,
}

impl CancelSignal {
    /// A signal that never fires.
    pub fn never() -> Self {
        let (_tx, rx) = watch::channel(None);
        Self { rx }
    }

    /// The superseding run, if the run has been cancelled.
    pub fn superseded_by(&self) -> Option<RunId> {
        *self.rx.borrow()
    }

    pub fn is_cancelled(&self) -> bool {
        self.superseded_by().is_some()
    }

    /// Resolve once the run is cancelled. Pends forever if the handle is
    /// dropped without cancelling.
    pub async fn cancelled(&mut self) -> RunId {
        loop {
            if let Some(by) = *self.rx.borrow_and_update() {
                return by;
            }
            if self.rx.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}
