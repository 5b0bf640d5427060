//! Run scheduling for MatrixCI.
//!
//! Turns trigger events into runs: expands job templates over their matrix
//! axes, executes the resulting jobs on a bounded worker pool and joins
//! their terminal states into a run status.

pub mod aggregator;
pub mod context;
pub mod dispatcher;
pub mod events;
pub mod expander;
pub mod job;
pub mod orchestrator;
pub mod pool;
pub mod registry;
pub mod reporter;

#[cfg(test)]
pub(crate) mod testing;

pub use aggregator::{RunAggregator, RunVerdict, aggregate};
pub use context::{CancelHandle, CancelSignal, RunContext, cancellation};
pub use dispatcher::{DispatchOutcome, RunHandle, TriggerDispatcher};
pub use events::RunEvent;
pub use expander::MatrixExpander;
pub use job::{JobExecutor, JobOutcome};
pub use orchestrator::RunOrchestrator;
pub use pool::WorkerPool;
pub use registry::{RunRecord, RunRegistry};
pub use reporter::LogReporter;
