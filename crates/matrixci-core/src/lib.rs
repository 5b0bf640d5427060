//! Core domain types and traits for the MatrixCI orchestrator.
//!
//! This crate contains:
//! - Run and job identifiers
//! - Workflow model (triggers, job templates, matrix axes, steps)
//! - Trigger events
//! - Environment provider trait
//! - Job and run states and reports
//! - Status reporter trait

pub mod environment;
pub mod error;
pub mod event;
pub mod id;
pub mod job;
pub mod reporter;
pub mod run;
pub mod workflow;

pub use error::{Error, Result};
pub use id::{JobId, RunId};
