//! HTTP server for MatrixCI.
//!
//! Accepts GitHub pull request webhooks and exposes the run registry.

pub mod error;
pub mod routes;
pub mod services;
pub mod state;

pub use state::AppState;
