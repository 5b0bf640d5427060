//! Outbound integrations.

pub mod github;

pub use github::GitHubStatusReporter;
