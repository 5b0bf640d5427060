//! Workflow definitions: triggers, job templates, matrix axes and steps.

use derive_more::Display;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::event::{EventKind, TriggerEvent};

/// Pull request activity types that start a run when a trigger lists none.
pub const DEFAULT_PULL_REQUEST_TYPES: [&str; 3] = ["opened", "synchronize", "reopened"];

/// Identifier of a target environment (e.g. "ubuntu-latest").
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Display)]
#[display("{_0}")]
#[serde(transparent)]
pub struct EnvironmentId(String);

impl EnvironmentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for EnvironmentId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for EnvironmentId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// A CI workflow: the triggers that start it and the jobs it runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    /// Workflow name (e.g. "ci").
    pub name: String,
    /// Events that start a run.
    pub triggers: Vec<Trigger>,
    /// Job templates, in declaration order.
    pub jobs: Vec<JobTemplate>,
    /// Environment variables passed to every step.
    pub env: HashMap<String, String>,
}

impl Workflow {
    /// Whether any trigger of this workflow accepts the event.
    pub fn is_triggered_by(&self, event: &TriggerEvent) -> bool {
        self.triggers.iter().any(|t| t.matches(event))
    }

    pub fn job(&self, name: &str) -> Option<&JobTemplate> {
        self.jobs.iter().find(|j| j.name == name)
    }
}

/// What starts a workflow run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Trigger {
    /// Pull request lifecycle events with one of the listed activity types.
    PullRequest { types: Vec<String> },
}

impl Trigger {
    /// A pull request trigger with the default activity types.
    pub fn pull_request() -> Self {
        Trigger::PullRequest {
            types: DEFAULT_PULL_REQUEST_TYPES
                .iter()
                .map(|t| t.to_string())
                .collect(),
        }
    }

    pub fn matches(&self, event: &TriggerEvent) -> bool {
        match self {
            Trigger::PullRequest { types } => match &event.kind {
                EventKind::PullRequest(pr) => types.iter().any(|t| *t == pr.action),
                _ => false,
            },
        }
    }
}

/// A job definition, possibly expanded over a matrix axis.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTemplate {
    /// Job name (unique within the workflow).
    pub name: String,
    /// Target environment; may reference `${matrix.<key>}`.
    pub runs_on: String,
    /// Matrix axis to expand over, if any.
    pub matrix: Option<MatrixAxis>,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Job-specific environment variables.
    pub env: HashMap<String, String>,
}

/// An enumerated set of values a job template is expanded over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatrixAxis {
    /// Axis name, referenced as `${matrix.<key>}`.
    pub key: String,
    /// Axis values, in declaration order.
    pub values: Vec<String>,
}

impl MatrixAxis {
    pub fn new(key: impl Into<String>, values: impl IntoIterator<Item = impl Into<String>>) -> Self {
        Self {
            key: key.into(),
            values: values.into_iter().map(Into::into).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// A single atomic action within a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Step {
    /// Human-readable name.
    pub name: String,
    /// What the step does.
    pub action: StepAction,
}

impl Step {
    pub fn new(name: impl Into<String>, action: StepAction) -> Self {
        Self {
            name: name.into(),
            action,
        }
    }
}

/// What a step does. Every variant is delegated to an external tool.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepAction {
    /// Fetch the triggering revision into the working directory.
    Checkout,
    /// Install and select a toolchain channel (e.g. "stable").
    Toolchain { channel: String },
    /// Install a named toolchain component (e.g. "rustfmt").
    Component { name: String },
    /// Run a literal command line through the environment's shell.
    Run { command: String },
}

impl StepAction {
    pub fn kind(&self) -> &'static str {
        match self {
            StepAction::Checkout => "checkout",
            StepAction::Toolchain { .. } => "toolchain",
            StepAction::Component { .. } => "component",
            StepAction::Run { .. } => "run",
        }
    }
}
