//! Scripted environment provider and fixtures for scheduler tests.

use async_trait::async_trait;
use matrixci_core::environment::{
    Environment, EnvironmentProvider, LogLine, LogStream, StepContext, StepOutcome,
};
use matrixci_core::event::{PullRequestEvent, TriggerEvent};
use matrixci_core::job::JobInstance;
use matrixci_core::run::RunInfo;
use matrixci_core::workflow::{EnvironmentId, Step, StepAction};
use matrixci_core::{Error, JobId, Result};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::{CancelSignal, RunContext};

/// Provider whose steps succeed unless scripted otherwise.
#[derive(Default)]
pub(crate) struct ScriptedProvider {
    exits: HashMap<(String, String), i32>,
    unavailable: HashSet<String>,
    delay: Option<Duration>,
    provision_delay: Option<Duration>,
    pub provisions: Arc<AtomicUsize>,
    pub teardowns: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `step` exit with `code` on environment `env`.
    pub fn exit(mut self, env: &str, step: &str, code: i32) -> Self {
        self.exits.insert((env.to_string(), step.to_string()), code);
        self
    }

    /// Refuse to provision `env`.
    pub fn unavailable(mut self, env: &str) -> Self {
        self.unavailable.insert(env.to_string());
        self
    }

    /// Sleep this long inside every step.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Sleep this long inside every provision, after the environment is counted.
    pub fn provision_delay(mut self, delay: Duration) -> Self {
        self.provision_delay = Some(delay);
        self
    }

    /// Step names executed on `env`, in order.
    pub fn executed(&self, env: &str) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .filter(|(e, _)| e == env)
            .map(|(_, step)| step.clone())
            .collect()
    }
}

#[async_trait]
impl EnvironmentProvider for ScriptedProvider {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn supports(&self, env: &EnvironmentId) -> bool {
        !self.unavailable.contains(env.as_str())
    }

    async fn provision(&self, env: &EnvironmentId, _job_id: JobId) -> Result<Box<dyn Environment>> {
        if !self.supports(env) {
            return Err(Error::Provisioning(format!("no runner for '{}'", env)));
        }
        self.provisions.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.provision_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(Box::new(ScriptedEnvironment {
            id: env.clone(),
            exits: self.exits.clone(),
            delay: self.delay,
            teardowns: self.teardowns.clone(),
            executed: self.executed.clone(),
        }))
    }
}

struct ScriptedEnvironment {
    id: EnvironmentId,
    exits: HashMap<(String, String), i32>,
    delay: Option<Duration>,
    teardowns: Arc<AtomicUsize>,
    executed: Arc<Mutex<Vec<(String, String)>>>,
}

#[async_trait]
impl Environment for ScriptedEnvironment {
    fn id(&self) -> &EnvironmentId {
        &self.id
    }

    fn handle(&self) -> &str {
        self.id.as_str()
    }

    async fn execute(&mut self, _action: &StepAction, ctx: &StepContext) -> Result<StepOutcome> {
        self.executed
            .lock()
            .unwrap()
            .push((self.id.to_string(), ctx.step_name.clone()));
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let code = self
            .exits
            .get(&(self.id.to_string(), ctx.step_name.clone()))
            .copied()
            .unwrap_or(0);
        Ok(StepOutcome {
            exit_code: Some(code),
            logs: vec![LogLine::new(
                LogStream::Stdout,
                format!("ran {}", ctx.step_name),
            )],
        })
    }

    async fn teardown(self: Box<Self>) -> Result<()> {
        self.teardowns.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub(crate) fn pull_request(delivery: &str, number: u64, action: &str) -> TriggerEvent {
    TriggerEvent::pull_request(
        delivery,
        PullRequestEvent {
            number,
            action: action.to_string(),
            repository: "octo/widgets".to_string(),
            head_sha: format!("{:0>40}", delivery),
            head_ref: Some("feature".to_string()),
            head_clone_url: None,
        },
    )
}

pub(crate) fn run_context() -> RunContext {
    let info = RunInfo::from_event("ci", &pull_request("d-1", 1, "opened"));
    RunContext::new(info, None, CancelSignal::never())
}

pub(crate) fn job_instance(env: &str, steps: &[&str]) -> JobInstance {
    JobInstance {
        id: JobId::new(),
        name: format!("job ({})", env),
        template: "job".to_string(),
        environment: EnvironmentId::from(env),
        matrix: None,
        steps: steps
            .iter()
            .map(|name| {
                Step::new(
                    *name,
                    StepAction::Run {
                        command: format!("./{}", name),
                    },
                )
            })
            .collect(),
        env: HashMap::new(),
    }
}
