//! Local host provider: each job gets a fresh scratch directory.

use async_trait::async_trait;
use matrixci_core::environment::*;
use matrixci_core::workflow::{EnvironmentId, StepAction};
use matrixci_core::{Error, JobId, Result};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tempfile::TempDir;
use tokio::process::Command;
use tracing::{debug, info};

use crate::commands::{Shell, command_plan, host_env, step_env};

/// Runs jobs directly on the host, in throwaway working directories.
///
/// Only environment identifiers the host is labelled with are accepted; a
/// Linux machine cannot honestly stand in for `windows-latest`.
pub struct LocalProvider {
    root: Option<PathBuf>,
    labels: HashSet<EnvironmentId>,
}

impl LocalProvider {
    pub fn new(labels: impl IntoIterator<Item = impl Into<EnvironmentId>>) -> Self {
        Self {
            root: None,
            labels: labels.into_iter().map(Into::into).collect(),
        }
    }

    /// Create workspaces under `root` instead of the system temp directory.
    pub fn with_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.root = Some(root.into());
        self
    }
}

#[async_trait]
impl EnvironmentProvider for LocalProvider {
    fn name(&self) -> &'static str {
        "local"
    }

    fn supports(&self, env: &EnvironmentId) -> bool {
        self.labels.contains(env)
    }

    async fn provision(&self, env: &EnvironmentId, job_id: JobId) -> Result<Box<dyn Environment>> {
        if !self.supports(env) {
            return Err(Error::Provisioning(format!(
                "host is not labelled '{}'",
                env
            )));
        }

        let prefix = format!("matrixci-{}-", job_id.short());
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);
        let dir = match &self.root {
            Some(root) => {
                tokio::fs::create_dir_all(root).await?;
                builder.tempdir_in(root)?
            }
            None => builder.tempdir()?,
        };

        let handle = dir.path().display().to_string();
        info!(env = %env, workspace = %handle, "Provisioned local workspace");

        Ok(Box::new(LocalEnvironment {
            id: env.clone(),
            dir,
            handle,
        }))
    }
}

/// A scratch directory owned by one job.
pub struct LocalEnvironment {
    id: EnvironmentId,
    dir: TempDir,
    handle: String,
}

impl LocalEnvironment {
    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

#[async_trait]
impl Environment for LocalEnvironment {
    fn id(&self) -> &EnvironmentId {
        &self.id
    }

    fn handle(&self) -> &str {
        &self.handle
    }

    async fn execute(&mut self, action: &StepAction, ctx: &StepContext) -> Result<StepOutcome> {
        let plan = command_plan(action, ctx.source.as_ref(), Shell::host())?;
        let host = host_env();
        let env = step_env(ctx);
        let mut outcome = StepOutcome::default();

        for argv in plan {
            let Some((program, args)) = argv.split_first() else {
                continue;
            };
            outcome.logs.push(LogLine::system(format!("$ {}", argv.join(" "))));
            debug!(step = %ctx.step_name, command = ?argv, "Running command");

            let output = Command::new(program)
                .args(args)
                .current_dir(self.dir.path())
                .env_clear()
                .envs(&host)
                .envs(&env)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .kill_on_drop(true)
                .output()
                .await
                .map_err(|e| Error::ExecutionFailed(format!("failed to start {}: {}", program, e)))?;

            push_lines(&mut outcome.logs, LogStream::Stdout, &output.stdout);
            push_lines(&mut outcome.logs, LogStream::Stderr, &output.stderr);

            outcome.exit_code = output.status.code();
            if !output.status.success() {
                break;
            }
        }

        Ok(outcome)
    }

    async fn teardown(self: Box<Self>) -> Result<()> {
        debug!(workspace = %self.handle, "Removing local workspace");
        let dir = self.dir;
        tokio::task::spawn_blocking(move || dir.close())
            .await
            .map_err(|e| Error::Internal(format!("workspace removal panicked: {}", e)))??;
        Ok(())
    }
}

fn push_lines(logs: &mut Vec<LogLine>, stream: LogStream, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    logs.extend(text.lines().map(|line| LogLine::new(stream, line.trim_end())));
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixci_core::RunId;
    use std::collections::HashMap;

    fn step_ctx(step: &str) -> StepContext {
        StepContext {
            run_id: RunId::new(),
            job_id: JobId::new(),
            job_name: "build".to_string(),
            step_name: step.to_string(),
            env: HashMap::from([("GREETING".to_string(), "hello".to_string())]),
            source: None,
        }
    }

    #[tokio::test]
    async fn test_rejects_unlabelled_environment() {
        let provider = LocalProvider::new(["ubuntu-latest"]);
        let result = provider
            .provision(&EnvironmentId::from("windows-latest"), JobId::new())
            .await;
        assert!(matches!(result, Err(Error::Provisioning(_))));
    }

    #[tokio::test]
    async fn test_teardown_removes_workspace() {
        let root = tempfile::tempdir().unwrap();
        let provider = LocalProvider::new(["ubuntu-latest"]).with_root(root.path());
        let env = provider
            .provision(&EnvironmentId::from("ubuntu-latest"), JobId::new())
            .await
            .unwrap();

        let workspace = PathBuf::from(env.handle());
        assert!(workspace.starts_with(root.path()));
        assert!(workspace.is_dir());

        env.teardown().await.unwrap();
        assert!(!workspace.exists());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_run_step_reports_exit_code_and_output() {
        let provider = LocalProvider::new(["ubuntu-latest"]);
        let mut env = provider
            .provision(&EnvironmentId::from("ubuntu-latest"), JobId::new())
            .await
            .unwrap();

        let ok = env
            .execute(
                &StepAction::Run {
                    command: "echo $GREETING $CI".to_string(),
                },
                &step_ctx("greet"),
            )
            .await
            .unwrap();
        assert!(ok.success());
        assert!(
            ok.logs
                .iter()
                .any(|l| l.stream == LogStream::Stdout && l.content == "hello true")
        );

        let failed = env
            .execute(
                &StepAction::Run {
                    command: "exit 3".to_string(),
                },
                &step_ctx("fail"),
            )
            .await
            .unwrap();
        assert!(!failed.success());
        assert_eq!(failed.exit_code, Some(3));

        env.teardown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_steps_share_the_workspace() {
        let provider = LocalProvider::new(["ubuntu-latest"]);
        let mut env = provider
            .provision(&EnvironmentId::from("ubuntu-latest"), JobId::new())
            .await
            .unwrap();

        let write = StepAction::Run {
            command: "echo built > artifact.txt".to_string(),
        };
        let read = StepAction::Run {
            command: "cat artifact.txt".to_string(),
        };
        assert!(env.execute(&write, &step_ctx("write")).await.unwrap().success());
        let outcome = env.execute(&read, &step_ctx("read")).await.unwrap();
        assert!(outcome.logs.iter().any(|l| l.content == "built"));

        env.teardown().await.unwrap();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_commands_see_only_passthrough_and_step_variables() {
        let provider = LocalProvider::new(["ubuntu-latest"]);
        let mut env = provider
            .provision(&EnvironmentId::from("ubuntu-latest"), JobId::new())
            .await
            .unwrap();

        let outcome = env
            .execute(
                &StepAction::Run {
                    command: "env".to_string(),
                },
                &step_ctx("dump"),
            )
            .await
            .unwrap();
        assert!(outcome.success());

        let step_vars = crate::commands::step_env(&step_ctx("dump"));
        let visible: Vec<&str> = outcome
            .logs
            .iter()
            .filter(|l| l.stream == LogStream::Stdout)
            .filter_map(|l| l.content.split_once('=').map(|(key, _)| key))
            .collect();
        assert!(visible.contains(&"GREETING"));
        for key in visible {
            assert!(
                step_vars.contains_key(key)
                    || crate::commands::filter_host_env([(key.to_string(), String::new())])
                        .contains_key(key)
                    // set by sh itself
                    || matches!(key, "PWD" | "SHLVL" | "_" | "OLDPWD"),
                "unexpected variable {} leaked into the step",
                key
            );
        }

        env.teardown().await.unwrap();
    }
}
