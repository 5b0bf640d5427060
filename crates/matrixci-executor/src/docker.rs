//! Docker provider: each job gets its own long-lived container and steps run
//! through `docker exec`.

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
};
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use futures::StreamExt;
use matrixci_core::environment::*;
use matrixci_core::workflow::{EnvironmentId, StepAction};
use matrixci_core::{Error, JobId, Result};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::{debug, info, warn};

use crate::commands::{Shell, command_plan, step_env};

const WORKSPACE_DIR: &str = "/workspace";
const SOURCE_MOUNT: &str = "/source";

/// Runs each job in a fresh container built from the image mapped to its
/// environment identifier.
pub struct DockerProvider {
    docker: Docker,
    images: HashMap<EnvironmentId, String>,
    /// Host directory bind-mounted read-only at `/source` for checkouts.
    source_dir: Option<PathBuf>,
}

impl DockerProvider {
    /// Connect to the local Docker daemon.
    pub fn new(images: impl IntoIterator<Item = (String, String)>) -> Result<Self> {
        let docker =
            Docker::connect_with_local_defaults().map_err(|e| Error::Internal(e.to_string()))?;
        Ok(Self::with_client(docker, images))
    }

    /// Create with a custom Docker client.
    pub fn with_client(docker: Docker, images: impl IntoIterator<Item = (String, String)>) -> Self {
        Self {
            docker,
            images: images
                .into_iter()
                .map(|(env, image)| (EnvironmentId::new(env), image))
                .collect(),
            source_dir: None,
        }
    }

    /// Mount a local source directory so checkout can clone from it.
    pub fn with_source_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.source_dir = Some(dir.into());
        self
    }

    fn container_name(job_id: &JobId) -> String {
        format!("matrixci-job-{}", job_id)
    }

    async fn pull_image(&self, image: &str) {
        info!(image = %image, "Pulling image");
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let mut pull_stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = pull_stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(status = %status, "Pull progress");
                    }
                }
                Err(e) => {
                    warn!(error = %e, "Pull warning");
                }
            }
        }
    }
}

#[async_trait]
impl EnvironmentProvider for DockerProvider {
    fn name(&self) -> &'static str {
        "docker"
    }

    fn supports(&self, env: &EnvironmentId) -> bool {
        self.images.contains_key(env)
    }

    async fn provision(&self, env: &EnvironmentId, job_id: JobId) -> Result<Box<dyn Environment>> {
        let image = self
            .images
            .get(env)
            .ok_or_else(|| Error::Provisioning(format!("no image configured for '{}'", env)))?;

        self.pull_image(image).await;

        let container_name = Self::container_name(&job_id);
        let binds = self
            .source_dir
            .as_ref()
            .map(|dir| vec![format!("{}:{}:ro", dir.display(), SOURCE_MOUNT)]);

        let config = Config {
            image: Some(image.clone()),
            cmd: Some(vec!["sleep".to_string(), "infinity".to_string()]),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            tty: Some(false),
            host_config: Some(HostConfig {
                binds,
                ..Default::default()
            }),
            ..Default::default()
        };

        let create_options = CreateContainerOptions {
            name: container_name.clone(),
            platform: None,
        };

        info!(container = %container_name, env = %env, "Creating container");
        let container = self
            .docker
            .create_container(Some(create_options), config)
            .await
            .map_err(|e| Error::Provisioning(format!("failed to create container: {}", e)))?;

        let environment = DockerEnvironment {
            docker: self.docker.clone(),
            id: env.clone(),
            container_id: container.id,
            source_dir: self.source_dir.clone(),
        };

        if let Err(e) = self
            .docker
            .start_container(&container_name, None::<StartContainerOptions<String>>)
            .await
        {
            // Created but never handed out, so release it here.
            if let Err(cleanup) = Box::new(environment).teardown().await {
                warn!(container = %container_name, error = %cleanup, "Failed to remove container");
            }
            return Err(Error::Provisioning(format!(
                "failed to start container: {}",
                e
            )));
        }

        Ok(Box::new(environment))
    }
}

/// A running container owned by one job.
pub struct DockerEnvironment {
    docker: Docker,
    id: EnvironmentId,
    container_id: String,
    source_dir: Option<PathBuf>,
}

impl DockerEnvironment {
    /// Point checkouts of the mounted host directory at the mount path.
    fn container_source(&self, source: &SourceSpec) -> SourceSpec {
        let mounted = self
            .source_dir
            .as_ref()
            .map(|dir| dir.as_os_str() == source.url.as_str())
            .unwrap_or(false);

        if mounted {
            SourceSpec {
                url: SOURCE_MOUNT.to_string(),
                sha: source.sha.clone(),
            }
        } else {
            source.clone()
        }
    }

    async fn exec(
        &self,
        argv: Vec<String>,
        env: &HashMap<String, String>,
        logs: &mut Vec<LogLine>,
    ) -> Result<Option<i32>> {
        let options = CreateExecOptions {
            cmd: Some(argv),
            env: Some(env.iter().map(|(k, v)| format!("{}={}", k, v)).collect()),
            working_dir: Some(WORKSPACE_DIR.to_string()),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            ..Default::default()
        };

        let exec = self
            .docker
            .create_exec(&self.container_id, options)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to create exec: {}", e)))?;

        let started = self
            .docker
            .start_exec(&exec.id, None)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to start exec: {}", e)))?;

        if let StartExecResults::Attached { mut output, .. } = started {
            while let Some(chunk) = output.next().await {
                match chunk {
                    Ok(LogOutput::StdErr { message }) => {
                        push_lines(logs, LogStream::Stderr, &message);
                    }
                    Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                        push_lines(logs, LogStream::Stdout, &message);
                    }
                    Ok(LogOutput::StdIn { .. }) => {}
                    Err(e) => {
                        warn!(error = %e, "Exec output stream error");
                        break;
                    }
                }
            }
        }

        let inspect = self
            .docker
            .inspect_exec(&exec.id)
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to inspect exec: {}", e)))?;

        Ok(inspect.exit_code.map(|c| c as i32))
    }
}

#[async_trait]
impl Environment for DockerEnvironment {
    fn id(&self) -> &EnvironmentId {
        &self.id
    }

    fn handle(&self) -> &str {
        &self.container_id
    }

    async fn execute(&mut self, action: &StepAction, ctx: &StepContext) -> Result<StepOutcome> {
        let source = ctx.source.as_ref().map(|s| self.container_source(s));
        let plan = command_plan(action, source.as_ref(), Shell::Sh)?;
        let env = step_env(ctx);
        let mut outcome = StepOutcome::default();

        for argv in plan {
            outcome.logs.push(LogLine::system(format!("$ {}", argv.join(" "))));
            outcome.exit_code = self.exec(argv, &env, &mut outcome.logs).await?;
            if !outcome.success() {
                break;
            }
        }

        Ok(outcome)
    }

    async fn teardown(self: Box<Self>) -> Result<()> {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };

        debug!(container = %self.container_id, "Removing container");
        self.docker
            .remove_container(&self.container_id, Some(options))
            .await
            .map_err(|e| Error::ExecutionFailed(format!("failed to remove container: {}", e)))?;

        Ok(())
    }
}

fn push_lines(logs: &mut Vec<LogLine>, stream: LogStream, bytes: &[u8]) {
    let text = String::from_utf8_lossy(bytes);
    logs.extend(text.lines().map(|line| LogLine::new(stream, line.trim_end())));
}
