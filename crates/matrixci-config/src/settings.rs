//! Orchestrator settings parsing.

use crate::kdl_ext::{first_integer_arg, first_string_arg, string_args};
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Which environment provider runs jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    /// Scratch directories on the host.
    Local,
    /// One container per job.
    Docker,
}

impl std::str::FromStr for ProviderKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> ConfigResult<Self> {
        match s {
            "local" => Ok(ProviderKind::Local),
            "docker" => Ok(ProviderKind::Docker),
            other => Err(ConfigError::InvalidValue {
                field: "provider".to_string(),
                message: format!("unknown provider: {}", other),
            }),
        }
    }
}

/// Orchestrator-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Maximum number of jobs running at once.
    pub max_parallel: usize,
    pub provider: ProviderKind,
    /// Parent directory for local job workspaces (system temp dir when unset).
    pub workspace_root: Option<PathBuf>,
    /// Environment identifiers the local provider accepts.
    pub labels: Vec<String>,
    /// Environment identifier to container image, for the docker provider.
    pub images: BTreeMap<String, String>,
    /// Per-job time limit; unlimited when unset.
    pub job_timeout: Option<Duration>,
    /// Finished runs kept in the run registry.
    pub retained_runs: usize,
    /// Recent delivery ids remembered for redelivery detection.
    pub delivery_window: usize,
}

impl Default for Settings {
    fn default() -> Self {
        let mut images = BTreeMap::new();
        images.insert("ubuntu-latest".to_string(), "rust:1".to_string());

        Self {
            max_parallel: 4,
            provider: ProviderKind::Local,
            workspace_root: None,
            labels: vec![host_label().to_string()],
            images,
            job_timeout: None,
            retained_runs: 1_000,
            delivery_window: 10_000,
        }
    }
}

/// The environment identifier describing the machine we run on.
pub fn host_label() -> &'static str {
    match std::env::consts::OS {
        "macos" => "macos-latest",
        "windows" => "windows-latest",
        _ => "ubuntu-latest",
    }
}

/// Read and parse a settings file.
pub fn load_settings(path: impl AsRef<Path>) -> ConfigResult<Settings> {
    let content = std::fs::read_to_string(path)?;
    parse_settings(&content)
}

/// Parse settings from KDL text. Unset fields keep their defaults.
pub fn parse_settings(kdl: &str) -> ConfigResult<Settings> {
    let doc: KdlDocument = kdl.parse()?;
    let mut settings = Settings::default();
    let mut labels = Vec::new();
    let mut images = BTreeMap::new();

    for node in doc.nodes() {
        match node.name().value() {
            "max-parallel" => {
                settings.max_parallel = positive_integer(node, "max-parallel")? as usize;
            }
            "provider" => {
                let provider = first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("provider".to_string()))?;
                settings.provider = provider.parse()?;
            }
            "workspace-root" => {
                let root = first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("workspace-root".to_string()))?;
                settings.workspace_root = Some(PathBuf::from(root));
            }
            "label" => {
                labels.extend(string_args(node));
            }
            "image" => {
                let args = string_args(node);
                let [env, image] = args.as_slice() else {
                    return Err(ConfigError::InvalidValue {
                        field: "image".to_string(),
                        message: "expected: image \"<environment>\" \"<image>\"".to_string(),
                    });
                };
                if images.insert(env.clone(), image.clone()).is_some() {
                    return Err(ConfigError::Duplicate(format!("image for '{}'", env)));
                }
            }
            "job-timeout-secs" => {
                let secs = positive_integer(node, "job-timeout-secs")?;
                settings.job_timeout = Some(Duration::from_secs(secs));
            }
            "retained-runs" => {
                settings.retained_runs = positive_integer(node, "retained-runs")? as usize;
            }
            "delivery-window" => {
                settings.delivery_window = positive_integer(node, "delivery-window")? as usize;
            }
            _ => {} // Ignore unknown nodes
        }
    }

    if !labels.is_empty() {
        settings.labels = labels;
    }
    if !images.is_empty() {
        settings.images = images;
    }

    Ok(settings)
}

fn positive_integer(node: &KdlNode, field: &str) -> ConfigResult<u64> {
    let value = first_integer_arg(node)
        .ok_or_else(|| ConfigError::MissingField(field.to_string()))?;
    match u64::try_from(value) {
        Ok(n) if n > 0 => Ok(n),
        _ => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            message: format!("expected a positive integer, got {}", value),
        }),
    }
}
