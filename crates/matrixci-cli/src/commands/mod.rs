//! CLI command implementations.

pub mod expand;
pub mod run;

use anyhow::{Context, Result};
use matrixci_config::{default_workflow, load_workflow};
use matrixci_core::workflow::Workflow;
use std::path::Path;
use tracing::debug;

/// Workflow file picked up from the current directory.
const WORKFLOW_FILE: &str = "matrixci.kdl";

/// Validate a workflow file.
pub fn validate(path: &Path) -> Result<()> {
    match load_workflow(path) {
        Ok(workflow) => {
            println!(
                "Workflow '{}' is valid: {} job(s), {} trigger(s)",
                workflow.name,
                workflow.jobs.len(),
                workflow.triggers.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("Configuration error: {}", e);
            std::process::exit(1);
        }
    }
}

/// Load the given workflow, else `matrixci.kdl` in `dir`, else the built-in one.
pub(crate) fn resolve_workflow(path: Option<&Path>, dir: &Path) -> Result<Workflow> {
    if let Some(path) = path {
        debug!(path = %path.display(), "Loading workflow");
        return load_workflow(path)
            .with_context(|| format!("Failed to load workflow: {}", path.display()));
    }

    let local = dir.join(WORKFLOW_FILE);
    if local.is_file() {
        debug!(path = %local.display(), "Loading workflow from source directory");
        return load_workflow(&local)
            .with_context(|| format!("Failed to load workflow: {}", local.display()));
    }

    debug!("No workflow file found, using the built-in workflow");
    default_workflow().context("Failed to parse built-in workflow")
}

#[cfg(test)]
mod tests {
    use super::*;

    const WORKFLOW: &str = r#"
workflow "lint"
on "pull_request"
job "clippy" {
    runs-on "ubuntu-latest"
    step "Clippy" { run "cargo clippy" }
}
"#;

    #[test]
    fn test_resolve_prefers_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("other.kdl");
        std::fs::write(&path, WORKFLOW).unwrap();

        let workflow = resolve_workflow(Some(&path), dir.path()).unwrap();
        assert_eq!(workflow.name, "lint");
    }

    #[test]
    fn test_resolve_picks_up_local_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join(WORKFLOW_FILE), WORKFLOW).unwrap();

        let workflow = resolve_workflow(None, dir.path()).unwrap();
        assert_eq!(workflow.name, "lint");
    }

    #[test]
    fn test_resolve_falls_back_to_builtin() {
        let dir = tempfile::tempdir().unwrap();
        let workflow = resolve_workflow(None, dir.path()).unwrap();
        assert_eq!(workflow.name, "ci");
        assert_eq!(workflow.jobs.len(), 2);
    }

    #[test]
    fn test_resolve_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing.kdl");
        assert!(resolve_workflow(Some(&missing), dir.path()).is_err());
    }
}
