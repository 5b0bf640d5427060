//! Translation of step actions into external command lines.

use matrixci_core::environment::{SourceSpec, StepContext};
use matrixci_core::workflow::StepAction;
use matrixci_core::{Error, Result};
use std::collections::HashMap;

/// Shell family used for `run` steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Shell {
    Sh,
    Cmd,
}

impl Shell {
    /// Shell of the machine we run on.
    pub fn host() -> Self {
        if cfg!(windows) { Shell::Cmd } else { Shell::Sh }
    }

    fn wrap(self, command: &str) -> Vec<String> {
        match self {
            Shell::Sh => vec!["sh".to_string(), "-c".to_string(), command.to_string()],
            Shell::Cmd => vec!["cmd".to_string(), "/C".to_string(), command.to_string()],
        }
    }
}

/// The argv sequence for an action. Commands run in order; the first
/// non-zero exit ends the step.
pub fn command_plan(
    action: &StepAction,
    source: Option<&SourceSpec>,
    shell: Shell,
) -> Result<Vec<Vec<String>>> {
    let plan = match action {
        StepAction::Checkout => {
            let source = source.ok_or_else(|| {
                Error::InvalidInput("checkout requires a source repository".to_string())
            })?;
            let mut plan = vec![argv(&["git", "clone", "--quiet", &source.url, "."])];
            if let Some(sha) = &source.sha {
                plan.push(argv(&["git", "checkout", "--quiet", "--detach", sha]));
            }
            plan
        }
        StepAction::Toolchain { channel } => vec![
            argv(&["rustup", "toolchain", "install", channel, "--profile", "minimal"]),
            argv(&["rustup", "override", "set", channel]),
        ],
        StepAction::Component { name } => vec![argv(&["rustup", "component", "add", name])],
        StepAction::Run { command } => vec![shell.wrap(command)],
    };
    Ok(plan)
}

/// Environment variables every external command sees.
pub fn step_env(ctx: &StepContext) -> HashMap<String, String> {
    let mut env = ctx.env.clone();
    env.insert("CI".to_string(), "true".to_string());
    env.insert("MATRIXCI".to_string(), "true".to_string());
    env.insert("MATRIXCI_RUN_ID".to_string(), ctx.run_id.to_string());
    env.insert("MATRIXCI_JOB".to_string(), ctx.job_name.clone());
    env
}

/// Host variables passed through to local commands. Everything else in the
/// server's environment, credentials included, is withheld.
const HOST_PASSTHROUGH: &[&str] = &[
    "PATH",
    "HOME",
    "USER",
    "LOGNAME",
    "SHELL",
    "LANG",
    "LC_ALL",
    "TERM",
    "TZ",
    "TMPDIR",
    "TEMP",
    "TMP",
    "CARGO_HOME",
    "RUSTUP_HOME",
    "HTTP_PROXY",
    "HTTPS_PROXY",
    "NO_PROXY",
    "SYSTEMROOT",
    "SYSTEMDRIVE",
    "WINDIR",
    "COMSPEC",
    "PATHEXT",
    "USERPROFILE",
    "APPDATA",
    "LOCALAPPDATA",
    "PROGRAMDATA",
    "PROGRAMFILES",
];

/// Keep only the passthrough variables from `vars`.
pub fn filter_host_env(
    vars: impl IntoIterator<Item = (String, String)>,
) -> HashMap<String, String> {
    vars.into_iter()
        .filter(|(key, _)| {
            HOST_PASSTHROUGH
                .iter()
                .any(|allowed| allowed.eq_ignore_ascii_case(key))
        })
        .collect()
}

/// Passthrough variables of the current process.
pub fn host_env() -> HashMap<String, String> {
    filter_host_env(
        std::env::vars_os()
            .filter_map(|(key, value)| Some((key.into_string().ok()?, value.into_string().ok()?))),
    )
}

fn argv(parts: &[&str]) -> Vec<String> {
    parts.iter().map(|p| p.to_string()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checkout_pins_revision() {
        let source = SourceSpec {
            url: "https://example.com/repo.git".to_string(),
            sha: Some("abc123".to_string()),
        };
        let plan = command_plan(&StepAction::Checkout, Some(&source), Shell::Sh).unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0][..2], ["git", "clone"]);
        assert_eq!(plan[1].last().map(String::as_str), Some("abc123"));
    }

    #[test]
    fn test_checkout_without_source_is_an_error() {
        assert!(command_plan(&StepAction::Checkout, None, Shell::Sh).is_err());
    }

    #[test]
    fn test_run_uses_shell() {
        let action = StepAction::Run {
            command: "cargo fmt -- --check".to_string(),
        };
        assert_eq!(
            command_plan(&action, None, Shell::Sh).unwrap(),
            vec![vec!["sh", "-c", "cargo fmt -- --check"]]
        );
        assert_eq!(
            command_plan(&action, None, Shell::Cmd).unwrap()[0][0],
            "cmd"
        );
    }

    #[test]
    fn test_toolchain_installs_then_selects() {
        let action = StepAction::Toolchain {
            channel: "stable".to_string(),
        };
        let plan = command_plan(&action, None, Shell::Sh).unwrap();
        assert_eq!(plan[0][..3], ["rustup", "toolchain", "install"]);
        assert_eq!(plan[1], vec!["rustup", "override", "set", "stable"]);
    }

    #[test]
    fn test_host_env_withholds_credentials() {
        let env = filter_host_env([
            ("PATH".to_string(), "/usr/bin".to_string()),
            ("Path".to_string(), "C:\\Windows".to_string()),
            ("HOME".to_string(), "/home/ci".to_string()),
            ("MATRIXCI_GITHUB_TOKEN".to_string(), "ghp_secret".to_string()),
            ("MATRIXCI_WEBHOOK_SECRET".to_string(), "hush".to_string()),
            ("AWS_SECRET_ACCESS_KEY".to_string(), "key".to_string()),
        ]);
        assert_eq!(env.len(), 3);
        assert_eq!(env["PATH"], "/usr/bin");
        assert_eq!(env["HOME"], "/home/ci");
        assert!(env.contains_key("Path"));
        assert!(!env.keys().any(|k| k.starts_with("MATRIXCI") || k.starts_with("AWS")));
    }
}
