//! The built-in workflow: a three-OS build matrix plus a formatting gate.

use crate::ConfigResult;
use crate::workflow::parse_workflow;
use matrixci_core::workflow::Workflow;

pub const DEFAULT_WORKFLOW: &str = r#"
workflow "ci"

on "pull_request" {
    types "opened" "synchronize" "reopened"
}

job "build" {
    matrix "os" "ubuntu-latest" "macos-latest" "windows-latest"
    runs-on "${matrix.os}"

    step "Select stable toolchain" {
        toolchain "stable"
    }
    step "Checkout" {
        checkout
    }
    step "Build" {
        run "cargo build"
    }
}

job "rustfmt" {
    runs-on "ubuntu-latest"

    step "Checkout" {
        checkout
    }
    step "Install rustfmt" {
        component "rustfmt"
    }
    step "Check formatting" {
        run "cargo fmt -- --check"
    }
}
"#;

pub fn default_workflow() -> ConfigResult<Workflow> {
    parse_workflow(DEFAULT_WORKFLOW)
}

#[cfg(test)]
mod tests {
    use super::*;
    use matrixci_core::workflow::{StepAction, Trigger};

    #[test]
    fn test_default_workflow_shape() {
        let workflow = default_workflow().unwrap();
        assert_eq!(workflow.name, "ci");
        assert_eq!(workflow.triggers, vec![Trigger::pull_request()]);

        let build = workflow.job("build").unwrap();
        let axis = build.matrix.as_ref().unwrap();
        assert_eq!(axis.key, "os");
        assert_eq!(
            axis.values,
            vec!["ubuntu-latest", "macos-latest", "windows-latest"]
        );
        assert_eq!(build.steps.len(), 3);
        // The toolchain is selected before the source is checked out.
        assert_eq!(
            build.steps[0].action,
            StepAction::Toolchain {
                channel: "stable".to_string()
            }
        );
        assert_eq!(build.steps[1].action, StepAction::Checkout);
        assert_eq!(
            build.steps[2].action,
            StepAction::Run {
                command: "cargo build".to_string()
            }
        );

        let fmt = workflow.job("rustfmt").unwrap();
        assert!(fmt.matrix.is_none());
        assert_eq!(fmt.runs_on, "ubuntu-latest");
        assert_eq!(
            fmt.steps[1].action,
            StepAction::Component {
                name: "rustfmt".to_string()
            }
        );
    }
}
