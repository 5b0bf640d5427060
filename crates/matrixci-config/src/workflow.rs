//! Workflow configuration parsing and validation.

use crate::kdl_ext::{arg_count, first_string_arg, string_args, string_list_prop, string_map};
use crate::variables::referenced_variables;
use crate::{ConfigError, ConfigResult};
use kdl::{KdlDocument, KdlNode};
use matrixci_core::workflow::{
    DEFAULT_PULL_REQUEST_TYPES, JobTemplate, MatrixAxis, Step, StepAction, Trigger, Workflow,
};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Read and parse a workflow file.
pub fn load_workflow(path: impl AsRef<Path>) -> ConfigResult<Workflow> {
    let content = std::fs::read_to_string(path)?;
    parse_workflow(&content)
}

/// Parse a workflow from KDL text.
pub fn parse_workflow(kdl: &str) -> ConfigResult<Workflow> {
    let doc: KdlDocument = kdl.parse()?;

    let mut name = String::new();
    let mut triggers = Vec::new();
    let mut jobs = Vec::new();
    let mut env = HashMap::new();

    for node in doc.nodes() {
        match node.name().value() {
            "workflow" => {
                name = first_string_arg(node)
                    .ok_or_else(|| ConfigError::MissingField("workflow name".to_string()))?;
            }
            "on" => {
                triggers.push(parse_trigger(node)?);
            }
            "job" => {
                jobs.push(parse_job(node)?);
            }
            "env" => {
                env.extend(string_map(node));
            }
            _ => {} // Ignore unknown nodes
        }
    }

    let workflow = Workflow {
        name,
        triggers,
        jobs,
        env,
    };
    validate_workflow(&workflow)?;
    Ok(workflow)
}

/// Check the invariants the orchestrator relies on.
pub fn validate_workflow(workflow: &Workflow) -> ConfigResult<()> {
    if workflow.name.is_empty() {
        return Err(ConfigError::MissingField("workflow name".to_string()));
    }

    if workflow.triggers.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "trigger for workflow '{}'",
            workflow.name
        )));
    }

    if workflow.jobs.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "jobs for workflow '{}'",
            workflow.name
        )));
    }

    let mut names = HashSet::new();
    for job in &workflow.jobs {
        if !names.insert(job.name.as_str()) {
            return Err(ConfigError::Duplicate(format!("job '{}'", job.name)));
        }
        validate_job(job)?;
    }

    Ok(())
}

fn validate_job(job: &JobTemplate) -> ConfigResult<()> {
    if job.runs_on.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "runs-on for job '{}'",
            job.name
        )));
    }

    if job.steps.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "steps for job '{}'",
            job.name
        )));
    }

    if let Some(axis) = &job.matrix {
        if axis.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: format!("matrix '{}' of job '{}'", axis.key, job.name),
                message: "matrix axis has no values".to_string(),
            });
        }
        let mut seen = HashSet::new();
        for value in &axis.values {
            if !seen.insert(value.as_str()) {
                return Err(ConfigError::Duplicate(format!(
                    "matrix value '{}' in job '{}'",
                    value, job.name
                )));
            }
        }
    }

    for var in referenced_variables(&job.runs_on) {
        let Some(key) = var.strip_prefix("matrix.") else {
            continue;
        };
        let known = job.matrix.as_ref().map(|a| a.key == key).unwrap_or(false);
        if !known {
            return Err(ConfigError::InvalidReference(format!(
                "job '{}' runs on unknown matrix key '{}'",
                job.name, key
            )));
        }
    }

    Ok(())
}

fn parse_trigger(node: &KdlNode) -> ConfigResult<Trigger> {
    let trigger_type = first_string_arg(node).unwrap_or_default();

    match trigger_type.as_str() {
        "pull_request" => {
            let types = string_list_prop(node, "types");
            if types.is_empty() {
                return Ok(Trigger::pull_request());
            }
            if let Some(unknown) = types.iter().find(|t| !is_pull_request_action(t)) {
                return Err(ConfigError::InvalidValue {
                    field: "pull_request types".to_string(),
                    message: format!("unknown activity type: {}", unknown),
                });
            }
            Ok(Trigger::PullRequest { types })
        }
        "" => Err(ConfigError::MissingField("trigger type".to_string())),
        _ => Err(ConfigError::InvalidValue {
            field: "trigger type".to_string(),
            message: format!("unknown trigger type: {}", trigger_type),
        }),
    }
}

fn is_pull_request_action(action: &str) -> bool {
    DEFAULT_PULL_REQUEST_TYPES.contains(&action)
        || matches!(
            action,
            "closed"
                | "edited"
                | "assigned"
                | "unassigned"
                | "labeled"
                | "unlabeled"
                | "ready_for_review"
                | "converted_to_draft"
                | "review_requested"
        )
}

fn parse_job(node: &KdlNode) -> ConfigResult<JobTemplate> {
    let name =
        first_string_arg(node).ok_or_else(|| ConfigError::MissingField("job name".to_string()))?;

    let mut runs_on = String::new();
    let mut matrix = None;
    let mut steps = Vec::new();
    let mut env = HashMap::new();

    if let Some(children) = node.children() {
        for child in children.nodes() {
            match child.name().value() {
                "runs-on" | "runs_on" => {
                    runs_on = first_string_arg(child).unwrap_or_default();
                }
                "matrix" => {
                    if matrix.is_some() {
                        return Err(ConfigError::Duplicate(format!(
                            "matrix in job '{}'",
                            name
                        )));
                    }
                    matrix = Some(parse_matrix(child, &name)?);
                }
                "env" => {
                    env.extend(string_map(child));
                }
                "step" => {
                    steps.push(parse_step(child, &name)?);
                }
                // Bare action nodes are steps named after their action.
                other => {
                    if let Some(action) = parse_action(child)? {
                        steps.push(Step::new(default_step_name(&action), action));
                    } else {
                        return Err(ConfigError::InvalidValue {
                            field: format!("job '{}'", name),
                            message: format!("unknown node: {}", other),
                        });
                    }
                }
            }
        }
    }

    Ok(JobTemplate {
        name,
        runs_on,
        matrix,
        steps,
        env,
    })
}

fn parse_matrix(node: &KdlNode, job: &str) -> ConfigResult<MatrixAxis> {
    let mut args = string_args(node);
    if args.len() != arg_count(node) {
        return Err(ConfigError::InvalidValue {
            field: format!("matrix of job '{}'", job),
            message: "matrix values must be strings".to_string(),
        });
    }
    if args.is_empty() {
        return Err(ConfigError::MissingField(format!(
            "matrix key for job '{}'",
            job
        )));
    }
    let key = args.remove(0);
    Ok(MatrixAxis::new(key, args))
}

fn parse_step(node: &KdlNode, job: &str) -> ConfigResult<Step> {
    let mut action = None;

    if let Some(children) = node.children() {
        for child in children.nodes() {
            let Some(parsed) = parse_action(child)? else {
                continue;
            };
            if action.is_some() {
                return Err(ConfigError::Duplicate(format!(
                    "action in step of job '{}'",
                    job
                )));
            }
            action = Some(parsed);
        }
    }

    let action = action.ok_or_else(|| {
        ConfigError::MissingField(format!(
            "action for step '{}' in job '{}'",
            first_string_arg(node).unwrap_or_default(),
            job
        ))
    })?;

    let name = first_string_arg(node).unwrap_or_else(|| default_step_name(&action));
    Ok(Step::new(name, action))
}

/// Parse an action node; `None` when the node is not an action.
fn parse_action(node: &KdlNode) -> ConfigResult<Option<StepAction>> {
    let kind = node.name().value();
    let required_arg = |what: &str| {
        first_string_arg(node).ok_or_else(|| ConfigError::MissingField(format!("{} {}", kind, what)))
    };

    let action = match kind {
        "checkout" => StepAction::Checkout,
        "toolchain" => StepAction::Toolchain {
            channel: required_arg("channel")?,
        },
        "component" => StepAction::Component {
            name: required_arg("name")?,
        },
        "run" => StepAction::Run {
            command: required_arg("command")?,
        },
        _ => return Ok(None),
    };
    Ok(Some(action))
}

fn default_step_name(action: &StepAction) -> String {
    match action {
        StepAction::Checkout => "Checkout".to_string(),
        StepAction::Toolchain { channel } => format!("Select toolchain {}", channel),
        StepAction::Component { name } => format!("Install {}", name),
        StepAction::Run { command } => command.clone(),
    }
}
