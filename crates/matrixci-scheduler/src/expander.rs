//! Matrix expansion: job templates into concrete job instances.

use matrixci_config::VariableContext;
use matrixci_core::JobId;
use matrixci_core::job::{JobInstance, MatrixValue};
use matrixci_core::workflow::{EnvironmentId, JobTemplate, Step, StepAction, Workflow};
use std::collections::HashMap;

/// Expands job templates over their matrix axes.
pub struct MatrixExpander;

impl MatrixExpander {
    /// Expand every job of a workflow, in declaration order.
    pub fn expand_workflow(workflow: &Workflow, vars: &VariableContext) -> Vec<JobInstance> {
        workflow
            .jobs
            .iter()
            .flat_map(|template| Self::expand(template, &workflow.env, vars))
            .collect()
    }

    /// Expand one template: one instance per axis value, or a single
    /// instance when the template has no matrix.
    ///
    /// Each instance receives its own copy of the step list.
    pub fn expand(
        template: &JobTemplate,
        workflow_env: &HashMap<String, String>,
        vars: &VariableContext,
    ) -> Vec<JobInstance> {
        match &template.matrix {
            None => vec![Self::instantiate(template, workflow_env, vars, None)],
            Some(axis) => axis
                .values
                .iter()
                .map(|value| {
                    let matrix = MatrixValue {
                        key: axis.key.clone(),
                        value: value.clone(),
                    };
                    Self::instantiate(template, workflow_env, vars, Some(matrix))
                })
                .collect(),
        }
    }

    fn instantiate(
        template: &JobTemplate,
        workflow_env: &HashMap<String, String>,
        vars: &VariableContext,
        matrix: Option<MatrixValue>,
    ) -> JobInstance {
        let job_vars = vars.for_job(
            &template.name,
            matrix.as_ref().map(|m| (m.key.as_str(), m.value.as_str())),
        );

        let name = match &matrix {
            Some(m) => format!("{} ({})", template.name, m.value),
            None => template.name.clone(),
        };

        let mut env = workflow_env.clone();
        env.extend(template.env.clone());

        JobInstance {
            id: JobId::new(),
            name,
            template: template.name.clone(),
            environment: EnvironmentId::new(job_vars.interpolate(&template.runs_on)),
            matrix,
            steps: template
                .steps
                .iter()
                .map(|step| interpolate_step(step, &job_vars))
                .collect(),
            env: job_vars.interpolate_map(&env),
        }
    }
}

fn interpolate_step(step: &Step, vars: &VariableContext) -> Step {
    let action = match &step.action {
        StepAction::Run { command } => StepAction::Run {
            command: vars.interpolate(command),
        },
        other => other.clone(),
    };
    Step::new(vars.interpolate(&step.name), action)
}
