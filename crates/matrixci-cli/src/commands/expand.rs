//! Show the job instances a workflow expands to.

use anyhow::{Context, Result};
use matrixci_config::VariableContext;
use matrixci_core::job::JobInstance;
use matrixci_core::workflow::StepAction;
use matrixci_scheduler::MatrixExpander;
use std::path::Path;

use super::resolve_workflow;

pub fn expand(workflow: Option<&Path>, json: bool) -> Result<()> {
    let workflow = resolve_workflow(workflow, Path::new("."))?;
    // Run-level variables stay unresolved outside a run.
    let jobs = MatrixExpander::expand_workflow(&workflow, &VariableContext::new());

    if json {
        let output = serde_json::to_string_pretty(&jobs).context("Failed to serialize jobs")?;
        println!("{}", output);
        return Ok(());
    }

    println!("Workflow '{}': {} job instance(s)\n", workflow.name, jobs.len());
    for job in &jobs {
        print!("{}", describe(job));
    }
    Ok(())
}

fn describe(job: &JobInstance) -> String {
    let mut out = format!("{} [{}]\n", job.name, job.environment);
    for (i, step) in job.steps.iter().enumerate() {
        let detail = match &step.action {
            StepAction::Checkout => String::new(),
            StepAction::Toolchain { channel } => format!(": {}", channel),
            StepAction::Component { name } => format!(": {}", name),
            StepAction::Run { command } => format!(": {}", command),
        };
        out.push_str(&format!(
            "  {}. {} ({}{})\n",
            i + 1,
            step.name,
            step.action.kind(),
            detail
        ));
    }
    out
}
