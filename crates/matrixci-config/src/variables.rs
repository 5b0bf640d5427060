//! Variable interpolation for workflow configurations.
//!
//! Supports variables like:
//! - `${matrix.<key>}` - Matrix value of the current job instance
//! - `${job.name}` - Job template name
//! - `${run.id}` - Run ID
//! - `${workflow.name}` - Workflow name
//! - `${git.sha}` - Head commit SHA of the triggering event
//! - `${git.short_sha}` - Short (7 char) head commit SHA
//! - `${git.branch}` - Head branch
//! - `${pr.number}` - Pull request number
//! - `${env.VAR_NAME}` - Environment variable
//!
//! Unknown variables are left in place.

use matrixci_core::run::RunInfo;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Variable context containing all available variables for interpolation.
#[derive(Debug, Clone, Default)]
pub struct VariableContext {
    pub git: GitVariables,
    pub run: RunVariables,
    pub job_name: String,
    pub pull_request: Option<u64>,
    /// Matrix values of the current job instance.
    pub matrix: HashMap<String, String>,
    pub env: HashMap<String, String>,
}

#[derive(Debug, Clone, Default)]
pub struct GitVariables {
    pub sha: String,
    pub short_sha: String,
    pub branch: String,
}

#[derive(Debug, Clone, Default)]
pub struct RunVariables {
    pub id: String,
    pub workflow: String,
}

// Regex for matching ${...} variables
static VAR_REGEX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([a-zA-Z_][a-zA-Z0-9_]*(?:\.[a-zA-Z_][a-zA-Z0-9_]*)?)\}").unwrap()
});

/// Names of all `${...}` variables referenced in a string.
pub fn referenced_variables(input: &str) -> Vec<String> {
    VAR_REGEX
        .captures_iter(input)
        .map(|caps| caps[1].to_string())
        .collect()
}

impl VariableContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Context for a run, populated from its trigger information.
    pub fn for_run(info: &RunInfo) -> Self {
        let mut builder = VariableContextBuilder::new().with_run(info.run_id.to_string(), &info.workflow);
        if let Some(sha) = &info.head_sha {
            builder = builder.with_git_sha(sha);
        }
        if let Some(number) = info.pull_request {
            builder = builder.with_pull_request(number);
        }
        builder.build()
    }

    /// Child context for one job instance.
    pub fn for_job(&self, job_name: &str, matrix: Option<(&str, &str)>) -> Self {
        let mut ctx = self.clone();
        ctx.job_name = job_name.to_string();
        if let Some((key, value)) = matrix {
            ctx.matrix.insert(key.to_string(), value.to_string());
        }
        ctx
    }

    /// Populate environment variables from the current process environment.
    pub fn populate_env(&mut self) {
        self.env.extend(std::env::vars());
    }

    /// Resolve a variable name to its value.
    pub fn resolve(&self, var_name: &str) -> Option<String> {
        let parts: Vec<&str> = var_name.split('.').collect();

        match parts.as_slice() {
            ["matrix", key] => self.matrix.get(*key).cloned(),
            ["job", "name"] => Some(self.job_name.clone()),
            ["run", "id"] => Some(self.run.id.clone()),
            ["workflow", "name"] => Some(self.run.workflow.clone()),
            ["git", "sha"] => Some(self.git.sha.clone()),
            ["git", "short_sha"] => Some(self.git.short_sha.clone()),
            ["git", "branch"] => Some(self.git.branch.clone()),
            ["pr", "number"] => self.pull_request.map(|n| n.to_string()),
            ["env", name] => self.env.get(*name).cloned(),
            _ => None,
        }
    }

    /// Interpolate all variables in a string.
    pub fn interpolate(&self, input: &str) -> String {
        VAR_REGEX
            .replace_all(input, |caps: &regex::Captures| {
                let var_name = &caps[1];
                self.resolve(var_name)
                    .unwrap_or_else(|| format!("${{{}}}", var_name))
            })
            .to_string()
    }

    /// Interpolate variables in the values of a map.
    pub fn interpolate_map(&self, map: &HashMap<String, String>) -> HashMap<String, String> {
        map.iter()
            .map(|(k, v)| (k.clone(), self.interpolate(v)))
            .collect()
    }
}

/// Builder for creating VariableContext.
pub struct VariableContextBuilder {
    ctx: VariableContext,
}

impl VariableContextBuilder {
    pub fn new() -> Self {
        Self {
            ctx: VariableContext::new(),
        }
    }

    pub fn with_git_sha(mut self, sha: impl Into<String>) -> Self {
        let sha = sha.into();
        self.ctx.git.short_sha = sha.chars().take(7).collect();
        self.ctx.git.sha = sha;
        self
    }

    pub fn with_git_branch(mut self, branch: impl Into<String>) -> Self {
        self.ctx.git.branch = branch.into();
        self
    }

    pub fn with_run(mut self, id: impl Into<String>, workflow: impl Into<String>) -> Self {
        self.ctx.run.id = id.into();
        self.ctx.run.workflow = workflow.into();
        self
    }

    pub fn with_pull_request(mut self, number: u64) -> Self {
        self.ctx.pull_request = Some(number);
        self
    }

    pub fn with_matrix(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.matrix.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.ctx.env.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> VariableContext {
        self.ctx
    }
}

impl Default for VariableContextBuilder {
    fn default() -> Self {
        Self::new()
    }
}
