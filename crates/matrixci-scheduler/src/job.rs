//! Job executor: runs one job's steps to completion or first failure.

use chrono::Utc;
use matrixci_core::JobId;
use matrixci_core::environment::{Environment, EnvironmentProvider, StepContext};
use matrixci_core::job::{JobInstance, JobReport, JobState, StepReport, StepStatus};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::context::RunContext;
use crate::events::RunEvent;

/// How a job left the executor.
#[derive(Debug, Clone)]
pub enum JobOutcome {
    /// The job reached a terminal state.
    Completed(JobReport),
    /// The run was superseded before the job finished; nothing to aggregate.
    Cancelled { job_id: JobId },
}

#[derive(Debug)]
struct StepFailure {
    step: String,
    exit_code: Option<i32>,
    message: String,
}

/// Executes job instances against environments from a provider.
pub struct JobExecutor {
    provider: Arc<dyn EnvironmentProvider>,
    job_timeout: Option<Duration>,
}

impl JobExecutor {
    pub fn new(provider: Arc<dyn EnvironmentProvider>) -> Self {
        Self {
            provider,
            job_timeout: None,
        }
    }

    /// Fail jobs that run longer than `timeout`.
    pub fn with_job_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.job_timeout = timeout;
        self
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Run one job. Never returns an error: failures are terminal job states.
    ///
    /// The environment acquired for the job is torn down exactly once on every
    /// exit path, including cancellation and timeout.
    pub async fn run(
        &self,
        ctx: &RunContext,
        job: JobInstance,
        events: &mpsc::Sender<RunEvent>,
    ) -> JobOutcome {
        let mut cancel = ctx.cancel.clone();
        if cancel.is_cancelled() {
            return JobOutcome::Cancelled { job_id: job.id };
        }

        let started_at = Utc::now();
        info!(run_id = %ctx.run_id(), job = %job.name, env = %job.environment, "Job started");
        let _ = events
            .send(RunEvent::JobStarted {
                job_id: job.id,
                job: job.name.clone(),
                environment: job.environment.clone(),
            })
            .await;

        // Provisioning runs to completion so an environment created while the
        // run is being cancelled is still owned here and torn down below.
        let mut environment = match self.provider.provision(&job.environment, job.id).await {
            Ok(environment) if cancel.is_cancelled() => {
                info!(job = %job.name, "Job cancelled during provisioning");
                let handle = environment.handle().to_string();
                if let Err(e) = environment.teardown().await {
                    warn!(job = %job.name, environment = %handle, error = %e, "Environment teardown failed");
                }
                return JobOutcome::Cancelled { job_id: job.id };
            }
            Ok(environment) => environment,
            Err(e) if cancel.is_cancelled() => {
                info!(job = %job.name, error = %e, "Job cancelled during provisioning");
                return JobOutcome::Cancelled { job_id: job.id };
            }
            Err(e) => {
                error!(job = %job.name, env = %job.environment, error = %e, "Provisioning failed");
                let steps = job.steps.iter().map(|s| StepReport::skipped(&s.name)).collect();
                let state = JobState::Failed {
                    started_at: Some(started_at),
                    finished_at: Utc::now(),
                    failed_step: None,
                    exit_code: None,
                    message: e.to_string(),
                };
                return self.finish(job, state, steps, events).await;
            }
        };

        let mut steps = Vec::with_capacity(job.steps.len());
        let result = {
            let run_steps = Self::run_steps(environment.as_mut(), ctx, &job, events, &mut steps);
            let limited = async {
                match self.job_timeout {
                    Some(limit) => tokio::time::timeout(limit, run_steps)
                        .await
                        .map_err(|_| limit),
                    None => Ok(run_steps.await),
                }
            };
            tokio::select! {
                result = limited => Some(result),
                _ = cancel.cancelled() => None,
            }
        };

        let handle = environment.handle().to_string();
        if let Err(e) = environment.teardown().await {
            warn!(job = %job.name, environment = %handle, error = %e, "Environment teardown failed");
        }

        let finished_at = Utc::now();
        let state = match result {
            None => {
                info!(job = %job.name, "Job cancelled");
                return JobOutcome::Cancelled { job_id: job.id };
            }
            Some(Ok(None)) => JobState::Succeeded {
                started_at,
                finished_at,
            },
            Some(Ok(Some(failure))) => JobState::Failed {
                started_at: Some(started_at),
                finished_at,
                failed_step: Some(failure.step),
                exit_code: failure.exit_code,
                message: failure.message,
            },
            Some(Err(limit)) => JobState::Failed {
                started_at: Some(started_at),
                finished_at,
                failed_step: job.steps.get(steps.len()).map(|s| s.name.clone()),
                exit_code: None,
                message: format!("job timed out after {}s", limit.as_secs()),
            },
        };

        steps.extend(
            job.steps
                .iter()
                .skip(steps.len())
                .map(|s| StepReport::skipped(&s.name)),
        );

        self.finish(job, state, steps, events).await
    }

    /// Execute steps in order, stopping at the first failure.
    async fn run_steps(
        environment: &mut dyn Environment,
        ctx: &RunContext,
        job: &JobInstance,
        events: &mpsc::Sender<RunEvent>,
        reports: &mut Vec<StepReport>,
    ) -> Option<StepFailure> {
        for step in &job.steps {
            let _ = events
                .send(RunEvent::StepStarted {
                    job: job.name.clone(),
                    step: step.name.clone(),
                })
                .await;

            let step_ctx = StepContext {
                run_id: ctx.run_id(),
                job_id: job.id,
                job_name: job.name.clone(),
                step_name: step.name.clone(),
                env: job.env.clone(),
                source: ctx.source.clone(),
            };

            let started_at = Utc::now();
            let result = environment.execute(&step.action, &step_ctx).await;
            let finished_at = Utc::now();

            let status = match result {
                Ok(outcome) => {
                    for line in outcome.logs.iter().cloned() {
                        let _ = events
                            .send(RunEvent::StepLog {
                                job: job.name.clone(),
                                step: step.name.clone(),
                                line,
                            })
                            .await;
                    }
                    if outcome.success() {
                        StepStatus::Succeeded
                    } else {
                        StepStatus::Failed {
                            exit_code: outcome.exit_code,
                            message: match outcome.exit_code {
                                Some(code) => format!("exited with status {}", code),
                                None => "terminated by signal".to_string(),
                            },
                        }
                    }
                }
                Err(e) => StepStatus::Failed {
                    exit_code: None,
                    message: e.to_string(),
                },
            };

            let success = status == StepStatus::Succeeded;
            let _ = events
                .send(RunEvent::StepCompleted {
                    job: job.name.clone(),
                    step: step.name.clone(),
                    success,
                })
                .await;

            reports.push(StepReport {
                name: step.name.clone(),
                status: status.clone(),
                started_at: Some(started_at),
                finished_at: Some(finished_at),
            });

            if let StepStatus::Failed { exit_code, message } = status {
                warn!(job = %job.name, step = %step.name, ?exit_code, "Step failed");
                return Some(StepFailure {
                    step: step.name.clone(),
                    exit_code,
                    message,
                });
            }
        }

        None
    }

    async fn finish(
        &self,
        job: JobInstance,
        state: JobState,
        steps: Vec<StepReport>,
        events: &mpsc::Sender<RunEvent>,
    ) -> JobOutcome {
        let success = state.is_success();
        if success {
            info!(job = %job.name, "Job succeeded");
        } else {
            info!(job = %job.name, "Job failed");
        }

        let _ = events
            .send(RunEvent::JobCompleted {
                job: job.name.clone(),
                success,
            })
            .await;

        JobOutcome::Completed(JobReport {
            job_id: job.id,
            name: job.name,
            template: job.template,
            environment: job.environment,
            state,
            steps,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::cancellation;
    use crate::testing::{ScriptedProvider, job_instance, run_context};
    use std::sync::atomic::Ordering;

    fn completed(outcome: JobOutcome) -> JobReport {
        match outcome {
            JobOutcome::Completed(report) => report,
            JobOutcome::Cancelled { .. } => panic!("job was cancelled"),
        }
    }

    #[tokio::test]
    async fn test_all_steps_succeed() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = JobExecutor::new(provider.clone());
        let (tx, _rx) = mpsc::channel(100);

        let report = completed(
            executor
                .run(&run_context(), job_instance("a", &["one", "two", "three"]), &tx)
                .await,
        );

        assert!(report.passed());
        assert_eq!(report.executed_steps(), 3);
        assert_eq!(provider.executed("a"), vec!["one", "two", "three"]);
        assert_eq!(provider.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_failed_step_skips_the_rest() {
        let provider = Arc::new(ScriptedProvider::new().exit("a", "two", 1));
        let executor = JobExecutor::new(provider.clone());
        let (tx, _rx) = mpsc::channel(100);

        let report = completed(
            executor
                .run(&run_context(), job_instance("a", &["one", "two", "three"]), &tx)
                .await,
        );

        assert!(!report.passed());
        match &report.state {
            JobState::Failed {
                failed_step,
                exit_code,
                ..
            } => {
                assert_eq!(failed_step.as_deref(), Some("two"));
                assert_eq!(*exit_code, Some(1));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(provider.executed("a"), vec!["one", "two"]);
        assert_eq!(report.steps[2].status, StepStatus::Skipped);
        assert_eq!(provider.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_provisioning_failure_fails_job() {
        let provider = Arc::new(ScriptedProvider::new().unavailable("a"));
        let executor = JobExecutor::new(provider.clone());
        let (tx, _rx) = mpsc::channel(100);

        let report = completed(
            executor
                .run(&run_context(), job_instance("a", &["one"]), &tx)
                .await,
        );

        assert!(matches!(
            report.state,
            JobState::Failed {
                failed_step: None,
                ..
            }
        ));
        assert_eq!(report.executed_steps(), 0);
        assert!(provider.executed("a").is_empty());
        assert_eq!(provider.teardowns.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_timeout_fails_job_and_tears_down() {
        let provider = Arc::new(ScriptedProvider::new().delay(Duration::from_secs(5)));
        let executor =
            JobExecutor::new(provider.clone()).with_job_timeout(Some(Duration::from_millis(20)));
        let (tx, _rx) = mpsc::channel(100);

        let report = completed(
            executor
                .run(&run_context(), job_instance("a", &["slow", "never"]), &tx)
                .await,
        );

        match &report.state {
            JobState::Failed {
                failed_step,
                message,
                ..
            } => {
                assert_eq!(failed_step.as_deref(), Some("slow"));
                assert!(message.contains("timed out"));
            }
            other => panic!("unexpected state {:?}", other),
        }
        assert_eq!(report.steps.len(), 2);
        assert_eq!(provider.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_tears_down_and_reports_nothing() {
        let provider = Arc::new(ScriptedProvider::new().delay(Duration::from_secs(5)));
        let executor = JobExecutor::new(provider.clone());
        let (tx, _rx) = mpsc::channel(100);
        let (handle, signal) = cancellation();
        let mut ctx = run_context();
        ctx.cancel = signal;

        let job = job_instance("a", &["slow"]);
        let run = executor.run(&ctx, job, &tx);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel(matrixci_core::RunId::new());
        };
        let (outcome, ()) = tokio::join!(run, cancel);

        assert!(matches!(outcome, JobOutcome::Cancelled { .. }));
        assert_eq!(provider.provisions.load(Ordering::SeqCst), 1);
        assert_eq!(provider.teardowns.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_cancellation_during_provisioning_tears_down() {
        let provider =
            Arc::new(ScriptedProvider::new().provision_delay(Duration::from_millis(200)));
        let executor = JobExecutor::new(provider.clone());
        let (tx, _rx) = mpsc::channel(100);
        let (handle, signal) = cancellation();
        let mut ctx = run_context();
        ctx.cancel = signal;

        let run = executor.run(&ctx, job_instance("a", &["one"]), &tx);
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            handle.cancel(matrixci_core::RunId::new());
        };
        let (outcome, ()) = tokio::join!(run, cancel);

        assert!(matches!(outcome, JobOutcome::Cancelled { .. }));
        assert!(provider.executed("a").is_empty());
        assert_eq!(provider.provisions.load(Ordering::SeqCst), 1);
        assert_eq!(
            provider.teardowns.load(Ordering::SeqCst),
            provider.provisions.load(Ordering::SeqCst)
        );
    }

    #[tokio::test]
    async fn test_events_follow_step_order() {
        let provider = Arc::new(ScriptedProvider::new());
        let executor = JobExecutor::new(provider);
        let (tx, mut rx) = mpsc::channel(100);

        executor
            .run(&run_context(), job_instance("a", &["one"]), &tx)
            .await;
        drop(tx);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                RunEvent::JobStarted { .. } => "job_started",
                RunEvent::StepStarted { .. } => "step_started",
                RunEvent::StepLog { .. } => "step_log",
                RunEvent::StepCompleted { .. } => "step_completed",
                RunEvent::JobCompleted { .. } => "job_completed",
                RunEvent::RunCompleted { .. } => "run_completed",
            });
        }
        assert_eq!(
            kinds,
            vec![
                "job_started",
                "step_started",
                "step_log",
                "step_completed",
                "job_completed"
            ]
        );
    }
}
