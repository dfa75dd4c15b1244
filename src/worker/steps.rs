//! # Step Runners
//!
//! Executes one (date, step) run. The actual ET and Load work is opaque:
//! the production runner shells out to a configured program, the fake
//! runner stands in for it in tests and dry runs. Both honor cooperative
//! cancellation.

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EtlError;
use crate::worker::results::{RunOutcome, Step};
use crate::workitem::WorkItem;

/// Fold a step failure into the error outcome recorded on the run ledger.
fn step_failure(date: &str, step: Step, detail: impl Into<String>) -> RunOutcome {
    let err = EtlError::StepFailed {
        date: date.to_string(),
        step: step.as_str().to_string(),
        detail: detail.into(),
    };
    RunOutcome::error(err.to_string())
}

#[async_trait]
pub trait StepRunner: Send + Sync {
    /// Execute one run to completion or cancellation. Infrastructure
    /// failures are folded into an error outcome; this never panics the
    /// coordinator.
    async fn run_step(
        &self,
        item: &WorkItem,
        date: &str,
        step: Step,
        cancel: &CancellationToken,
    ) -> RunOutcome;
}

/// Runs each step as a child process:
/// `<program> <step> <date> <source_path> <schema>.<log_name>` with the
/// cluster endpoint in the environment. A cancelled run kills the child.
pub struct CommandStepRunner {
    program: String,
}

impl CommandStepRunner {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
        }
    }
}

#[async_trait]
impl StepRunner for CommandStepRunner {
    async fn run_step(
        &self,
        item: &WorkItem,
        date: &str,
        step: Step,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        let table = format!("{}.{}", item.cluster_schema, item.log_name);
        let spawned = tokio::process::Command::new(&self.program)
            .arg(step.as_str())
            .arg(date)
            .arg(&item.source_path)
            .arg(&table)
            .env("ETLSCHED_CLUSTER_HOST", &item.cluster_host)
            .env("ETLSCHED_CLUSTER_PORT", item.cluster_port.to_string())
            .env("ETLSCHED_LOG_SCHEMA_VERSION", &item.log_schema_version)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .spawn();

        let mut child = match spawned {
            Ok(child) => child,
            Err(e) => {
                tracing::error!(
                    program = %self.program,
                    date = %date,
                    step = %step,
                    "Failed to spawn step process: {e}"
                );
                return step_failure(date, step, format!("spawn failed: {e}"));
            }
        };

        tokio::select! {
            status = child.wait() => match status {
                Ok(status) if status.success() => RunOutcome::success(),
                Ok(status) => step_failure(date, step, format!(
                    "step process exited with {status}"
                )),
                Err(e) => step_failure(date, step, format!("wait on step process failed: {e}")),
            },
            _ = cancel.cancelled() => {
                if let Err(e) = child.kill().await {
                    tracing::warn!(date = %date, step = %step, "Failed to kill step process: {e}");
                }
                RunOutcome::cancelled()
            }
        }
    }
}

/// In-memory runner for tests and `dummy_run` mode: sleeps briefly, then
/// reports the preconfigured outcome for the (date, step) pair.
pub struct FakeStepRunner {
    delay: Duration,
    failures: Vec<(String, Step)>,
}

impl FakeStepRunner {
    pub fn new() -> Self {
        Self {
            delay: Duration::from_millis(1),
            failures: Vec::new(),
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Make the given (date, step) run report an error.
    pub fn failing(mut self, date: impl Into<String>, step: Step) -> Self {
        self.failures.push((date.into(), step));
        self
    }
}

impl Default for FakeStepRunner {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StepRunner for FakeStepRunner {
    async fn run_step(
        &self,
        _item: &WorkItem,
        date: &str,
        step: Step,
        cancel: &CancellationToken,
    ) -> RunOutcome {
        tokio::select! {
            _ = tokio::time::sleep(self.delay) => {}
            _ = cancel.cancelled() => return RunOutcome::cancelled(),
        }
        if self.failures.iter().any(|(d, s)| d == date && *s == step) {
            RunOutcome::error(format!("injected failure for {date}/{step}"))
        } else {
            RunOutcome::success()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn item() -> WorkItem {
        WorkItem {
            job_key: "k".into(),
            job_id: Uuid::new_v4(),
            log_name: "ranger".into(),
            log_schema_version: "3".into(),
            source_path: "s3://logs/ranger".into(),
            start_date: "2014-01-01".into(),
            end_date: None,
            run_start_date: "2014-01-01".into(),
            run_end_date: "2014-01-01".into(),
            contact_emails: None,
            additional_arguments: None,
            cluster_id: "cluster-1".into(),
            cluster_host: "warehouse.internal".into(),
            cluster_port: 5439,
            cluster_schema: "public".into(),
        }
    }

    #[tokio::test]
    async fn fake_runner_reports_configured_outcomes() {
        let runner = FakeStepRunner::new().failing("2014-01-01", Step::Load);
        let token = CancellationToken::new();

        let et = runner.run_step(&item(), "2014-01-01", Step::Et, &token).await;
        assert!(et.is_success());

        let load = runner
            .run_step(&item(), "2014-01-01", Step::Load, &token)
            .await;
        assert!(!load.is_success());
        assert!(load.error_info.is_some());
    }

    #[tokio::test]
    async fn fake_runner_observes_cancellation() {
        let runner = FakeStepRunner::new().with_delay(Duration::from_secs(60));
        let token = CancellationToken::new();
        token.cancel();

        let outcome = runner.run_step(&item(), "2014-01-01", Step::Et, &token).await;
        assert_eq!(outcome.status, crate::worker::results::RunStatus::Cancelled);
    }

    #[tokio::test]
    async fn command_runner_maps_exit_codes() {
        let token = CancellationToken::new();

        let ok = CommandStepRunner::new("true");
        let outcome = ok.run_step(&item(), "2014-01-01", Step::Et, &token).await;
        assert!(outcome.is_success());

        let fail = CommandStepRunner::new("false");
        let outcome = fail.run_step(&item(), "2014-01-01", Step::Et, &token).await;
        assert!(!outcome.is_success());
        let detail = outcome.error_info.unwrap().to_string();
        assert!(detail.contains("step execution failed for 2014-01-01/et"));
    }

    #[tokio::test]
    async fn command_runner_reports_spawn_failure_as_error() {
        let token = CancellationToken::new();
        let runner = CommandStepRunner::new("/nonexistent/step-program");
        let outcome = runner.run_step(&item(), "2014-01-01", Step::Et, &token).await;
        assert!(!outcome.is_success());
        assert!(outcome.error_info.is_some());
    }
}
