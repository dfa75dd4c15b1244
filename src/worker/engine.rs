//! # Execution Engine
//!
//! Drives all runs of one work item to completion. A single coordinator
//! task owns every piece of mutable execution state; spawned step tasks do
//! nothing but run the step and report back over a channel. The bounded
//! wait on that channel doubles as the keepalive tick: whenever no
//! completion arrives in time, the coordinator heartbeats the job row and
//! re-reads the action flags on the next pass.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;
use crate::error::EtlError;
use crate::repositories::scheduled_job::ActionFlags;
use crate::repositories::{JobRepository, RunRepository};
use crate::worker::policy::{JobPolicy, RunSlot};
use crate::worker::results::{RunOutcome, RunResults, Step, StepResult};
use crate::worker::steps::StepRunner;
use crate::workitem::WorkItem;

/// Lower bound on the coordinator's wait tick. The wait exists to force
/// heartbeats and flag refreshes, not to bound step runtime.
const MIN_WAIT_FLOOR: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub max_runs_in_flight: usize,
    pub keepalive_interval: Duration,
}

impl EngineSettings {
    pub fn from_config(config: &WorkerConfig) -> Self {
        Self {
            max_runs_in_flight: config.max_runs_in_flight.max(1),
            keepalive_interval: Duration::from_secs(config.keepalive_interval_seconds)
                .max(MIN_WAIT_FLOOR),
        }
    }
}

/// What one work item execution produced.
#[derive(Debug)]
pub struct ExecutionOutcome {
    pub results: RunResults,
    /// Action flags as last observed; the worker derives the final status
    /// priority (delete > cancel > pause > computed) from these.
    pub flags: ActionFlags,
    /// The job row no longer exists; nothing further may be written to it.
    pub deleted: bool,
}

/// Execute every run the policy yields for this work item.
///
/// Returns once no run is in flight and the policy has nothing left, or
/// once a pending delete/cancel/pause has been honored. Database errors
/// and policy violations propagate to the caller's message boundary.
pub async fn execute_work_item(
    item: &WorkItem,
    policy: &mut dyn JobPolicy,
    runner: Arc<dyn StepRunner>,
    jobs: &JobRepository,
    runs: &RunRepository,
    settings: &EngineSettings,
    shutdown: &CancellationToken,
) -> Result<ExecutionOutcome, EtlError> {
    let cancel_token = CancellationToken::new();
    let (tx, mut rx) = mpsc::channel::<(RunSlot, RunOutcome)>(settings.max_runs_in_flight.max(1));

    let mut results = RunResults::new();
    let mut flags = ActionFlags::default();
    let mut in_flight: usize = 0;
    let mut cancel_in_progress = false;
    let mut pause_in_progress = false;
    let mut last_keepalive = tokio::time::Instant::now();

    loop {
        // Once both cancel and pause are being honored there is no action
        // left that could change the outcome, so skip the re-read.
        if !(cancel_in_progress && pause_in_progress) {
            flags = jobs.refresh_actions(&item.job_key).await?;
        }

        if flags.delete {
            tracing::info!(job_key = %item.job_key, "Delete requested; tearing down job");
            cancel_token.cancel();
            while in_flight > 0 {
                if rx.recv().await.is_some() {
                    in_flight -= 1;
                } else {
                    break;
                }
            }
            // Runs go first so a crash in between leaves a resumable state.
            runs.delete_job_runs(item.job_id).await?;
            jobs.delete(&item.job_key).await?;
            return Ok(ExecutionOutcome {
                results,
                flags,
                deleted: true,
            });
        }

        if flags.cancel && !cancel_in_progress {
            tracing::info!(job_key = %item.job_key, "Cancel requested; stopping in-flight runs");
            cancel_token.cancel();
            cancel_in_progress = true;
        }
        if flags.pause && !pause_in_progress {
            tracing::info!(job_key = %item.job_key, "Pause requested; draining in-flight runs");
            pause_in_progress = true;
        }

        let stop_scheduling = cancel_in_progress || pause_in_progress;
        if !stop_scheduling {
            while in_flight < settings.max_runs_in_flight {
                let Some(slot) = policy.schedule_next_run() else {
                    break;
                };
                runs.upsert_run_start(item.job_id, &slot.date, slot.step).await?;

                let runner = Arc::clone(&runner);
                let step_item = item.clone();
                let token = cancel_token.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let outcome = runner
                        .run_step(&step_item, &slot.date, slot.step, &token)
                        .await;
                    // Receiver gone means the coordinator already bailed.
                    let _ = tx.send((slot, outcome)).await;
                });
                in_flight += 1;
            }
        }

        if in_flight == 0 {
            let policy_done =
                !policy.has_more_runs_to_schedule() && !policy.has_incomplete_runs();
            if stop_scheduling || policy_done {
                break;
            }
            // Nothing in flight yet the policy claims more work: the gate
            // can never open. Surface it instead of spinning.
            return Err(EtlError::PolicyViolation(format!(
                "policy stalled with no runs in flight for job {}",
                item.job_key
            )));
        }

        tokio::select! {
            received = rx.recv() => {
                if let Some((slot, outcome)) = received {
                    in_flight -= 1;
                    record_completion(item, policy, jobs, runs, &mut results, slot, outcome)
                        .await?;
                }
            }
            // Wake with nothing to record; the heartbeat check below runs
            // on every wake.
            _ = tokio::time::sleep(settings.keepalive_interval) => {}
            _ = shutdown.cancelled(), if !cancel_in_progress => {
                tracing::info!(job_key = %item.job_key, "Shutdown; cancelling remaining runs");
                cancel_token.cancel();
                cancel_in_progress = true;
            }
        }

        // Heartbeat on every wake once the interval has elapsed, so steady
        // streams of fast completions still keep the claim fresh.
        if last_keepalive.elapsed() >= settings.keepalive_interval {
            last_keepalive = tokio::time::Instant::now();
            if !jobs.touch_keepalive(&item.job_key).await? {
                tracing::warn!(
                    job_key = %item.job_key,
                    "Lost the RUNNING claim; cancelling remaining runs"
                );
                cancel_token.cancel();
                cancel_in_progress = true;
            }
        }
    }

    Ok(ExecutionOutcome {
        results,
        flags,
        deleted: false,
    })
}

async fn record_completion(
    item: &WorkItem,
    policy: &mut dyn JobPolicy,
    jobs: &JobRepository,
    runs: &RunRepository,
    results: &mut RunResults,
    slot: RunSlot,
    outcome: RunOutcome,
) -> Result<(), EtlError> {
    runs.upsert_run_complete(item.job_id, &slot.date, slot.step, &outcome)
        .await?;
    policy.run_complete(&slot.date, slot.step, &outcome)?;

    if slot.step == Step::Load && outcome.is_success() {
        jobs.update_watermark(&item.job_key, &slot.date).await?;
    }

    metrics::counter!(
        "etl_worker_runs_completed_total",
        "step" => slot.step.as_str(),
        "status" => outcome.status.as_str(),
    )
    .increment(1);

    results.entry(slot.date).or_default().push(StepResult {
        step: slot.step,
        status: outcome.status,
        error_info: outcome.error_info,
    });
    Ok(())
}
