//! # Worker
//!
//! Consumes work items from the work queue and executes them. One message
//! at a time: claim the job with the guarded SCHEDULED -> RUNNING
//! transition, delete the message, run the window through the execution
//! engine, then persist the final status and ping the feedback queue so
//! the scanner re-evaluates promptly.

pub mod engine;
pub mod policy;
pub mod results;
pub mod steps;

use std::sync::Arc;

use sea_orm::DatabaseConnection;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::config::AppConfig;
use crate::error::EtlError;
use crate::notify::Notifier;
use crate::queue::{DbQueue, ReceivedMessage};
use crate::repositories::{JobRepository, RunRepository};
use crate::status::JobStatus;
use crate::workitem::WorkItem;
use engine::{EngineSettings, execute_work_item};
use policy::EtLoadInterleaver;
use results::parse_results;
use steps::{CommandStepRunner, FakeStepRunner, StepRunner};

/// Ping sent to the scanner after a work item finishes, so the next scan
/// pass does not wait out the maintenance interval.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackPing {
    pub job_key: String,
    pub status: JobStatus,
}

pub struct Worker {
    jobs: JobRepository,
    runs: RunRepository,
    work_queue: DbQueue,
    feedback_queue: DbQueue,
    runner: Arc<dyn StepRunner>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
    retry_base: chrono::Duration,
}

impl Worker {
    pub fn new(db: DatabaseConnection, config: &AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        let runner: Arc<dyn StepRunner> = match (&config.worker.step_command, config.worker.dummy_run)
        {
            (Some(program), false) => Arc::new(CommandStepRunner::new(program)),
            _ => Arc::new(FakeStepRunner::new()),
        };
        Self::with_runner(db, config, notifier, runner)
    }

    pub fn with_runner(
        db: DatabaseConnection,
        config: &AppConfig,
        notifier: Arc<dyn Notifier>,
        runner: Arc<dyn StepRunner>,
    ) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            runs: RunRepository::new(db.clone()),
            work_queue: DbQueue::new(
                db.clone(),
                config.queue.work_queue_name.clone(),
                config.queue.tuning.clone(),
            ),
            feedback_queue: DbQueue::new(
                db,
                config.queue.feedback_queue_name.clone(),
                config.queue.tuning.clone(),
            ),
            runner,
            notifier,
            settings: EngineSettings::from_config(&config.worker),
            retry_base: chrono::Duration::seconds(config.retry.retry_base_seconds),
        }
    }

    /// Main loop: one work item at a time until shutdown.
    #[tracing::instrument(name = "worker", skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(queue = %self.work_queue.name(), "Worker started");
        loop {
            let message = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.work_queue.receive(self.work_queue.wait_time()) => received,
            };

            match message {
                Ok(Some(message)) => {
                    if let Err(e) = self.process_message(message, &shutdown).await {
                        tracing::error!("Work item processing failed: {e}");
                        metrics::counter!("etl_worker_messages_failed_total").increment(1);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("Work queue unavailable, backing off: {e}");
                    } else {
                        tracing::error!("Work queue receive failed, backing off: {e}");
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.work_queue.wait_time()) => {}
                    }
                }
            }
        }
        tracing::info!("Worker stopped");
    }

    async fn process_message(
        &self,
        message: ReceivedMessage,
        shutdown: &CancellationToken,
    ) -> Result<(), EtlError> {
        let item: WorkItem = match message.body_as() {
            Ok(item) => item,
            Err(e) => {
                tracing::error!(message_id = %message.id, "Dropping malformed work item: {e}");
                self.work_queue.delete(message.id).await?;
                return Ok(());
            }
        };

        let Some(job) = self.jobs.get(&item.job_key).await? else {
            tracing::warn!(job_key = %item.job_key, "Work item for a job that no longer exists");
            self.work_queue.delete(message.id).await?;
            return Ok(());
        };

        // Claim the job. A job that is not SCHEDULED, or that another
        // worker claims first, makes this message stale.
        let observed = JobStatus::parse(&job.status)?;
        if observed != JobStatus::Scheduled {
            tracing::warn!(
                job_key = %item.job_key,
                status = %observed,
                "Job not in SCHEDULED; dropping stale work item"
            );
            self.work_queue.delete(message.id).await?;
            return Ok(());
        }
        if !self
            .jobs
            .try_transition(&item.job_key, JobStatus::Scheduled, JobStatus::Running)
            .await?
        {
            tracing::warn!(job_key = %item.job_key, "Lost the claim to another worker");
            self.work_queue.delete(message.id).await?;
            return Ok(());
        }

        // Ours now; the claim, not the queue, protects against redelivery.
        self.work_queue.delete(message.id).await?;

        tracing::info!(
            job_key = %item.job_key,
            run_start = %item.run_start_date,
            run_end = %item.run_end_date,
            days = item.run_days().unwrap_or(0),
            "Executing work item"
        );

        let mut policy = EtLoadInterleaver::new(&item.run_start_date, &item.run_end_date)?;
        let outcome = match execute_work_item(
            &item,
            &mut policy,
            Arc::clone(&self.runner),
            &self.jobs,
            &self.runs,
            &self.settings,
            shutdown,
        )
        .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                tracing::error!(job_key = %item.job_key, "Execution failed: {e}");
                self.finalize(&item, JobStatus::Error, None, Some(&e.to_string()))
                    .await;
                return Err(e);
            }
        };

        if outcome.deleted {
            tracing::info!(job_key = %item.job_key, "Job deleted during execution");
            self.ping_feedback(&item.job_key, JobStatus::Deleted).await;
            metrics::counter!("etl_worker_messages_processed_total").increment(1);
            return Ok(());
        }

        let parsed = parse_results(&outcome.results, item.end_date.as_deref());
        // COMPLETE means every configured date landed; a late cancel or
        // pause request has nothing left to act on.
        let final_status = if parsed.status == JobStatus::Complete {
            JobStatus::Complete
        } else if outcome.flags.cancel {
            JobStatus::Cancelled
        } else if outcome.flags.pause {
            JobStatus::Paused
        } else {
            parsed.status
        };

        let extra = parsed.extra_info.as_ref().map(|v| v.to_string());
        self.finalize(
            &item,
            final_status,
            parsed.last_successful_date.as_deref(),
            extra.as_deref(),
        )
        .await;

        metrics::counter!("etl_worker_messages_processed_total").increment(1);
        Ok(())
    }

    /// Persist the final status, ping the scanner, and notify contacts.
    /// Everything here is best-effort relative to the already-recorded run
    /// results.
    async fn finalize(
        &self,
        item: &WorkItem,
        final_status: JobStatus,
        last_successful_date: Option<&str>,
        extra_info: Option<&str>,
    ) {
        match self
            .jobs
            .complete_run(&item.job_key, final_status, last_successful_date, self.retry_base)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                tracing::warn!(
                    job_key = %item.job_key,
                    status = %final_status,
                    "Final status write lost its guard; job was reclaimed"
                );
            }
            Err(e) => {
                tracing::error!(job_key = %item.job_key, "Failed to write final status: {e}");
            }
        }

        // A consumed cancel must not fire again if the job is resubmitted,
        // and a stale pause or delete on a cancelled job has nothing left
        // to act on. Outside the cancel path the pause flag stays set; the
        // scanner reads it to decide when to resume the job.
        if final_status == JobStatus::Cancelled {
            if let Err(e) = self.jobs.clear_action_flags(&item.job_key).await {
                tracing::warn!(job_key = %item.job_key, "Failed to clear action flags: {e}");
            }
        }

        self.ping_feedback(&item.job_key, final_status).await;

        match self.jobs.get(&item.job_key).await {
            Ok(Some(job)) => self.notifier.notify(final_status, &job, extra_info).await,
            Ok(None) => {}
            Err(e) => tracing::warn!(job_key = %item.job_key, "Skipping notification: {e}"),
        }
    }

    async fn ping_feedback(&self, job_key: &str, status: JobStatus) {
        let ping = FeedbackPing {
            job_key: job_key.to_string(),
            status,
        };
        if let Err(e) = self.feedback_queue.send(&ping).await {
            tracing::warn!(job_key = %job_key, "Feedback ping failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;
    use std::time::Duration;

    use crate::notify::LogNotifier;
    use crate::repositories::ClusterRepository;
    use crate::repositories::scheduled_job::NewJob;

    async fn setup() -> (DatabaseConnection, AppConfig) {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        ClusterRepository::new(db.clone())
            .insert("cluster-1", "warehouse.internal", 5439, "public")
            .await
            .unwrap();
        let mut config = AppConfig::default();
        config.queue.tuning.poll_interval_ms = 5;
        (db, config)
    }

    async fn scheduled_job(db: &DatabaseConnection, end: &str) -> crate::models::scheduled_job::Model {
        let jobs = JobRepository::new(db.clone());
        let job = jobs
            .insert(NewJob {
                cluster_id: "cluster-1".into(),
                log_name: "ranger".into(),
                log_schema_version: "3".into(),
                source_path: "s3://logs/ranger".into(),
                start_date: "2014-01-01".into(),
                end_date: Some(end.into()),
                contact_emails: None,
                additional_arguments: None,
                data_lead_time: None,
            })
            .await
            .unwrap();
        jobs.try_transition(&job.job_key, JobStatus::Empty, JobStatus::Scheduled)
            .await
            .unwrap();
        job
    }

    fn item_for(job: &crate::models::scheduled_job::Model, run_end: &str) -> WorkItem {
        WorkItem {
            job_key: job.job_key.clone(),
            job_id: job.id,
            log_name: job.log_name.clone(),
            log_schema_version: job.log_schema_version.clone(),
            source_path: job.source_path.clone(),
            start_date: job.start_date.clone(),
            end_date: job.end_date.clone(),
            run_start_date: "2014-01-01".into(),
            run_end_date: run_end.into(),
            contact_emails: None,
            additional_arguments: None,
            cluster_id: job.cluster_id.clone(),
            cluster_host: "warehouse.internal".into(),
            cluster_port: 5439,
            cluster_schema: "public".into(),
        }
    }

    #[tokio::test]
    async fn processes_a_work_item_to_complete() {
        let (db, config) = setup().await;
        let job = scheduled_job(&db, "2014-01-02").await;
        let worker = Worker::new(db.clone(), &config, Arc::new(LogNotifier));

        let work = DbQueue::new(db.clone(), "etl-work", config.queue.tuning.clone());
        work.send(&item_for(&job, "2014-01-02")).await.unwrap();
        let message = work.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        worker
            .process_message(message, &CancellationToken::new())
            .await
            .unwrap();

        let jobs = JobRepository::new(db.clone());
        let stored = jobs.get_required(&job.job_key).await.unwrap();
        assert_eq!(stored.status, "complete");
        assert_eq!(stored.last_successful_date.as_deref(), Some("2014-01-02"));

        // Feedback ping waiting for the scanner, work queue drained.
        let feedback = DbQueue::new(db, "etl-feedback", config.queue.tuning.clone());
        let ping = feedback
            .receive(Duration::from_millis(50))
            .await
            .unwrap()
            .unwrap();
        let ping: FeedbackPing = ping.body_as().unwrap();
        assert_eq!(ping.status, JobStatus::Complete);
        assert!(work.receive(Duration::from_millis(20)).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn failed_run_parks_the_job_in_error_with_backoff() {
        let (db, config) = setup().await;
        let job = scheduled_job(&db, "2014-01-02").await;
        let runner = FakeStepRunner::new().failing("2014-01-02", results::Step::Load);
        let worker =
            Worker::with_runner(db.clone(), &config, Arc::new(LogNotifier), Arc::new(runner));

        let work = DbQueue::new(db.clone(), "etl-work", config.queue.tuning.clone());
        work.send(&item_for(&job, "2014-01-02")).await.unwrap();
        let message = work.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        worker
            .process_message(message, &CancellationToken::new())
            .await
            .unwrap();

        let stored = JobRepository::new(db).get_required(&job.job_key).await.unwrap();
        assert_eq!(stored.status, "error");
        // Day one loaded before the failure.
        assert_eq!(stored.last_successful_date.as_deref(), Some("2014-01-01"));
        assert!(stored.next_retry_at.is_some());
    }

    #[tokio::test]
    async fn stale_message_for_a_running_job_is_dropped() {
        let (db, config) = setup().await;
        let job = scheduled_job(&db, "2014-01-02").await;
        let jobs = JobRepository::new(db.clone());
        jobs.try_transition(&job.job_key, JobStatus::Scheduled, JobStatus::Running)
            .await
            .unwrap();

        let worker = Worker::new(db.clone(), &config, Arc::new(LogNotifier));
        let work = DbQueue::new(db.clone(), "etl-work", config.queue.tuning.clone());
        work.send(&item_for(&job, "2014-01-02")).await.unwrap();
        let message = work.receive(Duration::from_millis(50)).await.unwrap().unwrap();

        worker
            .process_message(message, &CancellationToken::new())
            .await
            .unwrap();

        // Untouched by the stale delivery, message acknowledged.
        let stored = jobs.get_required(&job.job_key).await.unwrap();
        assert_eq!(stored.status, "running");
        assert!(work.receive(Duration::from_millis(20)).await.unwrap().is_none());
    }
}
