//! # Scanner
//!
//! Single periodic actor that turns registered jobs into work items. Each
//! tick runs maintenance (reconciling jobs stuck by dead workers or lost
//! messages, resuming paused jobs, releasing error retries) and then a scan
//! pass that enqueues a work item for every schedulable job with pending
//! actions or newly available data. Ticks are driven by the feedback queue
//! and a fallback timer, so a finished work item is re-evaluated promptly.

use std::sync::Arc;
use std::time::Instant;

use chrono::{Duration, Utc};
use sea_orm::DatabaseConnection;
use tokio_util::sync::CancellationToken;

use crate::availability::{AvailabilityOracle, LeadTimeOracle};
use crate::config::AppConfig;
use crate::dates::{earlier_date, later_date, next_date};
use crate::error::EtlError;
use crate::models::scheduled_job;
use crate::notify::Notifier;
use crate::queue::DbQueue;
use crate::repositories::{ClusterRepository, JobRepository};
use crate::status::JobStatus;
use crate::workitem::WorkItem;

/// Grace added to the queue retention window before a SCHEDULED job whose
/// message never got consumed is declared stuck, in seconds.
const RETENTION_GRACE_SECS: i64 = 3600;

pub struct Scanner {
    jobs: JobRepository,
    clusters: ClusterRepository,
    work_queue: DbQueue,
    feedback_queue: DbQueue,
    oracle: Arc<dyn AvailabilityOracle>,
    notifier: Arc<dyn Notifier>,
    maintenance_interval: std::time::Duration,
    worker_keepalive_timeout: Duration,
    max_error_retries: i32,
}

impl Scanner {
    pub fn new(db: DatabaseConnection, config: &AppConfig, notifier: Arc<dyn Notifier>) -> Self {
        Self::with_oracle(db, config, notifier, Arc::new(LeadTimeOracle::new()))
    }

    pub fn with_oracle(
        db: DatabaseConnection,
        config: &AppConfig,
        notifier: Arc<dyn Notifier>,
        oracle: Arc<dyn AvailabilityOracle>,
    ) -> Self {
        Self {
            jobs: JobRepository::new(db.clone()),
            clusters: ClusterRepository::new(db.clone()),
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
            oracle,
            notifier,
            maintenance_interval: std::time::Duration::from_secs(
                config.scanner.maintenance_interval_seconds,
            ),
            worker_keepalive_timeout: Duration::seconds(
                config.scanner.worker_keepalive_timeout_seconds as i64,
            ),
            max_error_retries: config.retry.max_error_retries,
        }
    }

    /// Main loop: tick on every feedback ping or after the maintenance
    /// interval elapses, whichever comes first.
    #[tracing::instrument(name = "scanner", skip_all)]
    pub async fn run(self, shutdown: CancellationToken) {
        tracing::info!(queue = %self.work_queue.name(), "Scanner started");
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => break,
                received = self.feedback_queue.receive(self.maintenance_interval) => received,
            };

            match received {
                Ok(Some(message)) => {
                    if let Err(e) = self.feedback_queue.delete(message.id).await {
                        tracing::warn!("Failed to acknowledge feedback message: {e}");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    if e.is_transient() {
                        tracing::warn!("Feedback queue unavailable, backing off: {e}");
                    } else {
                        tracing::error!("Feedback queue receive failed, backing off: {e}");
                    }
                    tokio::select! {
                        _ = shutdown.cancelled() => break,
                        _ = tokio::time::sleep(self.feedback_queue.wait_time()) => {}
                    }
                    continue;
                }
            }

            if let Err(e) = self.tick().await {
                tracing::error!("Scanner tick failed: {e}");
            }

            // One ping is enough to trigger a full pass; drop the backlog.
            if let Err(e) = self.feedback_queue.purge().await {
                tracing::warn!("Failed to purge feedback queue: {e}");
            }
        }
        tracing::info!("Scanner stopped");
    }

    /// One maintenance + scan pass.
    pub async fn tick(&self) -> Result<(), EtlError> {
        let started = Instant::now();
        self.run_maintenance().await?;
        self.run_scan().await?;
        metrics::histogram!("etl_scanner_tick_duration_seconds")
            .record(started.elapsed().as_secs_f64());
        Ok(())
    }

    async fn run_maintenance(&self) -> Result<(), EtlError> {
        let now = Utc::now().fixed_offset();

        // Pass 1: SCHEDULED jobs whose work item must be gone by now. The
        // worker either never saw it or died before claiming the job.
        let retention = self.work_queue.retention_period();
        let stuck_after = Duration::seconds(retention.as_secs() as i64 + RETENTION_GRACE_SECS);
        for job in self.jobs.jobs_with_status(JobStatus::Scheduled).await? {
            if now - job.status_last_updated_at > stuck_after {
                self.reset_job(&job, JobStatus::Scheduled, "stuck scheduled job")
                    .await;
            }
        }

        // Pass 2: PAUSED jobs with a withdrawn pause or a pending cancel.
        for job in self.jobs.jobs_with_status(JobStatus::Paused).await? {
            if let Err(e) = self.maintain_paused_job(&job).await {
                tracing::error!(job_key = %job.job_key, "Paused-job maintenance failed: {e}");
            }
        }

        // Pass 3: RUNNING jobs whose worker heartbeat went silent.
        for job in self.jobs.jobs_with_status(JobStatus::Running).await? {
            if now - job.status_last_updated_at > self.worker_keepalive_timeout {
                self.reset_job(&job, JobStatus::Running, "stuck running job")
                    .await;
            }
        }

        // Pass 4: ERROR jobs. A pending action releases the job right away
        // so the worker can honor it; otherwise the backoff gate applies
        // and a reset consumes one retry from the budget.
        for job in self.jobs.jobs_with_status(JobStatus::Error).await? {
            if job.action_pending() {
                self.reset_job(&job, JobStatus::Error, "error job with pending action")
                    .await;
                continue;
            }
            let retry_due = job.next_retry_at.map(|at| at <= now).unwrap_or(true);
            if retry_due && job.num_error_retries < self.max_error_retries {
                match self.jobs.consume_retry(&job.job_key).await {
                    Ok(true) => {
                        tracing::info!(
                            job_key = %job.job_key,
                            attempt = job.num_error_retries + 1,
                            max = self.max_error_retries,
                            "Releasing error job for retry"
                        );
                        metrics::counter!("etl_scanner_maintenance_resets_total", "pass" => "error")
                            .increment(1);
                    }
                    Ok(false) => {}
                    Err(e) => {
                        tracing::error!(job_key = %job.job_key, "Retry release failed: {e}")
                    }
                }
            }
        }

        Ok(())
    }

    async fn maintain_paused_job(&self, job: &scheduled_job::Model) -> Result<(), EtlError> {
        if job.cancel_requested {
            self.reset_job(job, JobStatus::Paused, "paused job with pending cancel")
                .await;
            return Ok(());
        }
        if job.pause_requested {
            return Ok(());
        }

        // Pause withdrawn: resume to EMPTY when the job can run right away
        // (or never ran), otherwise park it in SUCCESS until data shows up.
        let ready = self.should_process(job).await?;
        let resume_to = if ready || job.last_successful_date.is_none() {
            JobStatus::Empty
        } else {
            JobStatus::Success
        };
        if self
            .jobs
            .try_transition(&job.job_key, JobStatus::Paused, resume_to)
            .await?
        {
            tracing::info!(job_key = %job.job_key, status = %resume_to, "Resumed paused job");
            metrics::counter!("etl_scanner_maintenance_resets_total", "pass" => "paused")
                .increment(1);
            let extra = if ready {
                "Job will start immediately."
            } else {
                "Job will start when new data is available."
            };
            self.notifier.notify(resume_to, job, Some(extra)).await;
        }
        Ok(())
    }

    async fn reset_job(&self, job: &scheduled_job::Model, observed: JobStatus, reason: &str) {
        match self
            .jobs
            .try_transition(&job.job_key, observed, JobStatus::Empty)
            .await
        {
            Ok(true) => {
                tracing::info!(job_key = %job.job_key, reason, "Reset job to EMPTY");
                metrics::counter!(
                    "etl_scanner_maintenance_resets_total",
                    "pass" => observed.as_str(),
                )
                .increment(1);
            }
            Ok(false) => {}
            Err(e) => tracing::error!(job_key = %job.job_key, reason, "Reset failed: {e}"),
        }
    }

    async fn run_scan(&self) -> Result<(), EtlError> {
        let mut candidates = Vec::new();
        for status in JobStatus::SCHEDULABLE {
            candidates.extend(self.jobs.jobs_with_status(status).await?);
        }
        tracing::debug!(count = candidates.len(), "Schedulable jobs to consider");

        for job in candidates {
            if let Err(e) = self.scan_job(&job).await {
                tracing::error!(job_key = %job.job_key, "Skipping job after scan error: {e}");
            }
        }
        Ok(())
    }

    async fn scan_job(&self, job: &scheduled_job::Model) -> Result<(), EtlError> {
        let max_available = self.oracle.max_complete_date(job).await?;

        if !job.action_pending() && !self.data_available(job, max_available.as_deref())? {
            tracing::debug!(job_key = %job.job_key, "No processing needed");
            return Ok(());
        }

        // Win the guard before enqueueing so a racing scanner replica
        // cannot double-schedule this job.
        let observed = JobStatus::parse(&job.status)?;
        if !self
            .jobs
            .try_transition(&job.job_key, observed, JobStatus::Scheduled)
            .await?
        {
            tracing::info!(job_key = %job.job_key, "Lost the scheduling race; skipping");
            return Ok(());
        }

        let resume_from = next_date(job.last_successful_date.as_deref(), 1)?;
        let run_start = later_date(Some(&job.start_date), resume_from.as_deref())
            .unwrap_or(&job.start_date)
            .to_string();
        let run_end = earlier_date(job.end_date.as_deref(), max_available.as_deref())
            .unwrap_or(&run_start)
            .to_string();

        let endpoint = self.clusters.resolve(&job.cluster_id).await?;
        let item = WorkItem::from_job(job, run_start, run_end, &endpoint);
        self.work_queue.send(&item).await?;

        tracing::info!(
            job_key = %job.job_key,
            run_start = %item.run_start_date,
            run_end = %item.run_end_date,
            "Enqueued work item"
        );
        metrics::counter!("etl_scanner_jobs_scheduled_total").increment(1);
        Ok(())
    }

    /// Whether the next unprocessed date of this job has complete data.
    async fn should_process(&self, job: &scheduled_job::Model) -> Result<bool, EtlError> {
        let max_available = self.oracle.max_complete_date(job).await?;
        self.data_available(job, max_available.as_deref())
    }

    fn data_available(
        &self,
        job: &scheduled_job::Model,
        max_available: Option<&str>,
    ) -> Result<bool, EtlError> {
        let needed = match job.last_successful_date.as_deref() {
            Some(watermark) => next_date(Some(watermark), 1)?,
            None => Some(job.start_date.clone()),
        };
        Ok(matches!(
            (needed.as_deref(), max_available),
            (Some(needed), Some(available)) if needed <= available
        ))
    }
}
