//! # ScheduledJob Repository
//!
//! Repository operations for the scheduled_jobs table. Status writes are
//! validated against the transition table and executed as conditional
//! updates (`WHERE status = <observed>`), so a transition only wins if no
//! other actor moved the job first. Callers must treat a lost guard as
//! "someone else got there" and skip, not retry.

use chrono::{Duration, Utc};
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::dates::later_date;
use crate::error::{self, EtlError};
use crate::models::scheduled_job::{self, ActiveModel, Column, Entity, Model};
use crate::status::JobStatus;

/// Cap on the backoff exponent so `2^n` cannot overflow for jobs that have
/// been failing for a very long time.
const MAX_BACKOFF_EXPONENT: u32 = 16;

/// Fields required to register a new job. Everything else starts at its
/// lifecycle default (EMPTY, no watermark, no retries consumed).
#[derive(Debug, Clone)]
pub struct NewJob {
    pub cluster_id: String,
    pub log_name: String,
    pub log_schema_version: String,
    pub source_path: String,
    pub start_date: String,
    pub end_date: Option<String>,
    pub contact_emails: Option<JsonValue>,
    pub additional_arguments: Option<JsonValue>,
    pub data_lead_time: Option<String>,
}

/// Out-of-band action flags snapshot, refreshed by the worker mid-run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ActionFlags {
    pub cancel: bool,
    pub pause: bool,
    pub delete: bool,
}

impl From<&Model> for ActionFlags {
    fn from(job: &Model) -> Self {
        Self {
            cancel: job.cancel_requested,
            pause: job.pause_requested,
            delete: job.delete_requested,
        }
    }
}

/// Which out-of-band action a caller wants to request or withdraw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActionKind {
    Cancel,
    Pause,
    Delete,
}

/// Repository for scheduled job database operations
pub struct JobRepository {
    db: DatabaseConnection,
}

impl JobRepository {
    /// Create a new JobRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }

    /// Register a new job in EMPTY status. A job with the same composite
    /// key maps the unique violation to [`EtlError::DuplicateJob`].
    pub async fn insert(&self, new: NewJob) -> Result<Model, EtlError> {
        let now = Utc::now().fixed_offset();
        let job_key = scheduled_job::job_key(
            &new.cluster_id,
            &new.log_name,
            &new.log_schema_version,
            &new.start_date,
            new.end_date.as_deref(),
        );

        let job = ActiveModel {
            job_key: Set(job_key.clone()),
            id: Set(Uuid::new_v4()),
            status: Set(JobStatus::Empty.as_str().to_string()),
            status_last_updated_at: Set(now),
            log_name: Set(new.log_name),
            log_schema_version: Set(new.log_schema_version),
            source_path: Set(new.source_path),
            start_date: Set(new.start_date),
            end_date: Set(new.end_date),
            last_successful_date: Set(None),
            num_error_retries: Set(0),
            next_retry_at: Set(None),
            cancel_requested: Set(false),
            cancel_requested_at: Set(None),
            pause_requested: Set(false),
            pause_requested_at: Set(None),
            delete_requested: Set(false),
            delete_requested_at: Set(None),
            contact_emails: Set(new.contact_emails),
            additional_arguments: Set(new.additional_arguments),
            cluster_id: Set(new.cluster_id),
            data_lead_time: Set(new.data_lead_time),
            created_at: Set(now),
            updated_at: Set(now),
        };

        let inserted = job.insert(&self.db).await.map_err(|e| {
            if error::is_unique_violation(&e) {
                EtlError::DuplicateJob(job_key.clone())
            } else {
                tracing::error!(job_key = %job_key, "Failed to insert scheduled job: {e}");
                EtlError::Db(e)
            }
        })?;

        tracing::info!(
            job_key = %inserted.job_key,
            cluster_id = %inserted.cluster_id,
            log_name = %inserted.log_name,
            "Scheduled job registered"
        );

        Ok(inserted)
    }

    pub async fn get(&self, job_key: &str) -> Result<Option<Model>, EtlError> {
        let job = Entity::find_by_id(job_key).one(&self.db).await?;
        Ok(job)
    }

    /// Fetch a job that is expected to exist, e.g. the job behind a work
    /// item the worker just received.
    pub async fn get_required(&self, job_key: &str) -> Result<Model, EtlError> {
        self.get(job_key)
            .await?
            .ok_or_else(|| EtlError::JobNotFound(job_key.to_string()))
    }

    /// All jobs currently in the given status, in stable key order.
    pub async fn jobs_with_status(&self, status: JobStatus) -> Result<Vec<Model>, EtlError> {
        let jobs = Entity::find()
            .filter(Column::Status.eq(status.as_str()))
            .order_by_asc(Column::JobKey)
            .all(&self.db)
            .await?;
        Ok(jobs)
    }

    /// Guarded status transition. Validates the edge against the transition
    /// table, then writes it conditionally on the observed status still
    /// being current. Returns whether this caller won the guard.
    pub async fn try_transition(
        &self,
        job_key: &str,
        observed: JobStatus,
        to: JobStatus,
    ) -> Result<bool, EtlError> {
        observed.validate_transition(to, job_key)?;

        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(to.as_str()))
            .col_expr(Column::StatusLastUpdatedAt, Expr::value(now))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::JobKey.eq(job_key))
            .filter(Column::Status.eq(observed.as_str()))
            .exec(&self.db)
            .await?;

        Ok(res.rows_affected == 1)
    }

    /// Worker heartbeat: refresh `status_last_updated_at` while RUNNING.
    /// Returns false if the job is no longer in RUNNING, which the worker
    /// treats as a signal that the scanner reclaimed it.
    pub async fn touch_keepalive(&self, job_key: &str) -> Result<bool, EtlError> {
        self.try_transition(job_key, JobStatus::Running, JobStatus::Running)
            .await
    }

    /// Finalize a finished run: write the terminal status, advance the
    /// watermark, and do the retry bookkeeping. ERROR schedules the next
    /// automatic retry with exponential backoff; SUCCESS and COMPLETE clear
    /// the retry state so long-lived jobs never exhaust their budget.
    pub async fn complete_run(
        &self,
        job_key: &str,
        final_status: JobStatus,
        last_successful_date: Option<&str>,
        retry_base: Duration,
    ) -> Result<bool, EtlError> {
        let job = self.get_required(job_key).await?;
        let observed = JobStatus::parse(&job.status)?;
        observed.validate_transition(final_status, job_key)?;

        let now = Utc::now().fixed_offset();
        let watermark = later_date(job.last_successful_date.as_deref(), last_successful_date)
            .map(str::to_string);

        let mut update = Entity::update_many()
            .col_expr(Column::Status, Expr::value(final_status.as_str()))
            .col_expr(Column::StatusLastUpdatedAt, Expr::value(now))
            .col_expr(Column::LastSuccessfulDate, Expr::value(watermark))
            .col_expr(Column::UpdatedAt, Expr::value(now));

        match final_status {
            JobStatus::Error => {
                let exponent = (job.num_error_retries.max(0) as u32).min(MAX_BACKOFF_EXPONENT);
                let backoff = retry_base * 2_i32.pow(exponent);
                update = update.col_expr(Column::NextRetryAt, Expr::value(Some(now + backoff)));
            }
            JobStatus::Success | JobStatus::Complete => {
                update = update
                    .col_expr(Column::NumErrorRetries, Expr::value(0))
                    .col_expr(Column::NextRetryAt, Expr::value(None::<chrono::DateTime<chrono::FixedOffset>>));
            }
            _ => {}
        }

        let res = update
            .filter(Column::JobKey.eq(job_key))
            .filter(Column::Status.eq(observed.as_str()))
            .exec(&self.db)
            .await?;

        Ok(res.rows_affected == 1)
    }

    /// Persist the watermark as soon as a date's load lands, so a later
    /// crash resumes from here instead of replaying the whole window.
    pub async fn update_watermark(&self, job_key: &str, date: &str) -> Result<(), EtlError> {
        let job = self.get_required(job_key).await?;
        let watermark = later_date(job.last_successful_date.as_deref(), Some(date))
            .map(str::to_string);

        let now = Utc::now().fixed_offset();
        Entity::update_many()
            .col_expr(Column::LastSuccessfulDate, Expr::value(watermark))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::JobKey.eq(job_key))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Re-read the out-of-band action flags for an in-flight job.
    pub async fn refresh_actions(&self, job_key: &str) -> Result<ActionFlags, EtlError> {
        let job = self.get_required(job_key).await?;
        Ok(ActionFlags::from(&job))
    }

    /// Request or withdraw an out-of-band action on a job.
    pub async fn set_action_flag(
        &self,
        job_key: &str,
        action: ActionKind,
        requested: bool,
    ) -> Result<(), EtlError> {
        let now = Utc::now().fixed_offset();
        let requested_at = requested.then_some(now);

        let mut update = Entity::update_many();
        update = match action {
            ActionKind::Cancel => update
                .col_expr(Column::CancelRequested, Expr::value(requested))
                .col_expr(Column::CancelRequestedAt, Expr::value(requested_at)),
            ActionKind::Pause => update
                .col_expr(Column::PauseRequested, Expr::value(requested))
                .col_expr(Column::PauseRequestedAt, Expr::value(requested_at)),
            ActionKind::Delete => update
                .col_expr(Column::DeleteRequested, Expr::value(requested))
                .col_expr(Column::DeleteRequestedAt, Expr::value(requested_at)),
        };

        let res = update
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::JobKey.eq(job_key))
            .exec(&self.db)
            .await?;

        if res.rows_affected == 0 {
            return Err(EtlError::JobNotFound(job_key.to_string()));
        }
        Ok(())
    }

    /// Clear every action flag, used when maintenance resets a job after
    /// honoring (or overriding) the pending actions.
    pub async fn clear_action_flags(&self, job_key: &str) -> Result<(), EtlError> {
        let now = Utc::now().fixed_offset();
        let no_time = None::<chrono::DateTime<chrono::FixedOffset>>;
        Entity::update_many()
            .col_expr(Column::CancelRequested, Expr::value(false))
            .col_expr(Column::CancelRequestedAt, Expr::value(no_time))
            .col_expr(Column::PauseRequested, Expr::value(false))
            .col_expr(Column::PauseRequestedAt, Expr::value(no_time))
            .col_expr(Column::DeleteRequested, Expr::value(false))
            .col_expr(Column::DeleteRequestedAt, Expr::value(no_time))
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::JobKey.eq(job_key))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Maintenance reset ERROR -> EMPTY, consuming one retry from the
    /// budget. Guarded on the job still being in ERROR.
    pub async fn consume_retry(&self, job_key: &str) -> Result<bool, EtlError> {
        JobStatus::Error.validate_transition(JobStatus::Empty, job_key)?;

        let now = Utc::now().fixed_offset();
        let res = Entity::update_many()
            .col_expr(Column::Status, Expr::value(JobStatus::Empty.as_str()))
            .col_expr(Column::StatusLastUpdatedAt, Expr::value(now))
            .col_expr(
                Column::NumErrorRetries,
                Expr::col(Column::NumErrorRetries).add(1),
            )
            .col_expr(
                Column::NextRetryAt,
                Expr::value(None::<chrono::DateTime<chrono::FixedOffset>>),
            )
            .col_expr(Column::UpdatedAt, Expr::value(now))
            .filter(Column::JobKey.eq(job_key))
            .filter(Column::Status.eq(JobStatus::Error.as_str()))
            .exec(&self.db)
            .await?;

        Ok(res.rows_affected == 1)
    }

    /// Remove the job row. Run records must already be gone so that a crash
    /// between the two deletes leaves a resumable state.
    pub async fn delete(&self, job_key: &str) -> Result<(), EtlError> {
        Entity::delete_by_id(job_key).exec(&self.db).await?;
        tracing::info!(job_key = %job_key, "Scheduled job deleted");
        Ok(())
    }
}
