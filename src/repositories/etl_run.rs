//! # EtlRun Repository
//!
//! The run ledger over the etl_runs table. One row per (job, data date,
//! step); a run starts as `{step}_started` and is updated in place with its
//! terminal status and runtime once it finishes. A retried run reuses the
//! row rather than appending a duplicate.

use chrono::Utc;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, Set,
};
use uuid::Uuid;

use crate::error::EtlError;
use crate::models::etl_run::{ActiveModel, Column, Entity, Model};
use crate::worker::results::{RunOutcome, Step};

/// Identity stamped into `run_by`: which host and process executed a run.
pub fn worker_identity() -> String {
    let host = std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string());
    format!("{host}:{}", std::process::id())
}

/// Repository for run ledger database operations
pub struct RunRepository {
    db: DatabaseConnection,
    run_by: String,
}

impl RunRepository {
    /// Create a new RunRepository with the given database connection
    pub fn new(db: DatabaseConnection) -> Self {
        Self {
            db,
            run_by: worker_identity(),
        }
    }

    async fn find(
        &self,
        job_id: Uuid,
        data_date: &str,
        step: Step,
    ) -> Result<Option<Model>, EtlError> {
        let run = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .filter(Column::DataDate.eq(data_date))
            .filter(Column::Step.eq(step.as_str()))
            .one(&self.db)
            .await?;
        Ok(run)
    }

    /// Record that a run started. Reuses the existing row on retry, wiping
    /// the previous outcome.
    pub async fn upsert_run_start(
        &self,
        job_id: Uuid,
        data_date: &str,
        step: Step,
    ) -> Result<Model, EtlError> {
        let now = Utc::now().fixed_offset();
        let status = format!("{step}_started");

        let run = if let Some(existing) = self.find(job_id, data_date, step).await? {
            let mut active: ActiveModel = existing.into();
            active.status = Set(status);
            active.run_by = Set(self.run_by.clone());
            active.started_at = Set(now);
            active.finished_at = Set(None);
            active.runtime_secs = Set(None);
            active.error = Set(None);
            active.updated_at = Set(now);
            active.update(&self.db).await?
        } else {
            ActiveModel {
                id: Set(Uuid::new_v4()),
                job_id: Set(job_id),
                data_date: Set(data_date.to_string()),
                step: Set(step.as_str().to_string()),
                status: Set(status),
                run_by: Set(self.run_by.clone()),
                started_at: Set(now),
                finished_at: Set(None),
                runtime_secs: Set(None),
                error: Set(None),
                updated_at: Set(now),
            }
            .insert(&self.db)
            .await?
        };

        tracing::debug!(
            job_id = %job_id,
            data_date = %data_date,
            step = %step,
            "Run started"
        );
        Ok(run)
    }

    /// Record a run's terminal outcome, computing the wall-clock runtime
    /// from the recorded start.
    pub async fn upsert_run_complete(
        &self,
        job_id: Uuid,
        data_date: &str,
        step: Step,
        outcome: &RunOutcome,
    ) -> Result<Model, EtlError> {
        let run = self
            .find(job_id, data_date, step)
            .await?
            .ok_or_else(|| EtlError::JobNotFound(format!("run {job_id}/{data_date}/{step}")))?;

        let now = Utc::now().fixed_offset();
        let runtime = (now - run.started_at).num_milliseconds() as f64 / 1000.0;

        let mut active: ActiveModel = run.into();
        active.status = Set(format!("{step}_{}", outcome.status.as_str()));
        active.finished_at = Set(Some(now));
        active.runtime_secs = Set(Some(runtime));
        active.error = Set(outcome.error_info.clone());
        active.updated_at = Set(now);

        let updated = active.update(&self.db).await?;
        Ok(updated)
    }

    /// All runs for a job, date-ordered with ET before Load within a date.
    pub async fn runs_for_job(&self, job_id: Uuid) -> Result<Vec<Model>, EtlError> {
        let runs = Entity::find()
            .filter(Column::JobId.eq(job_id))
            .order_by_asc(Column::DataDate)
            .order_by_asc(Column::Step)
            .all(&self.db)
            .await?;
        Ok(runs)
    }

    /// Drop every run the job owns. Called before the job row itself is
    /// deleted so a crash in between leaves a resumable state.
    pub async fn delete_job_runs(&self, job_id: Uuid) -> Result<u64, EtlError> {
        let res = Entity::delete_many()
            .filter(Column::JobId.eq(job_id))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use migration::{Migrator, MigratorTrait};
    use sea_orm::Database;

    async fn setup() -> DatabaseConnection {
        let db = Database::connect("sqlite::memory:").await.unwrap();
        Migrator::up(&db, None).await.unwrap();
        db
    }

    #[tokio::test]
    async fn run_lifecycle_start_then_complete() {
        let repo = RunRepository::new(setup().await);
        let job_id = Uuid::new_v4();

        let started = repo
            .upsert_run_start(job_id, "2014-01-01", Step::Et)
            .await
            .unwrap();
        assert_eq!(started.status, "et_started");
        assert!(started.finished_at.is_none());
        assert!(started.run_by.contains(':'));

        let done = repo
            .upsert_run_complete(job_id, "2014-01-01", Step::Et, &RunOutcome::success())
            .await
            .unwrap();
        assert_eq!(done.status, "et_success");
        assert!(done.finished_at.is_some());
        assert!(done.runtime_secs.unwrap() >= 0.0);
    }

    #[tokio::test]
    async fn retry_reuses_the_row() {
        let repo = RunRepository::new(setup().await);
        let job_id = Uuid::new_v4();

        repo.upsert_run_start(job_id, "2014-01-01", Step::Load)
            .await
            .unwrap();
        repo.upsert_run_complete(
            job_id,
            "2014-01-01",
            Step::Load,
            &RunOutcome::error("copy failed"),
        )
        .await
        .unwrap();

        let restarted = repo
            .upsert_run_start(job_id, "2014-01-01", Step::Load)
            .await
            .unwrap();
        assert_eq!(restarted.status, "load_started");
        assert!(restarted.error.is_none());

        let runs = repo.runs_for_job(job_id).await.unwrap();
        assert_eq!(runs.len(), 1);
    }

    #[tokio::test]
    async fn delete_job_runs_clears_only_that_job() {
        let repo = RunRepository::new(setup().await);
        let job_a = Uuid::new_v4();
        let job_b = Uuid::new_v4();

        repo.upsert_run_start(job_a, "2014-01-01", Step::Et).await.unwrap();
        repo.upsert_run_start(job_a, "2014-01-02", Step::Et).await.unwrap();
        repo.upsert_run_start(job_b, "2014-01-01", Step::Et).await.unwrap();

        let deleted = repo.delete_job_runs(job_a).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(repo.runs_for_job(job_a).await.unwrap().len(), 0);
        assert_eq!(repo.runs_for_job(job_b).await.unwrap().len(), 1);
    }
}
