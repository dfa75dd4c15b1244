//! Shared helpers for integration tests: in-memory databases with
//! migrations applied and fixture rows.

use anyhow::Result;
use migration::{Migrator, MigratorTrait};
use sea_orm::{Database, DatabaseConnection};

use etl_scheduler::config::AppConfig;
use etl_scheduler::models::scheduled_job;
use etl_scheduler::repositories::scheduled_job::NewJob;
use etl_scheduler::repositories::{ClusterRepository, JobRepository};

/// In-memory SQLite database with all migrations applied.
pub async fn setup_test_db() -> Result<DatabaseConnection> {
    let db = Database::connect("sqlite::memory:").await?;
    Migrator::up(&db, None).await?;
    Ok(db)
}

/// Config tuned so queue polling does not slow the tests down.
pub fn test_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.queue.tuning.wait_time_secs = 1;
    config.queue.tuning.poll_interval_ms = 5;
    config
}

pub async fn insert_cluster(db: &DatabaseConnection) -> Result<()> {
    ClusterRepository::new(db.clone())
        .insert("cluster-1", "warehouse.internal", 5439, "public")
        .await?;
    Ok(())
}

/// A job over a fixed historic window, so the default lead-time oracle
/// always reports its data as available.
pub async fn insert_job(
    db: &DatabaseConnection,
    log_name: &str,
    end_date: Option<&str>,
) -> Result<scheduled_job::Model> {
    let job = JobRepository::new(db.clone())
        .insert(NewJob {
            cluster_id: "cluster-1".to_string(),
            log_name: log_name.to_string(),
            log_schema_version: "3".to_string(),
            source_path: format!("s3://logs/{log_name}"),
            start_date: "2014-01-01".to_string(),
            end_date: end_date.map(str::to_string),
            contact_emails: None,
            additional_arguments: None,
            data_lead_time: None,
        })
        .await?;
    Ok(job)
}
