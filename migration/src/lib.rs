//! Database migrations for the ETL scheduler.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_01_10_000001_create_clusters;
mod m2025_01_10_000002_create_scheduled_jobs;
mod m2025_01_10_000003_create_etl_runs;
mod m2025_01_10_000004_create_queue_messages;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_01_10_000001_create_clusters::Migration),
            Box::new(m2025_01_10_000002_create_scheduled_jobs::Migration),
            Box::new(m2025_01_10_000003_create_etl_runs::Migration),
            Box::new(m2025_01_10_000004_create_queue_messages::Migration),
        ]
    }
}
