//! Migration to create the scheduled_jobs table.
//!
//! One row per (cluster, log, schema version, start date, end date) tuple.
//! The `job_key` primary key is built from those fields; `status` walks the
//! job state machine and carries a heartbeat timestamp alongside retry
//! bookkeeping and the three out-of-band action flags.

use sea_orm_migration::prelude::*;

use crate::m2025_01_10_000001_create_clusters::Clusters;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(ScheduledJobs::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(ScheduledJobs::JobKey)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(ScheduledJobs::Id).uuid().not_null())
                    .col(
                        ColumnDef::new(ScheduledJobs::Status)
                            .text()
                            .not_null()
                            .default("empty"),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::StatusLastUpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(ColumnDef::new(ScheduledJobs::LogName).text().not_null())
                    .col(
                        ColumnDef::new(ScheduledJobs::LogSchemaVersion)
                            .text()
                            .not_null(),
                    )
                    .col(ColumnDef::new(ScheduledJobs::SourcePath).text().not_null())
                    .col(ColumnDef::new(ScheduledJobs::StartDate).text().not_null())
                    .col(ColumnDef::new(ScheduledJobs::EndDate).text().null())
                    .col(
                        ColumnDef::new(ScheduledJobs::LastSuccessfulDate)
                            .text()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::NumErrorRetries)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::NextRetryAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::CancelRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::CancelRequestedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::PauseRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::PauseRequestedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::DeleteRequested)
                            .boolean()
                            .not_null()
                            .default(false),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::DeleteRequestedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(ScheduledJobs::ContactEmails).json_binary().null())
                    .col(
                        ColumnDef::new(ScheduledJobs::AdditionalArguments)
                            .json_binary()
                            .null(),
                    )
                    .col(ColumnDef::new(ScheduledJobs::ClusterId).text().not_null())
                    .col(ColumnDef::new(ScheduledJobs::DataLeadTime).text().null())
                    .col(
                        ColumnDef::new(ScheduledJobs::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(ScheduledJobs::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_scheduled_jobs_cluster_id")
                            .from(ScheduledJobs::Table, ScheduledJobs::ClusterId)
                            .to(Clusters::Table, Clusters::ClusterId)
                            .on_delete(ForeignKeyAction::Restrict),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_scheduled_jobs_status")
                    .table(ScheduledJobs::Table)
                    .col(ScheduledJobs::Status)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(ScheduledJobs::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum ScheduledJobs {
    Table,
    JobKey,
    Id,
    Status,
    StatusLastUpdatedAt,
    LogName,
    LogSchemaVersion,
    SourcePath,
    StartDate,
    EndDate,
    LastSuccessfulDate,
    NumErrorRetries,
    NextRetryAt,
    CancelRequested,
    CancelRequestedAt,
    PauseRequested,
    PauseRequestedAt,
    DeleteRequested,
    DeleteRequestedAt,
    ContactEmails,
    AdditionalArguments,
    ClusterId,
    DataLeadTime,
    CreatedAt,
    UpdatedAt,
}
