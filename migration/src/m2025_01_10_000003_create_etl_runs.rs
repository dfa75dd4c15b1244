//! Migration to create the etl_runs table.
//!
//! The run ledger records per-(job, date, step) timing and outcome for
//! observability. Rows are appended on run start and updated on completion.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(EtlRuns::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(EtlRuns::Id).uuid().not_null().primary_key())
                    .col(ColumnDef::new(EtlRuns::JobId).uuid().not_null())
                    .col(ColumnDef::new(EtlRuns::DataDate).text().not_null())
                    .col(ColumnDef::new(EtlRuns::Step).text().not_null())
                    .col(ColumnDef::new(EtlRuns::Status).text().not_null())
                    .col(ColumnDef::new(EtlRuns::RunBy).text().not_null())
                    .col(
                        ColumnDef::new(EtlRuns::StartedAt)
                            .timestamp_with_time_zone()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(EtlRuns::FinishedAt)
                            .timestamp_with_time_zone()
                            .null(),
                    )
                    .col(ColumnDef::new(EtlRuns::RuntimeSecs).double().null())
                    .col(ColumnDef::new(EtlRuns::Error).json_binary().null())
                    .col(
                        ColumnDef::new(EtlRuns::UpdatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_etl_runs_job_date_step")
                    .table(EtlRuns::Table)
                    .col(EtlRuns::JobId)
                    .col(EtlRuns::DataDate)
                    .col(EtlRuns::Step)
                    .unique()
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(EtlRuns::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum EtlRuns {
    Table,
    Id,
    JobId,
    DataDate,
    Step,
    Status,
    RunBy,
    StartedAt,
    FinishedAt,
    RuntimeSecs,
    Error,
    UpdatedAt,
}
