//! Migration to create the clusters table.
//!
//! The cluster directory maps a cluster id to the warehouse connection
//! details (host, port, schema) that workers need to run load steps.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Clusters::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(Clusters::ClusterId)
                            .text()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(Clusters::Host).text().not_null())
                    .col(ColumnDef::new(Clusters::Port).integer().not_null())
                    .col(ColumnDef::new(Clusters::DbSchema).text().not_null())
                    .col(
                        ColumnDef::new(Clusters::Status)
                            .text()
                            .not_null()
                            .default("active"),
                    )
                    .col(
                        ColumnDef::new(Clusters::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Clusters::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Clusters {
    Table,
    ClusterId,
    Host,
    Port,
    DbSchema,
    Status,
    CreatedAt,
}
