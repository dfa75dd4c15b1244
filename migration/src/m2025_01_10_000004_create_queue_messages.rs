//! Migration to create the queue_messages table.
//!
//! Backs the durable FIFO work and feedback queues. Consumers claim
//! messages by bumping `visible_at`; delivery is at-least-once.

use sea_orm_migration::prelude::*;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(QueueMessages::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(QueueMessages::Id)
                            .uuid()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(QueueMessages::QueueName).text().not_null())
                    .col(ColumnDef::new(QueueMessages::Body).json_binary().not_null())
                    .col(
                        ColumnDef::new(QueueMessages::EnqueuedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::VisibleAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(QueueMessages::ReceiveCount)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_queue_messages_queue_visible")
                    .table(QueueMessages::Table)
                    .col(QueueMessages::QueueName)
                    .col(QueueMessages::VisibleAt)
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(QueueMessages::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum QueueMessages {
    Table,
    Id,
    QueueName,
    Body,
    EnqueuedAt,
    VisibleAt,
    ReceiveCount,
}
