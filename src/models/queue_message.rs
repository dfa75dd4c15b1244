//! QueueMessage entity model
//!
//! Rows backing the durable FIFO work and feedback queues. A consumer
//! claims a message by pushing `visible_at` forward; delivery is
//! at-least-once.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "queue_messages")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    pub queue_name: String,

    #[sea_orm(column_type = "JsonBinary")]
    pub body: JsonValue,

    pub enqueued_at: DateTimeWithTimeZone,

    /// Hidden from receivers until this time passes.
    pub visible_at: DateTimeWithTimeZone,

    pub receive_count: i32,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
