//! # Durable Queues
//!
//! FIFO message queues backed by the queue_messages table. Both the work
//! queue (scanner -> worker) and the feedback queue (worker -> scanner)
//! are instances of [`DbQueue`] with different names.
//!
//! Delivery is at-least-once: a receive claims a message by pushing its
//! `visible_at` past a visibility timeout, and the message reappears if it
//! is not deleted in time. Double-execution safety does not live here; it
//! comes from the guarded SCHEDULED -> RUNNING job transition.

use std::time::Duration;

use chrono::Utc;
use rand::Rng;
use sea_orm::sea_query::Expr;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder,
    QuerySelect, Set,
};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::error::EtlError;
use crate::models::queue_message::{ActiveModel, Column, Entity};

/// Queue tuning knobs, part of [`crate::config::AppConfig`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct QueueConfig {
    /// How long a claimed message stays hidden before redelivery.
    #[serde(default = "default_visibility_timeout_secs")]
    pub visibility_timeout_secs: u64,
    /// How long a message may sit unconsumed before maintenance treats the
    /// jobs behind it as stuck.
    #[serde(default = "default_retention_period_secs")]
    pub retention_period_secs: u64,
    /// Default bound on a single receive long-poll.
    #[serde(default = "default_wait_time_secs")]
    pub wait_time_secs: u64,
    /// Sleep between polls while long-polling an empty queue.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

fn default_visibility_timeout_secs() -> u64 {
    300
}

fn default_retention_period_secs() -> u64 {
    4 * 3600
}

fn default_wait_time_secs() -> u64 {
    20
}

fn default_poll_interval_ms() -> u64 {
    1000
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_secs: default_visibility_timeout_secs(),
            retention_period_secs: default_retention_period_secs(),
            wait_time_secs: default_wait_time_secs(),
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

/// A received message, claimed until `delete` or visibility expiry.
#[derive(Debug, Clone)]
pub struct ReceivedMessage {
    pub id: Uuid,
    pub body: serde_json::Value,
    pub receive_count: i32,
}

impl ReceivedMessage {
    pub fn body_as<T: DeserializeOwned>(&self) -> Result<T, EtlError> {
        Ok(serde_json::from_value(self.body.clone())?)
    }
}

/// A named FIFO queue over the shared queue_messages table.
pub struct DbQueue {
    db: DatabaseConnection,
    name: String,
    config: QueueConfig,
}

impl DbQueue {
    pub fn new(db: DatabaseConnection, name: impl Into<String>, config: QueueConfig) -> Self {
        Self {
            db,
            name: name.into(),
            config,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn retention_period(&self) -> Duration {
        Duration::from_secs(self.config.retention_period_secs)
    }

    pub fn wait_time(&self) -> Duration {
        Duration::from_secs(self.config.wait_time_secs)
    }

    /// Enqueue a message, immediately visible.
    pub async fn send<T: Serialize>(&self, body: &T) -> Result<Uuid, EtlError> {
        let now = Utc::now().fixed_offset();
        let id = Uuid::new_v4();

        ActiveModel {
            id: Set(id),
            queue_name: Set(self.name.clone()),
            body: Set(serde_json::to_value(body)?),
            enqueued_at: Set(now),
            visible_at: Set(now),
            receive_count: Set(0),
        }
        .insert(&self.db)
        .await?;

        tracing::debug!(queue = %self.name, message_id = %id, "Message enqueued");
        Ok(id)
    }

    /// Long-poll for the oldest visible message, waiting up to `max_wait`.
    /// Returns `None` when the queue stayed empty for the whole window.
    pub async fn receive(&self, max_wait: Duration) -> Result<Option<ReceivedMessage>, EtlError> {
        let deadline = tokio::time::Instant::now() + max_wait;

        loop {
            // Connection-class failures surface as transient so callers
            // back off and re-poll instead of failing the pass.
            let claimed = self.try_claim().await.map_err(|e| {
                if e.is_transient() {
                    EtlError::Transient(format!("queue {} receive: {e}", self.name))
                } else {
                    e
                }
            })?;
            if let Some(message) = claimed {
                return Ok(Some(message));
            }
            let now = tokio::time::Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            // Jitter the poll so concurrent receivers spread out.
            let jitter = rand::thread_rng().gen_range(0..=self.config.poll_interval_ms / 4);
            let poll_interval = Duration::from_millis(self.config.poll_interval_ms + jitter);
            tokio::time::sleep(poll_interval.min(deadline - now)).await;
        }
    }

    /// Single non-blocking claim attempt. The conditional update on
    /// `visible_at` makes the claim exclusive against concurrent receivers.
    async fn try_claim(&self) -> Result<Option<ReceivedMessage>, EtlError> {
        let now = Utc::now().fixed_offset();

        let Some(candidate) = Entity::find()
            .filter(Column::QueueName.eq(self.name.as_str()))
            .filter(Column::VisibleAt.lte(now))
            .order_by_asc(Column::EnqueuedAt)
            .limit(1)
            .one(&self.db)
            .await?
        else {
            return Ok(None);
        };

        let hidden_until = now + chrono::Duration::seconds(self.config.visibility_timeout_secs as i64);
        let res = Entity::update_many()
            .col_expr(Column::VisibleAt, Expr::value(hidden_until))
            .col_expr(
                Column::ReceiveCount,
                Expr::col(Column::ReceiveCount).add(1),
            )
            .filter(Column::Id.eq(candidate.id))
            .filter(Column::VisibleAt.eq(candidate.visible_at))
            .exec(&self.db)
            .await?;

        if res.rows_affected != 1 {
            // Another receiver claimed it between the read and the write.
            return Ok(None);
        }

        Ok(Some(ReceivedMessage {
            id: candidate.id,
            body: candidate.body,
            receive_count: candidate.receive_count + 1,
        }))
    }

    /// Acknowledge a message, removing it for good.
    pub async fn delete(&self, message_id: Uuid) -> Result<(), EtlError> {
        Entity::delete_by_id(message_id).exec(&self.db).await?;
        Ok(())
    }

    pub async fn delete_batch(&self, message_ids: &[Uuid]) -> Result<(), EtlError> {
        if message_ids.is_empty() {
            return Ok(());
        }
        Entity::delete_many()
            .filter(Column::Id.is_in(message_ids.iter().copied()))
            .exec(&self.db)
            .await?;
        Ok(())
    }

    /// Drop everything in this queue, claimed or not.
    pub async fn purge(&self) -> Result<u64, EtlError> {
        let res = Entity::delete_many()
            .filter(Column::QueueName.eq(self.name.as_str()))
            .exec(&self.db)
            .await?;
        Ok(res.rows_affected)
    }
}
