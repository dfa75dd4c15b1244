//! ScheduledJob entity model
//!
//! One row per (cluster, log, schema version, start date, end date) tuple.
//! The composite `job_key` is the primary key; `status` walks the state
//! machine in [`crate::status`] and `status_last_updated_at` doubles as the
//! worker heartbeat.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Sentinel used in the job key when a job has no configured end date.
pub const OPEN_END_SENTINEL: &str = "never";

/// Build the composite job key from a job's identity fields.
pub fn job_key(
    cluster_id: &str,
    log_name: &str,
    log_schema_version: &str,
    start_date: &str,
    end_date: Option<&str>,
) -> String {
    format!(
        "{cluster_id}:{log_name}:{log_schema_version}:{start_date}:{}",
        end_date.unwrap_or(OPEN_END_SENTINEL)
    )
}

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "scheduled_jobs")]
pub struct Model {
    /// Composite key: cluster:log:schema:start:end (see [`job_key`]).
    #[sea_orm(primary_key, auto_increment = false)]
    pub job_key: String,

    /// Stable identifier used by the run ledger.
    pub id: Uuid,

    /// Current processing status (see [`crate::status::JobStatus`]).
    pub status: String,

    /// Refreshed on every status write; the worker keepalive heartbeat.
    pub status_last_updated_at: DateTimeWithTimeZone,

    pub log_name: String,

    pub log_schema_version: String,

    /// Location of the raw log source (e.g. an object-store prefix).
    pub source_path: String,

    /// First date of data to process, `YYYY-MM-DD`.
    pub start_date: String,

    /// Last date of data to process; `None` means the job runs forever.
    pub end_date: Option<String>,

    /// Watermark: last date confirmed successfully loaded.
    pub last_successful_date: Option<String>,

    /// Consecutive error retries consumed so far.
    pub num_error_retries: i32,

    /// Earliest time the next automatic retry may run.
    pub next_retry_at: Option<DateTimeWithTimeZone>,

    pub cancel_requested: bool,
    pub cancel_requested_at: Option<DateTimeWithTimeZone>,

    pub pause_requested: bool,
    pub pause_requested_at: Option<DateTimeWithTimeZone>,

    pub delete_requested: bool,
    pub delete_requested_at: Option<DateTimeWithTimeZone>,

    /// JSON list of addresses to notify about job outcomes.
    #[sea_orm(column_type = "JsonBinary")]
    pub contact_emails: Option<JsonValue>,

    /// Free-form per-job overrides (e.g. `data_lead_time`).
    #[sea_orm(column_type = "JsonBinary")]
    pub additional_arguments: Option<JsonValue>,

    /// Target warehouse cluster, resolved via the cluster directory.
    pub cluster_id: String,

    /// `HH:MM` lag after which a day's logs are assumed complete.
    pub data_lead_time: Option<String>,

    pub created_at: DateTimeWithTimeZone,
    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::cluster::Entity",
        from = "Column::ClusterId",
        to = "super::cluster::Column::ClusterId"
    )]
    Cluster,
}

impl Related<super::cluster::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Cluster.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

impl Model {
    /// Whether any out-of-band action (cancel/pause/delete) is pending.
    pub fn action_pending(&self) -> bool {
        self.cancel_requested || self.pause_requested || self.delete_requested
    }
}
