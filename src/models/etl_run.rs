//! EtlRun entity model
//!
//! The run ledger: one row per (job, data date, step), created when a run
//! starts and updated when it completes. Append/idempotent-update only.

use sea_orm::ActiveModelBehavior;
use sea_orm::entity::prelude::*;
use sea_orm::prelude::DateTimeWithTimeZone;
use serde_json::Value as JsonValue;
use uuid::Uuid;

#[derive(Clone, Debug, PartialEq, DeriveEntityModel)]
#[sea_orm(table_name = "etl_runs")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,

    /// The owning scheduled job's uuid.
    pub job_id: Uuid,

    /// Date of data this run processed, `YYYY-MM-DD`.
    pub data_date: String,

    /// Step tag: `et` or `load`.
    pub step: String,

    /// e.g. `et_started`, `load_success`, `et_error`.
    pub status: String,

    /// Worker identity (`host:pid`) that executed the run.
    pub run_by: String,

    pub started_at: DateTimeWithTimeZone,
    pub finished_at: Option<DateTimeWithTimeZone>,

    /// Wall-clock duration, computed at completion.
    pub runtime_secs: Option<f64>,

    /// Structured error detail when the run failed.
    #[sea_orm(column_type = "JsonBinary")]
    pub error: Option<JsonValue>,

    pub updated_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
