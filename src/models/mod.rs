//! # Data Models
//!
//! SeaORM entity models for the scheduler's durable state: scheduled jobs,
//! the per-run ledger, the cluster directory, and queue messages.

pub mod cluster;
pub mod etl_run;
pub mod queue_message;
pub mod scheduled_job;

pub use cluster::Entity as Cluster;
pub use etl_run::Entity as EtlRun;
pub use queue_message::Entity as QueueMessage;
pub use scheduled_job::Entity as ScheduledJob;
