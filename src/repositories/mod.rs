//! # Repository Layer
//!
//! Repositories encapsulating SeaORM operations for the scheduler's
//! durable state. Status writes go through the transition table and are
//! guarded with conditional updates so two actors cannot race a job into
//! an illegal state.

pub mod cluster;
pub mod etl_run;
pub mod scheduled_job;

pub use cluster::ClusterRepository;
pub use etl_run::RunRepository;
pub use scheduled_job::JobRepository;
