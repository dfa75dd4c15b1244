//! # ETL Scheduler Library
//!
//! Core functionality for the recurring ETL job scheduler: the durable job
//! state machine, the scanner that turns registered jobs into work items,
//! and the worker that executes them day by day against a target cluster.

pub mod availability;
pub mod config;
pub mod dates;
pub mod db;
pub mod error;
pub mod models;
pub mod notify;
pub mod queue;
pub mod repositories;
pub mod scanner;
pub mod status;
pub mod telemetry;
pub mod worker;
pub mod workitem;
pub use migration;
