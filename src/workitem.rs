//! # Work Item
//!
//! The immutable unit of scheduled work handed from the scanner to a
//! worker over the work queue. Snapshots everything the worker needs so it
//! never re-derives scheduling decisions; the only live state it re-reads
//! are the job's status and action flags.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::models::scheduled_job;
use crate::repositories::cluster::ClusterEndpoint;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Composite key of the owning scheduled job.
    pub job_key: String,
    pub job_id: Uuid,

    pub log_name: String,
    pub log_schema_version: String,
    pub source_path: String,

    /// The job's configured overall window.
    pub start_date: String,
    pub end_date: Option<String>,

    /// The sub-window this dispatch covers.
    pub run_start_date: String,
    pub run_end_date: String,

    pub contact_emails: Option<JsonValue>,
    pub additional_arguments: Option<JsonValue>,

    /// Resolved target cluster coordinates.
    pub cluster_id: String,
    pub cluster_host: String,
    pub cluster_port: i32,
    pub cluster_schema: String,
}

impl WorkItem {
    /// Build a work item from a job row, a computed run window, and the
    /// resolved cluster endpoint.
    pub fn from_job(
        job: &scheduled_job::Model,
        run_start_date: String,
        run_end_date: String,
        endpoint: &ClusterEndpoint,
    ) -> Self {
        Self {
            job_key: job.job_key.clone(),
            job_id: job.id,
            log_name: job.log_name.clone(),
            log_schema_version: job.log_schema_version.clone(),
            source_path: job.source_path.clone(),
            start_date: job.start_date.clone(),
            end_date: job.end_date.clone(),
            run_start_date,
            run_end_date,
            contact_emails: job.contact_emails.clone(),
            additional_arguments: job.additional_arguments.clone(),
            cluster_id: job.cluster_id.clone(),
            cluster_host: endpoint.host.clone(),
            cluster_port: endpoint.port,
            cluster_schema: endpoint.db_schema.clone(),
        }
    }

    /// Number of dates in the dispatched sub-window.
    pub fn run_days(&self) -> Result<usize, crate::error::EtlError> {
        Ok(crate::dates::DateRange::new(&self.run_start_date, &self.run_end_date, 1)?.total_items())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serde_round_trip_preserves_the_window() {
        let item = WorkItem {
            job_key: "cluster-1:ranger:3:2014-01-01:2014-01-10".into(),
            job_id: Uuid::new_v4(),
            log_name: "ranger".into(),
            log_schema_version: "3".into(),
            source_path: "s3://logs/ranger".into(),
            start_date: "2014-01-01".into(),
            end_date: Some("2014-01-10".into()),
            run_start_date: "2014-01-03".into(),
            run_end_date: "2014-01-05".into(),
            contact_emails: None,
            additional_arguments: None,
            cluster_id: "cluster-1".into(),
            cluster_host: "warehouse.internal".into(),
            cluster_port: 5439,
            cluster_schema: "public".into(),
        };

        let json = serde_json::to_value(&item).unwrap();
        let back: WorkItem = serde_json::from_value(json).unwrap();
        assert_eq!(back, item);
        assert_eq!(back.run_days().unwrap(), 3);
    }
}
