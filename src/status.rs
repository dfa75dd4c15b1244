//! # Job Status State Machine
//!
//! The processing status of a scheduled job and the directed graph of legal
//! transitions between statuses. This table is the single source of truth
//! preventing two actors from double-scheduling or clobbering an in-flight
//! job: every status mutation must be validated against it.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::EtlError;

/// Processing status of a scheduled job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Resettable idle state; the scanner picks jobs up from here.
    Empty,
    /// A work item has been enqueued but no worker has claimed it yet.
    Scheduled,
    /// A worker is executing the job; the heartbeat keeps this fresh.
    Running,
    /// Partial progress, safe to resume once more data is available.
    Success,
    /// A run failed; eligible for backoff-managed retry.
    Error,
    /// The configured end date has been processed.
    Complete,
    Cancelled,
    Paused,
    /// Terminal; the record no longer exists after this.
    Deleted,
}

impl JobStatus {
    pub const ALL: [JobStatus; 9] = [
        JobStatus::Empty,
        JobStatus::Scheduled,
        JobStatus::Running,
        JobStatus::Success,
        JobStatus::Error,
        JobStatus::Complete,
        JobStatus::Cancelled,
        JobStatus::Paused,
        JobStatus::Deleted,
    ];

    /// Statuses the scanner considers for new work.
    pub const SCHEDULABLE: [JobStatus; 2] = [JobStatus::Empty, JobStatus::Success];

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Empty => "empty",
            JobStatus::Scheduled => "scheduled",
            JobStatus::Running => "running",
            JobStatus::Success => "success",
            JobStatus::Error => "error",
            JobStatus::Complete => "complete",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Paused => "paused",
            JobStatus::Deleted => "deleted",
        }
    }

    pub fn parse(value: &str) -> Result<Self, EtlError> {
        match value {
            "empty" => Ok(JobStatus::Empty),
            "scheduled" => Ok(JobStatus::Scheduled),
            "running" => Ok(JobStatus::Running),
            "success" => Ok(JobStatus::Success),
            "error" => Ok(JobStatus::Error),
            "complete" => Ok(JobStatus::Complete),
            "cancelled" => Ok(JobStatus::Cancelled),
            "paused" => Ok(JobStatus::Paused),
            "deleted" => Ok(JobStatus::Deleted),
            other => Err(EtlError::UnknownStatus(other.to_string())),
        }
    }

    /// Allowed target statuses from this status.
    pub fn allowed_transitions(&self) -> &'static [JobStatus] {
        match self {
            JobStatus::Empty => &[JobStatus::Scheduled],
            // Empty edge covers re-submission after a stuck schedule.
            JobStatus::Scheduled => &[JobStatus::Empty, JobStatus::Running],
            JobStatus::Running => &[
                JobStatus::Cancelled,
                // Empty edge covers re-submission after a dead worker.
                JobStatus::Empty,
                // Running -> Running is the keepalive heartbeat.
                JobStatus::Running,
                JobStatus::Success,
                JobStatus::Error,
                JobStatus::Complete,
                JobStatus::Paused,
            ],
            JobStatus::Success => &[JobStatus::Scheduled],
            JobStatus::Cancelled => &[JobStatus::Empty],
            JobStatus::Complete => &[JobStatus::Empty],
            JobStatus::Error => &[JobStatus::Empty],
            JobStatus::Paused => &[JobStatus::Empty, JobStatus::Success],
            JobStatus::Deleted => &[],
        }
    }

    pub fn can_transition_to(&self, target: JobStatus) -> bool {
        self.allowed_transitions().contains(&target)
    }

    /// Validate a proposed transition, returning the typed error used
    /// throughout the store layer.
    pub fn validate_transition(&self, target: JobStatus, job_key: &str) -> Result<(), EtlError> {
        if self.can_transition_to(target) {
            Ok(())
        } else {
            Err(EtlError::InvalidStatusTransition {
                job_key: job_key.to_string(),
                from: *self,
                to: target,
            })
        }
    }

    pub fn is_schedulable(&self) -> bool {
        Self::SCHEDULABLE.contains(self)
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_strings() {
        for status in JobStatus::ALL {
            assert_eq!(JobStatus::parse(status.as_str()).unwrap(), status);
        }
        assert!(matches!(
            JobStatus::parse("bogus"),
            Err(EtlError::UnknownStatus(_))
        ));
    }

    #[test]
    fn empty_only_schedules() {
        assert!(JobStatus::Empty.can_transition_to(JobStatus::Scheduled));
        assert!(!JobStatus::Empty.can_transition_to(JobStatus::Running));
        assert!(!JobStatus::Empty.can_transition_to(JobStatus::Success));
    }

    #[test]
    fn running_keepalive_is_legal() {
        assert!(JobStatus::Running.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn deleted_is_terminal() {
        for status in JobStatus::ALL {
            assert!(!JobStatus::Deleted.can_transition_to(status));
        }
    }

    #[test]
    fn no_status_reaches_scheduled_except_schedulable() {
        for status in JobStatus::ALL {
            let allowed = status.can_transition_to(JobStatus::Scheduled);
            assert_eq!(allowed, status.is_schedulable(), "{status}");
        }
    }

    #[test]
    fn paused_resumes_to_empty_or_success() {
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Empty));
        assert!(JobStatus::Paused.can_transition_to(JobStatus::Success));
        assert!(!JobStatus::Paused.can_transition_to(JobStatus::Running));
    }

    #[test]
    fn validate_transition_reports_typed_error() {
        let err = JobStatus::Complete
            .validate_transition(JobStatus::Running, "job-1")
            .unwrap_err();
        match err {
            EtlError::InvalidStatusTransition { from, to, job_key } => {
                assert_eq!(from, JobStatus::Complete);
                assert_eq!(to, JobStatus::Running);
                assert_eq!(job_key, "job-1");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn walks_on_the_graph_only() {
        // A legal lifecycle walk must validate edge by edge.
        let walk = [
            JobStatus::Empty,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Success,
            JobStatus::Scheduled,
            JobStatus::Running,
            JobStatus::Complete,
            JobStatus::Empty,
        ];
        for pair in walk.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{} -> {}", pair[0], pair[1]);
        }
    }
}
