//! Run vocabulary and final-status derivation.
//!
//! A run is one (date, step) execution unit. The worker aggregates step
//! results per date and, once a work item finishes, derives the job-level
//! final status and watermark from the aggregate.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::status::JobStatus;

/// The two stages of processing one date of data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Step {
    /// Extract/transform raw source data into a loadable format.
    Et,
    /// Copy transformed data into the warehouse table.
    Load,
}

impl Step {
    pub fn as_str(&self) -> &'static str {
        match self {
            Step::Et => "et",
            Step::Load => "load",
        }
    }
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of a single run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Success,
    Error,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Success => "success",
            RunStatus::Error => "error",
            RunStatus::Cancelled => "cancelled",
        }
    }
}

/// What a step executor reports back to the coordinator.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunStatus,
    pub error_info: Option<JsonValue>,
}

impl RunOutcome {
    pub fn success() -> Self {
        Self {
            status: RunStatus::Success,
            error_info: None,
        }
    }

    pub fn error(info: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            error_info: Some(JsonValue::String(info.into())),
        }
    }

    pub fn cancelled() -> Self {
        Self {
            status: RunStatus::Cancelled,
            error_info: None,
        }
    }

    pub fn is_success(&self) -> bool {
        self.status == RunStatus::Success
    }
}

/// One completed step recorded against a date.
#[derive(Debug, Clone)]
pub struct StepResult {
    pub step: Step,
    pub status: RunStatus,
    pub error_info: Option<JsonValue>,
}

/// All step results for a work item, keyed by data date. BTreeMap keeps
/// the zero-padded date keys in chronological order.
pub type RunResults = BTreeMap<String, Vec<StepResult>>;

/// Job-level outcome derived from the aggregated run results.
#[derive(Debug, Clone, PartialEq)]
pub struct ParsedResults {
    pub status: JobStatus,
    /// Last contiguous date whose steps all succeeded.
    pub last_successful_date: Option<String>,
    pub extra_info: Option<JsonValue>,
}

/// Derive the final job status from per-date step results.
///
/// ERROR if any run failed; COMPLETE if the configured end date's runs
/// succeeded; otherwise SUCCESS with the watermark at the last contiguous
/// successful date. An empty result set means nothing ran, which is an
/// error for a work item that was dispatched.
pub fn parse_results(results: &RunResults, end_date: Option<&str>) -> ParsedResults {
    if results.is_empty() {
        return ParsedResults {
            status: JobStatus::Error,
            last_successful_date: None,
            extra_info: None,
        };
    }

    let mut last_successful: Option<String> = None;
    for (date, records) in results {
        for record in records {
            match record.status {
                RunStatus::Error => {
                    return ParsedResults {
                        status: JobStatus::Error,
                        last_successful_date: last_successful,
                        extra_info: record.error_info.clone(),
                    };
                }
                RunStatus::Cancelled => {
                    return ParsedResults {
                        status: JobStatus::Success,
                        last_successful_date: last_successful,
                        extra_info: None,
                    };
                }
                RunStatus::Success => {}
            }
        }
        last_successful = Some(date.clone());
    }

    let status = match (end_date, last_successful.as_deref()) {
        (Some(end), Some(last)) if end == last => JobStatus::Complete,
        _ => JobStatus::Success,
    };

    ParsedResults {
        status,
        last_successful_date: last_successful,
        extra_info: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ok(step: Step) -> StepResult {
        StepResult {
            step,
            status: RunStatus::Success,
            error_info: None,
        }
    }

    fn failed(step: Step) -> StepResult {
        StepResult {
            step,
            status: RunStatus::Error,
            error_info: Some(JsonValue::String("boom".into())),
        }
    }

    fn full_day() -> Vec<StepResult> {
        vec![ok(Step::Et), ok(Step::Load)]
    }

    #[test]
    fn empty_results_are_an_error() {
        let parsed = parse_results(&RunResults::new(), Some("2014-01-03"));
        assert_eq!(parsed.status, JobStatus::Error);
        assert_eq!(parsed.last_successful_date, None);
    }

    #[test]
    fn all_success_reaching_end_date_is_complete() {
        let mut results = RunResults::new();
        results.insert("2014-01-01".into(), full_day());
        results.insert("2014-01-02".into(), full_day());
        results.insert("2014-01-03".into(), full_day());

        let parsed = parse_results(&results, Some("2014-01-03"));
        assert_eq!(parsed.status, JobStatus::Complete);
        assert_eq!(parsed.last_successful_date.as_deref(), Some("2014-01-03"));
    }

    #[test]
    fn partial_progress_is_success_with_watermark() {
        let mut results = RunResults::new();
        results.insert("2014-01-01".into(), full_day());
        results.insert("2014-01-02".into(), full_day());

        // End date not reached, so the job can resume later.
        let parsed = parse_results(&results, Some("2014-01-05"));
        assert_eq!(parsed.status, JobStatus::Success);
        assert_eq!(parsed.last_successful_date.as_deref(), Some("2014-01-02"));
    }

    #[test]
    fn open_ended_job_never_completes() {
        let mut results = RunResults::new();
        results.insert("2014-01-01".into(), full_day());
        let parsed = parse_results(&results, None);
        assert_eq!(parsed.status, JobStatus::Success);
    }

    #[test]
    fn any_failure_wins_and_watermark_stops_before_it() {
        let mut results = RunResults::new();
        results.insert("2014-01-01".into(), full_day());
        results.insert("2014-01-02".into(), vec![ok(Step::Et), failed(Step::Load)]);
        results.insert("2014-01-03".into(), full_day());

        let parsed = parse_results(&results, Some("2014-01-03"));
        assert_eq!(parsed.status, JobStatus::Error);
        assert_eq!(parsed.last_successful_date.as_deref(), Some("2014-01-01"));
        assert!(parsed.extra_info.is_some());
    }

    #[test]
    fn cancelled_run_stops_the_walk_without_error() {
        let mut results = RunResults::new();
        results.insert("2014-01-01".into(), full_day());
        results.insert(
            "2014-01-02".into(),
            vec![StepResult {
                step: Step::Et,
                status: RunStatus::Cancelled,
                error_info: None,
            }],
        );

        let parsed = parse_results(&results, Some("2014-01-05"));
        assert_eq!(parsed.status, JobStatus::Success);
        assert_eq!(parsed.last_successful_date.as_deref(), Some("2014-01-01"));
    }
}
