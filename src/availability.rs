//! # Log Availability Oracle
//!
//! Decides the most recent date of data that can be assumed complete for a
//! log source. The default oracle subtracts a configured lead time from
//! the current wall clock; a real listing-based oracle can be swapped in
//! behind the trait.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value as JsonValue;

use crate::dates::format_date;
use crate::error::EtlError;
use crate::models::scheduled_job;

/// Lead time applied when a job carries no override, `HH:MM`.
pub const DEFAULT_LEAD_TIME: &str = "48:00";

/// Key in `additional_arguments` that overrides the job's lead time.
const LEAD_TIME_ARG: &str = "data_lead_time";

#[async_trait]
pub trait AvailabilityOracle: Send + Sync {
    /// The latest `YYYY-MM-DD` whose data is complete for this job, or
    /// `None` when nothing is available yet.
    async fn max_complete_date(&self, job: &scheduled_job::Model)
        -> Result<Option<String>, EtlError>;
}

/// Parse an `HH:MM` lead time into a duration. Hours may exceed 24.
pub fn parse_lead_time(value: &str) -> Result<Duration, EtlError> {
    let invalid = || EtlError::Config(format!("invalid lead time (want HH:MM): {value}"));

    let (hours, minutes) = value.split_once(':').ok_or_else(invalid)?;
    let hours: i64 = hours.parse().map_err(|_| invalid())?;
    let minutes: i64 = minutes.parse().map_err(|_| invalid())?;
    if hours < 0 || !(0..60).contains(&minutes) {
        return Err(invalid());
    }
    Ok(Duration::hours(hours) + Duration::minutes(minutes))
}

/// Default oracle: a day's logs are complete once `lead time` has elapsed
/// past the wall clock.
pub struct LeadTimeOracle {
    now: fn() -> DateTime<Utc>,
}

impl LeadTimeOracle {
    pub fn new() -> Self {
        Self { now: Utc::now }
    }

    /// Test hook: pin the clock.
    #[cfg(test)]
    pub fn with_clock(now: fn() -> DateTime<Utc>) -> Self {
        Self { now }
    }

    /// Effective lead time for a job: `additional_arguments.data_lead_time`
    /// wins over the job column, which wins over the default.
    fn lead_time_for(job: &scheduled_job::Model) -> Result<Duration, EtlError> {
        let from_args = job
            .additional_arguments
            .as_ref()
            .and_then(|args| args.get(LEAD_TIME_ARG))
            .and_then(JsonValue::as_str);

        let value = from_args
            .or(job.data_lead_time.as_deref())
            .unwrap_or(DEFAULT_LEAD_TIME);
        parse_lead_time(value)
    }
}

impl Default for LeadTimeOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl AvailabilityOracle for LeadTimeOracle {
    async fn max_complete_date(
        &self,
        job: &scheduled_job::Model,
    ) -> Result<Option<String>, EtlError> {
        let lead = Self::lead_time_for(job)?;
        let cutoff = (self.now)() - lead;
        Ok(Some(format_date(cutoff.date_naive())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use uuid::Uuid;

    fn job_with(lead_column: Option<&str>, args: Option<JsonValue>) -> scheduled_job::Model {
        let now = Utc::now().fixed_offset();
        scheduled_job::Model {
            job_key: "k".into(),
            id: Uuid::new_v4(),
            status: "empty".into(),
            status_last_updated_at: now,
            log_name: "ranger".into(),
            log_schema_version: "3".into(),
            source_path: "s3://logs/ranger".into(),
            start_date: "2014-01-01".into(),
            end_date: None,
            last_successful_date: None,
            num_error_retries: 0,
            next_retry_at: None,
            cancel_requested: false,
            cancel_requested_at: None,
            pause_requested: false,
            pause_requested_at: None,
            delete_requested: false,
            delete_requested_at: None,
            contact_emails: None,
            additional_arguments: args,
            cluster_id: "cluster-1".into(),
            data_lead_time: lead_column.map(str::to_string),
            created_at: now,
            updated_at: now,
        }
    }

    fn noon_2014_08_10() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2014, 8, 10, 12, 0, 0).unwrap()
    }

    #[test]
    fn parses_lead_times_beyond_a_day() {
        assert_eq!(parse_lead_time("48:00").unwrap(), Duration::hours(48));
        assert_eq!(
            parse_lead_time("06:30").unwrap(),
            Duration::hours(6) + Duration::minutes(30)
        );
        assert!(parse_lead_time("6h").is_err());
        assert!(parse_lead_time("06:75").is_err());
    }

    #[tokio::test]
    async fn default_lead_time_is_two_days() {
        let oracle = LeadTimeOracle::with_clock(noon_2014_08_10);
        let max = oracle.max_complete_date(&job_with(None, None)).await.unwrap();
        assert_eq!(max.as_deref(), Some("2014-08-08"));
    }

    #[tokio::test]
    async fn column_and_argument_overrides_apply_in_order() {
        let oracle = LeadTimeOracle::with_clock(noon_2014_08_10);

        let max = oracle
            .max_complete_date(&job_with(Some("24:00"), None))
            .await
            .unwrap();
        assert_eq!(max.as_deref(), Some("2014-08-09"));

        // additional_arguments wins over the column.
        let args = serde_json::json!({ "data_lead_time": "00:00" });
        let max = oracle
            .max_complete_date(&job_with(Some("24:00"), Some(args)))
            .await
            .unwrap();
        assert_eq!(max.as_deref(), Some("2014-08-10"));
    }
}
