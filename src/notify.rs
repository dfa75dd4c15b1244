//! # Outcome Notifications
//!
//! Fire-and-forget notifications about job outcomes. A failed notification
//! is logged and dropped; it must never fail the run that produced it.

use async_trait::async_trait;
use serde_json::Value as JsonValue;

use crate::models::scheduled_job;
use crate::status::JobStatus;

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Announce a job outcome to its contacts. Implementations report
    /// failure through their own logging; callers ignore it.
    async fn notify(
        &self,
        final_status: JobStatus,
        job: &scheduled_job::Model,
        extra_info: Option<&str>,
    );
}

/// Default notifier: a structured log line per outcome. Stands in for the
/// mail delivery the deployment environment wires up.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(
        &self,
        final_status: JobStatus,
        job: &scheduled_job::Model,
        extra_info: Option<&str>,
    ) {
        let contacts = job
            .contact_emails
            .as_ref()
            .and_then(JsonValue::as_array)
            .map(|list| list.len())
            .unwrap_or(0);

        tracing::info!(
            job_key = %job.job_key,
            log_name = %job.log_name,
            status = %final_status,
            watermark = job.last_successful_date.as_deref().unwrap_or("-"),
            contacts,
            extra = extra_info.unwrap_or(""),
            "Job outcome notification"
        );
    }
}

#[cfg(test)]
pub mod testing {
    use std::sync::Mutex;

    use super::*;

    /// Records notifications for assertions.
    #[derive(Default)]
    pub struct RecordingNotifier {
        pub seen: Mutex<Vec<(String, JobStatus, Option<String>)>>,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(
            &self,
            final_status: JobStatus,
            job: &scheduled_job::Model,
            extra_info: Option<&str>,
        ) {
            self.seen.lock().unwrap().push((
                job.job_key.clone(),
                final_status,
                extra_info.map(str::to_string),
            ));
        }
    }
}
