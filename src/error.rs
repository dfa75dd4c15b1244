//! # Error Handling
//!
//! Unified error type for the scheduler core. The variants follow the
//! operational taxonomy: consistency errors are fatal to the current
//! operation, transient infrastructure errors are retried with a backoff
//! sleep, step failures drive the job to ERROR, and policy violations
//! indicate an internal invariant was broken.

use thiserror::Error;

use crate::status::JobStatus;

/// Error type shared by the scanner, worker, and repositories.
#[derive(Debug, Error)]
pub enum EtlError {
    /// A status write that is not an edge of the transition table.
    /// Consistency class: the job is left untouched for the next
    /// maintenance pass to reconcile.
    #[error("invalid status transition {from} -> {to} for job {job_key}")]
    InvalidStatusTransition {
        job_key: String,
        from: JobStatus,
        to: JobStatus,
    },

    /// A job referenced by a work item or update no longer exists.
    #[error("job not found: {0}")]
    JobNotFound(String),

    /// A job row already exists for the same composite key.
    #[error("job already exists: {0}")]
    DuplicateJob(String),

    /// Unknown status string read back from the store.
    #[error("unrecognized job status: {0}")]
    UnknownStatus(String),

    /// Queue or store unavailable; callers retry with a fixed backoff.
    #[error("transient infrastructure error: {0}")]
    Transient(String),

    /// An ET or Load step itself failed. Recorded as an ERROR run result
    /// and eligible for scheduler-managed retry.
    #[error("step execution failed for {date}/{step}: {detail}")]
    StepFailed {
        date: String,
        step: String,
        detail: String,
    },

    /// A worker-job invariant was broken (e.g. a second load failure while
    /// one is already recorded). Raised loudly, never swallowed.
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    /// Unknown target cluster id.
    #[error("no cluster named {0}")]
    ClusterNotFound(String),

    /// Malformed date string where a zero-padded YYYY-MM-DD was expected.
    #[error("invalid date string: {0}")]
    InvalidDate(String),

    /// Configuration could not be loaded or validated.
    #[error("configuration error: {0}")]
    Config(String),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error(transparent)]
    Db(#[from] sea_orm::DbErr),
}

impl EtlError {
    /// Whether this error should be retried after a throttled sleep rather
    /// than failing the surrounding job or message.
    pub fn is_transient(&self) -> bool {
        match self {
            EtlError::Transient(_) => true,
            EtlError::Db(err) => matches!(
                err,
                sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_)
            ),
            _ => false,
        }
    }
}

/// Detect a unique-constraint violation across the supported backends.
pub(crate) fn is_unique_violation(error: &sea_orm::DbErr) -> bool {
    use sea_orm::RuntimeErr;

    const PG_UNIQUE: &str = "23505";
    const SQLITE_DUPLICATE_CODES: &[&str] = &["1555", "2067"];

    let runtime_err = match error {
        sea_orm::DbErr::Query(RuntimeErr::SqlxError(sqlx_err))
        | sea_orm::DbErr::Exec(RuntimeErr::SqlxError(sqlx_err)) => sqlx_err,
        _ => return false,
    };

    let Some(db_error) = runtime_err.as_database_error() else {
        return false;
    };

    if db_error.is_unique_violation() {
        return true;
    }

    if let Some(code) = db_error.code() {
        let code_str = code.as_ref();
        return code_str == PG_UNIQUE || SQLITE_DUPLICATE_CODES.contains(&code_str);
    }

    false
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(EtlError::Transient("queue down".into()).is_transient());
        assert!(
            EtlError::Db(sea_orm::DbErr::Conn(sea_orm::RuntimeErr::Internal(
                "connection refused".into()
            )))
            .is_transient()
        );
        assert!(!EtlError::Db(sea_orm::DbErr::RecordNotFound("k".into())).is_transient());
        assert!(!EtlError::JobNotFound("k".into()).is_transient());
        assert!(
            !EtlError::StepFailed {
                date: "2014-01-01".into(),
                step: "et".into(),
                detail: "boom".into(),
            }
            .is_transient()
        );
    }

    #[test]
    fn transition_error_message_names_both_statuses() {
        let err = EtlError::InvalidStatusTransition {
            job_key: "k".into(),
            from: JobStatus::Empty,
            to: JobStatus::Running,
        };
        let msg = err.to_string();
        assert!(msg.contains("empty"));
        assert!(msg.contains("running"));
    }
}
