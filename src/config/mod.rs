//! Configuration loading for the ETL scheduler.
//!
//! Loads layered `.env` files and environment variables prefixed with
//! `ETLSCHED_`, producing a typed [`AppConfig`].

use std::{collections::BTreeMap, env, path::PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::queue::QueueConfig;

/// Application configuration derived from `ETLSCHED_*` environment variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct AppConfig {
    #[serde(default = "default_profile")]
    pub profile: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    #[serde(default = "default_db_acquire_timeout_ms")]
    pub db_acquire_timeout_ms: u64,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub worker: WorkerConfig,
    #[serde(default)]
    pub queue: QueueSection,
    #[serde(default)]
    pub retry: RetryConfig,
}

/// Scanner-specific configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct ScannerConfig {
    /// Ceiling on the gap between maintenance+scan passes, even with an
    /// idle feedback queue.
    #[serde(default = "default_scanner_maintenance_interval_seconds")]
    pub maintenance_interval_seconds: u64,
    /// A RUNNING job with a heartbeat older than this is considered
    /// abandoned by its worker.
    #[serde(default = "default_scanner_worker_keepalive_timeout_seconds")]
    pub worker_keepalive_timeout_seconds: u64,
}

/// Worker-specific configuration parameters.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct WorkerConfig {
    /// Bound on concurrently executing runs within one work item.
    #[serde(default = "default_worker_max_runs_in_flight")]
    pub max_runs_in_flight: usize,
    /// Target interval between RUNNING heartbeats.
    #[serde(default = "default_worker_keepalive_interval_seconds")]
    pub keepalive_interval_seconds: u64,
    /// External program invoked per (date, step); unset means dummy runs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step_command: Option<String>,
    /// Force the fake step runner even when a command is configured.
    #[serde(default)]
    pub dummy_run: bool,
}

/// Queue names plus the shared queue tuning knobs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct QueueSection {
    #[serde(default = "default_work_queue_name")]
    pub work_queue_name: String,
    #[serde(default = "default_feedback_queue_name")]
    pub feedback_queue_name: String,
    #[serde(flatten)]
    pub tuning: QueueConfig,
}

/// Error retry configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub struct RetryConfig {
    /// Automatic retries granted to a job before it parks in ERROR.
    #[serde(default = "default_max_error_retries")]
    pub max_error_retries: i32,
    /// Base of the exponential retry backoff in seconds.
    #[serde(default = "default_retry_base_seconds")]
    pub retry_base_seconds: i64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            profile: default_profile(),
            log_level: default_log_level(),
            log_format: default_log_format(),
            database_url: default_database_url(),
            db_max_connections: default_db_max_connections(),
            db_acquire_timeout_ms: default_db_acquire_timeout_ms(),
            scanner: ScannerConfig::default(),
            worker: WorkerConfig::default(),
            queue: QueueSection::default(),
            retry: RetryConfig::default(),
        }
    }
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            maintenance_interval_seconds: default_scanner_maintenance_interval_seconds(),
            worker_keepalive_timeout_seconds: default_scanner_worker_keepalive_timeout_seconds(),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_runs_in_flight: default_worker_max_runs_in_flight(),
            keepalive_interval_seconds: default_worker_keepalive_interval_seconds(),
            step_command: None,
            dummy_run: false,
        }
    }
}

impl Default for QueueSection {
    fn default() -> Self {
        Self {
            work_queue_name: default_work_queue_name(),
            feedback_queue_name: default_feedback_queue_name(),
            tuning: QueueConfig::default(),
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_error_retries: default_max_error_retries(),
            retry_base_seconds: default_retry_base_seconds(),
        }
    }
}

impl AppConfig {
    /// Returns a redacted JSON representation (credentials are redacted).
    pub fn redacted_json(&self) -> serde_json::Result<String> {
        let mut config = self.clone();
        if config.database_url != default_database_url() {
            config.database_url = "[REDACTED]".to_string();
        }
        serde_json::to_string_pretty(&config)
    }

    /// Validates the configuration, returning an error on out-of-range
    /// settings.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker.max_runs_in_flight == 0 {
            return Err(ConfigError::InvalidMaxRunsInFlight {
                value: self.worker.max_runs_in_flight,
            });
        }
        if self.retry.max_error_retries < 0 {
            return Err(ConfigError::InvalidMaxErrorRetries {
                value: self.retry.max_error_retries,
            });
        }
        if self.retry.retry_base_seconds <= 0 {
            return Err(ConfigError::InvalidRetryBase {
                value: self.retry.retry_base_seconds,
            });
        }
        if self.queue.work_queue_name == self.queue.feedback_queue_name {
            return Err(ConfigError::QueueNameCollision {
                name: self.queue.work_queue_name.clone(),
            });
        }
        Ok(())
    }
}

fn default_profile() -> String {
    "local".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "json".to_string()
}

fn default_database_url() -> String {
    "sqlite://etl_scheduler.db?mode=rwc".to_string()
}

fn default_db_max_connections() -> u32 {
    10
}

fn default_db_acquire_timeout_ms() -> u64 {
    5000
}

fn default_scanner_maintenance_interval_seconds() -> u64 {
    1800 // 30 minutes
}

fn default_scanner_worker_keepalive_timeout_seconds() -> u64 {
    3600 // 1 hour without a heartbeat means the worker is gone
}

fn default_worker_max_runs_in_flight() -> usize {
    4
}

fn default_worker_keepalive_interval_seconds() -> u64 {
    300 // 5 minutes
}

fn default_work_queue_name() -> String {
    "etl-work".to_string()
}

fn default_feedback_queue_name() -> String {
    "etl-feedback".to_string()
}

fn default_max_error_retries() -> i32 {
    3
}

fn default_retry_base_seconds() -> i64 {
    300
}

/// Errors that can occur while loading configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load environment file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        source: dotenvy::Error,
    },
    #[error("worker max runs in flight must be positive, got {value}")]
    InvalidMaxRunsInFlight { value: usize },
    #[error("max error retries cannot be negative, got {value}")]
    InvalidMaxErrorRetries { value: i32 },
    #[error("retry base seconds must be positive, got {value}")]
    InvalidRetryBase { value: i64 },
    #[error("work and feedback queues cannot share the name '{name}'")]
    QueueNameCollision { name: String },
}

/// Loads configuration using layered `.env` files and `ETLSCHED_*` env vars.
pub struct ConfigLoader {
    base_dir: PathBuf,
}

const ENV_PREFIX: &str = "ETLSCHED_";

impl ConfigLoader {
    /// Creates a new loader rooted at the current working directory.
    pub fn new() -> Self {
        Self {
            base_dir: env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }

    /// Creates a loader rooted at the provided directory (useful for tests).
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Loads configuration from layered `.env` files with the process
    /// environment overlaid last.
    pub fn load(&self) -> Result<AppConfig, ConfigError> {
        let (mut layered, profile_hint) = self.collect_layered_env()?;

        // Overlay process environment last so it wins.
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                layered.insert(stripped.to_string(), value);
            }
        }

        let profile = layered
            .remove("PROFILE")
            .filter(|v| !v.is_empty())
            .unwrap_or(profile_hint);

        fn take<T: std::str::FromStr>(
            layered: &mut BTreeMap<String, String>,
            key: &str,
            default: impl FnOnce() -> T,
        ) -> T {
            layered
                .remove(key)
                .and_then(|v| v.parse().ok())
                .unwrap_or_else(default)
        }

        let config = AppConfig {
            profile,
            log_level: take(&mut layered, "LOG_LEVEL", default_log_level),
            log_format: take(&mut layered, "LOG_FORMAT", default_log_format),
            database_url: take(&mut layered, "DATABASE_URL", default_database_url),
            db_max_connections: take(&mut layered, "DB_MAX_CONNECTIONS", default_db_max_connections),
            db_acquire_timeout_ms: take(
                &mut layered,
                "DB_ACQUIRE_TIMEOUT_MS",
                default_db_acquire_timeout_ms,
            ),
            scanner: ScannerConfig {
                maintenance_interval_seconds: take(
                    &mut layered,
                    "SCANNER_MAINTENANCE_INTERVAL_SECONDS",
                    default_scanner_maintenance_interval_seconds,
                ),
                worker_keepalive_timeout_seconds: take(
                    &mut layered,
                    "SCANNER_WORKER_KEEPALIVE_TIMEOUT_SECONDS",
                    default_scanner_worker_keepalive_timeout_seconds,
                ),
            },
            worker: WorkerConfig {
                max_runs_in_flight: take(
                    &mut layered,
                    "WORKER_MAX_RUNS_IN_FLIGHT",
                    default_worker_max_runs_in_flight,
                ),
                keepalive_interval_seconds: take(
                    &mut layered,
                    "WORKER_KEEPALIVE_INTERVAL_SECONDS",
                    default_worker_keepalive_interval_seconds,
                ),
                step_command: layered.remove("WORKER_STEP_COMMAND").filter(|v| !v.is_empty()),
                dummy_run: take(&mut layered, "WORKER_DUMMY_RUN", || false),
            },
            queue: QueueSection {
                work_queue_name: take(&mut layered, "WORK_QUEUE_NAME", default_work_queue_name),
                feedback_queue_name: take(
                    &mut layered,
                    "FEEDBACK_QUEUE_NAME",
                    default_feedback_queue_name,
                ),
                tuning: QueueConfig {
                    visibility_timeout_secs: take(&mut layered, "QUEUE_VISIBILITY_TIMEOUT_SECS", || {
                        QueueConfig::default().visibility_timeout_secs
                    }),
                    retention_period_secs: take(&mut layered, "QUEUE_RETENTION_PERIOD_SECS", || {
                        QueueConfig::default().retention_period_secs
                    }),
                    wait_time_secs: take(&mut layered, "QUEUE_WAIT_TIME_SECS", || {
                        QueueConfig::default().wait_time_secs
                    }),
                    poll_interval_ms: take(&mut layered, "QUEUE_POLL_INTERVAL_MS", || {
                        QueueConfig::default().poll_interval_ms
                    }),
                },
            },
            retry: RetryConfig {
                max_error_retries: take(
                    &mut layered,
                    "RETRY_MAX_ERROR_RETRIES",
                    default_max_error_retries,
                ),
                retry_base_seconds: take(
                    &mut layered,
                    "RETRY_BASE_SECONDS",
                    default_retry_base_seconds,
                ),
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn collect_layered_env(&self) -> Result<(BTreeMap<String, String>, String), ConfigError> {
        let mut values = BTreeMap::new();

        self.merge_dotenv(self.base_dir.join(".env"), &mut values)?;
        self.merge_dotenv(self.base_dir.join(".env.local"), &mut values)?;

        let profile = env::var("ETLSCHED_PROFILE")
            .ok()
            .or_else(|| values.get("PROFILE").cloned())
            .unwrap_or_else(default_profile);

        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}", &profile)),
            &mut values,
        )?;
        self.merge_dotenv(
            self.base_dir.join(format!(".env.{}.local", &profile)),
            &mut values,
        )?;

        Ok((values, profile))
    }

    fn merge_dotenv(
        &self,
        path: PathBuf,
        values: &mut BTreeMap<String, String>,
    ) -> Result<(), ConfigError> {
        match dotenvy::from_path_iter(&path) {
            Ok(iter) => {
                for item in iter {
                    let (key, value) = item.map_err(|source| ConfigError::EnvFile {
                        path: path.clone(),
                        source,
                    })?;
                    if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                        values.insert(stripped.to_string(), value);
                    }
                }
                Ok(())
            }
            Err(dotenvy::Error::Io(ref io_err))
                if io_err.kind() == std::io::ErrorKind::NotFound =>
            {
                Ok(())
            }
            Err(err) => Err(ConfigError::EnvFile { path, source: err }),
        }
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_are_valid() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.worker.max_runs_in_flight, 4);
        assert_eq!(config.retry.retry_base_seconds, 300);
    }

    #[test]
    fn validation_rejects_zero_concurrency_and_shared_queue_names() {
        let mut config = AppConfig::default();
        config.worker.max_runs_in_flight = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidMaxRunsInFlight { .. })
        ));

        let mut config = AppConfig::default();
        config.queue.feedback_queue_name = config.queue.work_queue_name.clone();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::QueueNameCollision { .. })
        ));
    }

    #[test]
    fn env_files_layer_under_the_loader() {
        let dir = tempfile::tempdir().unwrap();
        let mut base = std::fs::File::create(dir.path().join(".env")).unwrap();
        writeln!(base, "ETLSCHED_WORKER_MAX_RUNS_IN_FLIGHT=2").unwrap();
        writeln!(base, "ETLSCHED_RETRY_MAX_ERROR_RETRIES=5").unwrap();
        let mut local = std::fs::File::create(dir.path().join(".env.local")).unwrap();
        writeln!(local, "ETLSCHED_WORKER_MAX_RUNS_IN_FLIGHT=8").unwrap();

        let config = ConfigLoader::with_base_dir(dir.path().to_path_buf())
            .load()
            .unwrap();
        // .env.local wins over .env, untouched keys keep defaults.
        assert_eq!(config.worker.max_runs_in_flight, 8);
        assert_eq!(config.retry.max_error_retries, 5);
        assert_eq!(config.queue.work_queue_name, "etl-work");
    }

    #[test]
    fn redacted_json_hides_a_custom_database_url() {
        let mut config = AppConfig::default();
        config.database_url = "postgresql://user:secret@db/etl".into();
        let json = config.redacted_json().unwrap();
        assert!(!json.contains("secret"));
        assert!(json.contains("[REDACTED]"));
        // The flattened queue tuning knobs serialize alongside the names.
        assert!(json.contains("visibility_timeout_secs"));
        assert!(json.contains("etl-work"));
    }
}
