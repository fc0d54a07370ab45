//! Scheduler settings.
//!
//! Settings are an immutable snapshot taken when the supervisor starts and
//! shared read-only with the queue builder and every worker. They are
//! sourced from environment variables, optionally namespaced per queue.

use std::time::Duration;

use serde::{Serialize, Serializer};

use crate::error::ConfigError;

/// Prefix for settings shared by every queue.
pub const ENV_PREFIX: &str = "QUASIQUEUE_";

/// Tunable scheduler parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Settings {
    /// Name used in logs and metric labels.
    pub project_name: String,
    /// Lowers the default log filter to `debug` when running from the CLI.
    pub debug: bool,
    /// Target number of workers.
    pub num_processes: usize,
    /// Capacity of the shared queue.
    pub max_queue_size: usize,
    /// Window during which a queued id is not queued again.
    #[serde(serialize_with = "as_secs")]
    pub prevent_requeuing_time: Duration,
    /// How long a worker sleeps after finding the queue empty.
    #[serde(serialize_with = "as_secs")]
    pub empty_queue_sleep_time: Duration,
    /// How long the supervisor sleeps after a skipped populate cycle.
    #[serde(serialize_with = "as_secs")]
    pub full_queue_sleep_time: Duration,
    /// Upper bound on a single queue push or pop.
    #[serde(serialize_with = "as_secs")]
    pub queue_interaction_timeout: Duration,
    /// How long workers get to exit on their own before being aborted.
    #[serde(serialize_with = "as_secs")]
    pub graceful_shutdown_timeout: Duration,
    /// Number of ids requested from the writer per populate cycle.
    pub lookup_block_size: usize,
    /// Jobs a worker handles before retiring; `None` disables recycling.
    pub max_jobs_per_process: Option<usize>,
    /// Cap on in-flight concurrent reader tasks within one worker.
    pub concurrent_tasks_per_process: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            project_name: "quasiqueue".to_string(),
            debug: false,
            num_processes: 2,
            max_queue_size: 300,
            prevent_requeuing_time: Duration::from_secs(300),
            empty_queue_sleep_time: Duration::from_secs(1),
            full_queue_sleep_time: Duration::from_secs(5),
            queue_interaction_timeout: Duration::from_millis(10),
            graceful_shutdown_timeout: Duration::from_secs(30),
            lookup_block_size: 10,
            max_jobs_per_process: Some(200),
            concurrent_tasks_per_process: 4,
        }
    }
}

impl Settings {
    /// Creates settings with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates settings from `QUASIQUEUE_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a variable cannot be parsed or the result
    /// fails validation.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_env_prefix(ENV_PREFIX)
    }

    /// Creates settings for a named queue from `QUASIQUEUE_<NAME>_*`
    /// environment variables.
    ///
    /// The name is upper-cased and dashes become underscores, so the queue
    /// `web-crawl` reads `QUASIQUEUE_WEB_CRAWL_NUM_PROCESSES`.
    pub fn for_queue(name: &str) -> Result<Self, ConfigError> {
        Self::from_env_prefix(&queue_env_prefix(name))
    }

    /// Creates settings from environment variables sharing `prefix`.
    ///
    /// # Environment Variables
    ///
    /// - `<PREFIX>PROJECT_NAME` (default: quasiqueue)
    /// - `<PREFIX>DEBUG` (default: false)
    /// - `<PREFIX>NUM_PROCESSES` (default: 2)
    /// - `<PREFIX>MAX_QUEUE_SIZE` (default: 300)
    /// - `<PREFIX>PREVENT_REQUEUING_TIME` seconds (default: 300)
    /// - `<PREFIX>EMPTY_QUEUE_SLEEP_TIME` seconds (default: 1.0)
    /// - `<PREFIX>FULL_QUEUE_SLEEP_TIME` seconds (default: 5.0)
    /// - `<PREFIX>QUEUE_INTERACTION_TIMEOUT` seconds (default: 0.01)
    /// - `<PREFIX>GRACEFUL_SHUTDOWN_TIMEOUT` seconds (default: 30)
    /// - `<PREFIX>LOOKUP_BLOCK_SIZE` (default: 10)
    /// - `<PREFIX>MAX_JOBS_PER_PROCESS` (default: 200; `none`, empty or `0` disables)
    /// - `<PREFIX>CONCURRENT_TASKS_PER_PROCESS` (default: 4)
    pub fn from_env_prefix(prefix: &str) -> Result<Self, ConfigError> {
        Self::from_lookup(prefix, |key| std::env::var(key).ok())
    }

    /// Builds settings from an arbitrary key lookup. Used by `from_env_prefix`
    /// and by tests that must not touch the process environment.
    pub(crate) fn from_lookup<F>(prefix: &str, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let get = |field: &str| {
            let key = format!("{}{}", prefix, field);
            lookup(&key).map(|val| (key, val))
        };

        if let Some((_, val)) = get("PROJECT_NAME") {
            config.project_name = val;
        }

        if let Some((key, val)) = get("DEBUG") {
            config.debug = parse_env_bool(&val, &key)?;
        }

        if let Some((key, val)) = get("NUM_PROCESSES") {
            config.num_processes = parse_env_value(&val, &key)?;
        }

        if let Some((key, val)) = get("MAX_QUEUE_SIZE") {
            config.max_queue_size = parse_env_value(&val, &key)?;
        }

        if let Some((key, val)) = get("PREVENT_REQUEUING_TIME") {
            config.prevent_requeuing_time = parse_env_secs(&val, &key)?;
        }

        if let Some((key, val)) = get("EMPTY_QUEUE_SLEEP_TIME") {
            config.empty_queue_sleep_time = parse_env_secs(&val, &key)?;
        }

        if let Some((key, val)) = get("FULL_QUEUE_SLEEP_TIME") {
            config.full_queue_sleep_time = parse_env_secs(&val, &key)?;
        }

        if let Some((key, val)) = get("QUEUE_INTERACTION_TIMEOUT") {
            config.queue_interaction_timeout = parse_env_secs(&val, &key)?;
        }

        if let Some((key, val)) = get("GRACEFUL_SHUTDOWN_TIMEOUT") {
            config.graceful_shutdown_timeout = parse_env_secs(&val, &key)?;
        }

        if let Some((key, val)) = get("LOOKUP_BLOCK_SIZE") {
            config.lookup_block_size = parse_env_value(&val, &key)?;
        }

        if let Some((key, val)) = get("MAX_JOBS_PER_PROCESS") {
            config.max_jobs_per_process = parse_env_quota(&val, &key)?;
        }

        if let Some((key, val)) = get("CONCURRENT_TASKS_PER_PROCESS") {
            config.concurrent_tasks_per_process = parse_env_value(&val, &key)?;
        }

        config.validate()?;
        Ok(config)
    }

    /// Validates the configuration values.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::ValidationFailed` if any values are invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.num_processes == 0 {
            return Err(ConfigError::ValidationFailed(
                "num_processes must be greater than 0".to_string(),
            ));
        }

        // Below 2 the 80% fill target rounds down to zero and nothing is ever fetched.
        if self.max_queue_size < 2 {
            return Err(ConfigError::ValidationFailed(
                "max_queue_size must be at least 2".to_string(),
            ));
        }

        if self.lookup_block_size == 0 {
            return Err(ConfigError::ValidationFailed(
                "lookup_block_size must be greater than 0".to_string(),
            ));
        }

        if self.lookup_block_size > self.max_queue_size {
            return Err(ConfigError::ValidationFailed(
                "lookup_block_size cannot exceed max_queue_size".to_string(),
            ));
        }

        if self.concurrent_tasks_per_process == 0 {
            return Err(ConfigError::ValidationFailed(
                "concurrent_tasks_per_process must be greater than 0".to_string(),
            ));
        }

        if self.max_jobs_per_process == Some(0) {
            return Err(ConfigError::ValidationFailed(
                "max_jobs_per_process must be greater than 0 or unset".to_string(),
            ));
        }

        Ok(())
    }

    /// Builder method to set the project name.
    pub fn with_project_name(mut self, name: impl Into<String>) -> Self {
        self.project_name = name.into();
        self
    }

    /// Builder method to enable debug logging.
    pub fn with_debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }

    /// Builder method to set the worker count.
    pub fn with_num_processes(mut self, n: usize) -> Self {
        self.num_processes = n;
        self
    }

    /// Builder method to set the queue capacity.
    pub fn with_max_queue_size(mut self, size: usize) -> Self {
        self.max_queue_size = size;
        self
    }

    /// Builder method to set the requeue suppression window.
    pub fn with_prevent_requeuing_time(mut self, window: Duration) -> Self {
        self.prevent_requeuing_time = window;
        self
    }

    /// Builder method to set the worker idle sleep.
    pub fn with_empty_queue_sleep_time(mut self, sleep: Duration) -> Self {
        self.empty_queue_sleep_time = sleep;
        self
    }

    /// Builder method to set the supervisor backoff sleep.
    pub fn with_full_queue_sleep_time(mut self, sleep: Duration) -> Self {
        self.full_queue_sleep_time = sleep;
        self
    }

    /// Builder method to set the queue push/pop timeout.
    pub fn with_queue_interaction_timeout(mut self, timeout: Duration) -> Self {
        self.queue_interaction_timeout = timeout;
        self
    }

    /// Builder method to set the graceful shutdown timeout.
    pub fn with_graceful_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.graceful_shutdown_timeout = timeout;
        self
    }

    /// Builder method to set the writer block size.
    pub fn with_lookup_block_size(mut self, size: usize) -> Self {
        self.lookup_block_size = size;
        self
    }

    /// Builder method to set (or disable with `None`) the per-worker job quota.
    pub fn with_max_jobs_per_process(mut self, quota: Option<usize>) -> Self {
        self.max_jobs_per_process = quota;
        self
    }

    /// Builder method to set the per-worker concurrency cap.
    pub fn with_concurrent_tasks_per_process(mut self, cap: usize) -> Self {
        self.concurrent_tasks_per_process = cap;
        self
    }
}

/// Environment prefix for a named queue.
pub fn queue_env_prefix(name: &str) -> String {
    format!(
        "{}{}_",
        ENV_PREFIX,
        name.trim().to_uppercase().replace('-', "_")
    )
}

fn as_secs<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(value.as_secs_f64())
}

/// Parse an environment variable value into a type.
fn parse_env_value<T: std::str::FromStr>(value: &str, key: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("could not parse '{}'", value),
    })
}

/// Parse an environment variable as a boolean.
fn parse_env_bool(value: &str, key: &str) -> Result<bool, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("expected boolean value, got '{}'", value),
        }),
    }
}

/// Parse an environment variable holding fractional seconds.
fn parse_env_secs(value: &str, key: &str) -> Result<Duration, ConfigError> {
    let secs: f64 = parse_env_value(value, key)?;
    Duration::try_from_secs_f64(secs).map_err(|_| ConfigError::InvalidValue {
        key: key.to_string(),
        message: format!("expected a non-negative number of seconds, got '{}'", value),
    })
}

/// Parse an optional job quota; `none`, `null`, empty and `0` disable it.
fn parse_env_quota(value: &str, key: &str) -> Result<Option<usize>, ConfigError> {
    match value.trim().to_lowercase().as_str() {
        "" | "none" | "null" | "0" => Ok(None),
        other => parse_env_value(other, key).map(Some),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.project_name, "quasiqueue");
        assert_eq!(settings.num_processes, 2);
        assert_eq!(settings.max_queue_size, 300);
        assert_eq!(settings.prevent_requeuing_time, Duration::from_secs(300));
        assert_eq!(settings.empty_queue_sleep_time, Duration::from_secs(1));
        assert_eq!(settings.full_queue_sleep_time, Duration::from_secs(5));
        assert_eq!(settings.queue_interaction_timeout, Duration::from_millis(10));
        assert_eq!(settings.graceful_shutdown_timeout, Duration::from_secs(30));
        assert_eq!(settings.lookup_block_size, 10);
        assert_eq!(settings.max_jobs_per_process, Some(200));
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_named_queue_prefix() {
        assert_eq!(queue_env_prefix("crawler"), "QUASIQUEUE_CRAWLER_");
        assert_eq!(queue_env_prefix("web-crawl"), "QUASIQUEUE_WEB_CRAWL_");
    }

    #[test]
    fn test_from_lookup_overrides() {
        let settings = Settings::from_lookup(
            "QUASIQUEUE_TESTING_",
            lookup_from(&[
                ("QUASIQUEUE_TESTING_NUM_PROCESSES", "6"),
                ("QUASIQUEUE_TESTING_PREVENT_REQUEUING_TIME", "1.5"),
                ("QUASIQUEUE_TESTING_MAX_JOBS_PER_PROCESS", "none"),
                ("QUASIQUEUE_TESTING_DEBUG", "yes"),
                // Unprefixed keys belong to another namespace.
                ("QUASIQUEUE_MAX_QUEUE_SIZE", "5"),
            ]),
        )
        .expect("settings should load");

        assert_eq!(settings.num_processes, 6);
        assert_eq!(settings.prevent_requeuing_time, Duration::from_millis(1500));
        assert_eq!(settings.max_jobs_per_process, None);
        assert!(settings.debug);
        assert_eq!(settings.max_queue_size, 300);
    }

    #[test]
    fn test_from_lookup_invalid_value() {
        let result = Settings::from_lookup(
            ENV_PREFIX,
            lookup_from(&[("QUASIQUEUE_NUM_PROCESSES", "many")]),
        );
        let err = result.unwrap_err();
        assert!(err.to_string().contains("QUASIQUEUE_NUM_PROCESSES"));

        let result = Settings::from_lookup(
            ENV_PREFIX,
            lookup_from(&[("QUASIQUEUE_FULL_QUEUE_SLEEP_TIME", "-1")]),
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_failures() {
        let cases = [
            (Settings::default().with_num_processes(0), "num_processes"),
            (Settings::default().with_max_queue_size(0), "max_queue_size"),
            (Settings::default().with_lookup_block_size(0), "lookup_block_size"),
            (
                Settings::default().with_max_queue_size(5).with_lookup_block_size(10),
                "lookup_block_size",
            ),
            (
                Settings::default().with_concurrent_tasks_per_process(0),
                "concurrent_tasks_per_process",
            ),
            (
                Settings::default().with_max_jobs_per_process(Some(0)),
                "max_jobs_per_process",
            ),
        ];

        for (settings, field) in cases {
            let err = settings.validate().unwrap_err();
            assert!(err.to_string().contains(field), "expected {} in {}", field, err);
        }
    }

    #[test]
    fn test_serializes_durations_as_seconds() {
        let value = serde_json::to_value(Settings::default()).expect("should serialize");
        assert_eq!(value["queue_interaction_timeout"], serde_json::json!(0.01));
        assert_eq!(value["max_jobs_per_process"], serde_json::json!(200));
    }
}
