// Scheduler configuration
//
// Defaults, builder setters, validation and loading from environment
// variables. Durations are (de)serialized as milliseconds.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::controller::ControllerConfig;

/// Configuration errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum ConfigError {
    /// Values are inconsistent with each other
    #[error("invalid scheduler configuration: {0}")]
    Invalid(String),

    /// An environment variable could not be parsed
    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

/// Retention of finished task records for status queries
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RetentionConfig {
    /// How long a finished record stays queryable
    #[serde(with = "duration_millis")]
    pub finished_ttl: Duration,

    /// Maximum number of finished records kept
    pub finished_capacity: usize,
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            finished_ttl: Duration::from_secs(60 * 60),
            finished_capacity: 1000,
        }
    }
}

/// Scheduler configuration
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use conveyor_scheduler::{ControllerConfig, SchedulerConfig};
///
/// let config = SchedulerConfig::default()
///     .with_controller(ControllerConfig::default().with_baseline(2))
///     .with_heartbeat_interval(Duration::from_millis(500));
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SchedulerConfig {
    /// Concurrency controller settings
    pub controller: ControllerConfig,

    /// Interval of elapsed-time re-broadcasts for in-flight tasks
    #[serde(with = "duration_millis")]
    pub heartbeat_interval: Duration,

    /// Interval of controller re-evaluation
    #[serde(with = "duration_millis")]
    pub evaluation_interval: Duration,

    /// Poll interval used by `wait_for_quiescence`
    #[serde(with = "duration_millis")]
    pub quiescence_poll_interval: Duration,

    /// Finished record retention
    pub retention: RetentionConfig,

    /// Upper bound on a single history save
    #[serde(with = "duration_millis")]
    pub history_save_timeout: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            controller: ControllerConfig::default(),
            heartbeat_interval: Duration::from_secs(1),
            evaluation_interval: Duration::from_secs(30),
            quiescence_poll_interval: Duration::from_millis(500),
            retention: RetentionConfig::default(),
            history_save_timeout: Duration::from_secs(10),
        }
    }
}

impl SchedulerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the controller configuration
    pub fn with_controller(mut self, controller: ControllerConfig) -> Self {
        self.controller = controller;
        self
    }

    /// Set the heartbeat interval
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    /// Set the controller evaluation interval
    pub fn with_evaluation_interval(mut self, interval: Duration) -> Self {
        self.evaluation_interval = interval;
        self
    }

    /// Set the quiescence poll interval
    pub fn with_quiescence_poll_interval(mut self, interval: Duration) -> Self {
        self.quiescence_poll_interval = interval;
        self
    }

    /// Set finished record retention
    pub fn with_retention(mut self, ttl: Duration, capacity: usize) -> Self {
        self.retention = RetentionConfig {
            finished_ttl: ttl,
            finished_capacity: capacity,
        };
        self
    }

    /// Set the history save timeout
    pub fn with_history_save_timeout(mut self, timeout: Duration) -> Self {
        self.history_save_timeout = timeout;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.controller.validate()?;

        for (name, interval) in [
            ("heartbeat_interval", self.heartbeat_interval),
            ("evaluation_interval", self.evaluation_interval),
            ("quiescence_poll_interval", self.quiescence_poll_interval),
            ("history_save_timeout", self.history_save_timeout),
        ] {
            if interval.is_zero() {
                return Err(ConfigError::Invalid(format!("{} must be non-zero", name)));
            }
        }

        Ok(())
    }

    /// Create configuration from environment variables
    ///
    /// Environment variables (all optional, defaults otherwise):
    /// - `SCHEDULER_BASELINE_CONCURRENCY`, `SCHEDULER_MIN_CONCURRENCY`, `SCHEDULER_MAX_CONCURRENCY`
    /// - `SCHEDULER_LATENCY_WINDOW`, `SCHEDULER_MIN_SAMPLES`
    /// - `SCHEDULER_FAST_LATENCY_MS`, `SCHEDULER_MODERATE_LATENCY_MS`, `SCHEDULER_SLOW_LATENCY_MS`
    /// - `SCHEDULER_BACKLOG_THRESHOLD`
    /// - `SCHEDULER_HEARTBEAT_INTERVAL_MS`, `SCHEDULER_EVALUATION_INTERVAL_MS`
    /// - `SCHEDULER_QUIESCENCE_POLL_MS`
    /// - `SCHEDULER_FINISHED_TTL_MS`, `SCHEDULER_FINISHED_CAPACITY`
    /// - `SCHEDULER_HISTORY_SAVE_TIMEOUT_MS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an injectable variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        let env = EnvReader { lookup: &lookup };

        let c = &mut config.controller;
        env.read("SCHEDULER_BASELINE_CONCURRENCY", &mut c.baseline)?;
        env.read("SCHEDULER_MIN_CONCURRENCY", &mut c.min_concurrent)?;
        env.read("SCHEDULER_MAX_CONCURRENCY", &mut c.max_concurrent)?;
        env.read("SCHEDULER_LATENCY_WINDOW", &mut c.window_size)?;
        env.read("SCHEDULER_MIN_SAMPLES", &mut c.min_samples)?;
        env.read_millis("SCHEDULER_FAST_LATENCY_MS", &mut c.fast_latency)?;
        env.read_millis("SCHEDULER_MODERATE_LATENCY_MS", &mut c.moderate_latency)?;
        env.read_millis("SCHEDULER_SLOW_LATENCY_MS", &mut c.slow_latency)?;
        env.read("SCHEDULER_BACKLOG_THRESHOLD", &mut c.backlog_threshold)?;

        env.read_millis("SCHEDULER_HEARTBEAT_INTERVAL_MS", &mut config.heartbeat_interval)?;
        env.read_millis("SCHEDULER_EVALUATION_INTERVAL_MS", &mut config.evaluation_interval)?;
        env.read_millis("SCHEDULER_QUIESCENCE_POLL_MS", &mut config.quiescence_poll_interval)?;
        env.read_millis("SCHEDULER_FINISHED_TTL_MS", &mut config.retention.finished_ttl)?;
        env.read("SCHEDULER_FINISHED_CAPACITY", &mut config.retention.finished_capacity)?;
        env.read_millis("SCHEDULER_HISTORY_SAVE_TIMEOUT_MS", &mut config.history_save_timeout)?;

        config.validate()?;
        Ok(config)
    }
}

struct EnvReader<'a, F> {
    lookup: &'a F,
}

impl<F> EnvReader<'_, F>
where
    F: Fn(&str) -> Option<String>,
{
    fn read<T: FromStr>(&self, name: &'static str, target: &mut T) -> Result<(), ConfigError> {
        if let Some(raw) = (self.lookup)(name) {
            *target = raw
                .trim()
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name, value: raw })?;
        }
        Ok(())
    }

    fn read_millis(&self, name: &'static str, target: &mut Duration) -> Result<(), ConfigError> {
        let mut millis = target.as_millis() as u64;
        self.read(name, &mut millis)?;
        *target = Duration::from_millis(millis);
        Ok(())
    }
}

/// Serde support for Duration as milliseconds
pub(crate) mod duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        (duration.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config() {
        let config = SchedulerConfig::default();
        assert_eq!(config.controller.baseline, 3);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(1));
        assert_eq!(config.evaluation_interval, Duration::from_secs(30));
        assert_eq!(config.quiescence_poll_interval, Duration::from_millis(500));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_overrides() {
        let config = SchedulerConfig::from_lookup(lookup(&[
            ("SCHEDULER_BASELINE_CONCURRENCY", "2"),
            ("SCHEDULER_MAX_CONCURRENCY", "8"),
            ("SCHEDULER_HEARTBEAT_INTERVAL_MS", "250"),
            ("SCHEDULER_FINISHED_CAPACITY", " 50 "),
        ]))
        .unwrap();

        assert_eq!(config.controller.baseline, 2);
        assert_eq!(config.controller.max_concurrent, 8);
        assert_eq!(config.heartbeat_interval, Duration::from_millis(250));
        assert_eq!(config.retention.finished_capacity, 50);
        assert_eq!(config.evaluation_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_from_lookup_rejects_garbage() {
        let err = SchedulerConfig::from_lookup(lookup(&[("SCHEDULER_MIN_SAMPLES", "three")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidEnv {
                name: "SCHEDULER_MIN_SAMPLES",
                ..
            }
        ));
    }

    #[test]
    fn test_from_lookup_validates() {
        let err = SchedulerConfig::from_lookup(lookup(&[("SCHEDULER_BASELINE_CONCURRENCY", "9")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_zero_interval_rejected() {
        let config = SchedulerConfig::default().with_heartbeat_interval(Duration::ZERO);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_serde_durations_in_millis() {
        let config = SchedulerConfig::default();
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["heartbeat_interval"], 1000);
        assert_eq!(json["controller"]["slow_latency"], 30_000);

        let parsed: SchedulerConfig = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, config);
    }
}
