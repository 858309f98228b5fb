//! Adaptive concurrency control
//!
//! Recomputes the admission limit from a rolling window of task latencies
//! and the current backlog. Growth is cautious (+1 per evaluation) and only
//! happens when there is demand; shrinking happens when the downstream work
//! is slow.

use std::collections::VecDeque;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::{duration_millis, ConfigError};

/// Controller configuration
///
/// # Example
///
/// ```
/// use conveyor_scheduler::ControllerConfig;
///
/// let config = ControllerConfig::default()
///     .with_bounds(1, 8)
///     .with_baseline(2);
///
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ControllerConfig {
    /// Initial limit, and the value restored when the scheduler goes idle
    pub baseline: usize,

    /// Lower bound for the limit
    pub min_concurrent: usize,

    /// Upper bound for the limit
    pub max_concurrent: usize,

    /// Number of recent latencies kept for the average
    pub window_size: usize,

    /// Samples required before latency-based rules fire
    pub min_samples: usize,

    /// Average latency below which a backlog grows the limit
    #[serde(with = "duration_millis")]
    pub fast_latency: Duration,

    /// Average latency above which the limit shrinks
    #[serde(with = "duration_millis")]
    pub slow_latency: Duration,

    /// Average latency still acceptable for backlog relief
    #[serde(with = "duration_millis")]
    pub moderate_latency: Duration,

    /// Queue length above which backlog relief applies
    pub backlog_threshold: usize,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            baseline: 3,
            min_concurrent: 1,
            max_concurrent: 5,
            window_size: 10,
            min_samples: 3,
            fast_latency: Duration::from_secs(10),
            slow_latency: Duration::from_secs(30),
            moderate_latency: Duration::from_secs(20),
            backlog_threshold: 5,
        }
    }
}

impl ControllerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the baseline limit
    pub fn with_baseline(mut self, baseline: usize) -> Self {
        self.baseline = baseline;
        self
    }

    /// Set the min/max bounds
    pub fn with_bounds(mut self, min: usize, max: usize) -> Self {
        self.min_concurrent = min;
        self.max_concurrent = max;
        self
    }

    /// Set the rolling window size
    pub fn with_window_size(mut self, size: usize) -> Self {
        self.window_size = size.max(1);
        self
    }

    /// Set the minimum sample count
    pub fn with_min_samples(mut self, samples: usize) -> Self {
        self.min_samples = samples;
        self
    }

    /// Set the fast / moderate / slow latency thresholds
    pub fn with_latency_thresholds(
        mut self,
        fast: Duration,
        moderate: Duration,
        slow: Duration,
    ) -> Self {
        self.fast_latency = fast;
        self.moderate_latency = moderate;
        self.slow_latency = slow;
        self
    }

    /// Set the backlog relief threshold
    pub fn with_backlog_threshold(mut self, threshold: usize) -> Self {
        self.backlog_threshold = threshold;
        self
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_concurrent == 0 {
            return Err(ConfigError::Invalid(
                "min_concurrent must be at least 1".into(),
            ));
        }
        if self.min_concurrent > self.max_concurrent {
            return Err(ConfigError::Invalid(
                "min_concurrent must not exceed max_concurrent".into(),
            ));
        }
        if self.baseline < self.min_concurrent || self.baseline > self.max_concurrent {
            return Err(ConfigError::Invalid(format!(
                "baseline {} outside [{}, {}]",
                self.baseline, self.min_concurrent, self.max_concurrent
            )));
        }
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be at least 1".into()));
        }
        if self.fast_latency > self.slow_latency {
            return Err(ConfigError::Invalid(
                "fast_latency must not exceed slow_latency".into(),
            ));
        }
        if self.moderate_latency < self.fast_latency || self.moderate_latency > self.slow_latency {
            return Err(ConfigError::Invalid(format!(
                "moderate_latency {:?} outside [{:?}, {:?}]",
                self.moderate_latency, self.fast_latency, self.slow_latency
            )));
        }
        Ok(())
    }
}

/// Which rule fired during an evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdjustmentReason {
    /// Queue and in-flight are both empty
    IdleReset,
    /// Fast tasks with a non-empty queue
    FastWithBacklog,
    /// Average latency above the slow threshold
    Slow,
    /// Large backlog at moderate latency
    BacklogRelief,
    /// Not enough samples to judge
    InsufficientSamples,
    /// No rule matched
    Steady,
}

/// Outcome of one controller evaluation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Adjustment {
    pub previous: usize,
    pub current: usize,
    pub reason: AdjustmentReason,
}

impl Adjustment {
    pub fn changed(&self) -> bool {
        self.previous != self.current
    }

    /// The limit grew, so there may be capacity to admit more work right now
    pub fn increased(&self) -> bool {
        self.current > self.previous
    }
}

/// Admission limit plus the latency window it is derived from
///
/// Not synchronized on its own: the dispatcher keeps it under the same lock
/// as the queue and in-flight set so admission never sees a stale limit.
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    config: ControllerConfig,
    limit: usize,
    latencies: VecDeque<Duration>,
}

impl ConcurrencyController {
    /// Bounds, baseline and window are normalised so later arithmetic never
    /// sees `min > max` or an empty window, even for unvalidated configs.
    pub fn new(mut config: ControllerConfig) -> Self {
        config.min_concurrent = config.min_concurrent.max(1);
        config.max_concurrent = config.max_concurrent.max(config.min_concurrent);
        config.baseline = config
            .baseline
            .clamp(config.min_concurrent, config.max_concurrent);
        config.window_size = config.window_size.max(1);
        let limit = config.baseline;
        Self {
            latencies: VecDeque::with_capacity(config.window_size),
            limit,
            config,
        }
    }

    /// Current admission limit
    pub fn limit(&self) -> usize {
        self.limit
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.config
    }

    /// Record the latency of a settled task
    pub fn record_latency(&mut self, latency: Duration) {
        while self.latencies.len() >= self.config.window_size {
            self.latencies.pop_front();
        }
        self.latencies.push_back(latency);
    }

    pub fn sample_count(&self) -> usize {
        self.latencies.len()
    }

    /// Mean of the rolling window, zero when empty
    pub fn average_latency(&self) -> Duration {
        if self.latencies.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.latencies.iter().sum();
        total / self.latencies.len() as u32
    }

    /// Apply the first matching rule and return what happened
    pub fn evaluate(&mut self, queue_len: usize, in_flight: usize) -> Adjustment {
        let previous = self.limit;

        if queue_len == 0 && in_flight == 0 {
            self.set_limit(self.config.baseline);
            return self.adjustment(previous, AdjustmentReason::IdleReset);
        }

        if self.latencies.len() < self.config.min_samples {
            return self.adjustment(previous, AdjustmentReason::InsufficientSamples);
        }

        let average = self.average_latency();

        if average < self.config.fast_latency && queue_len > 0 {
            self.set_limit(previous.saturating_add(1));
            return self.adjustment(previous, AdjustmentReason::FastWithBacklog);
        }

        if average > self.config.slow_latency {
            self.set_limit(previous.saturating_sub(1));
            return self.adjustment(previous, AdjustmentReason::Slow);
        }

        if queue_len > self.config.backlog_threshold && average < self.config.moderate_latency {
            self.set_limit(previous.saturating_add(1));
            return self.adjustment(previous, AdjustmentReason::BacklogRelief);
        }

        self.adjustment(previous, AdjustmentReason::Steady)
    }

    /// Force a limit, clamped into the configured bounds
    pub fn set_limit(&mut self, limit: usize) {
        self.limit = limit.clamp(self.config.min_concurrent, self.config.max_concurrent);
    }

    fn adjustment(&self, previous: usize, reason: AdjustmentReason) -> Adjustment {
        Adjustment {
            previous,
            current: self.limit,
            reason,
        }
    }
}
