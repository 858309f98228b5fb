use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use conveyor_scheduler::telemetry::{init_telemetry, TelemetryConfig};
use conveyor_scheduler::{
    worker_fn, InMemoryHistoryStore, Scheduler, SchedulerConfig, TaskPriority, TaskRequest,
    TaskStatus, WorkerError, WorkerOutput,
};
use rand::Rng;
use serde_json::json;

/// Synthetic load settings
#[derive(Debug, Clone)]
struct SoakConfig {
    tasks: usize,
    owners: usize,
    min_ms: u64,
    max_ms: u64,
    failure_rate: f64,
}

impl SoakConfig {
    /// Environment variables:
    /// - `SOAK_TASKS` (default 50), `SOAK_OWNERS` (default 4)
    /// - `SOAK_MIN_MS` / `SOAK_MAX_MS`: worker sleep range (default 200..2000)
    /// - `SOAK_FAILURE_RATE`: probability a task fails (default 0.1)
    fn from_env() -> Result<Self> {
        let config = Self {
            tasks: env_or("SOAK_TASKS", 50)?,
            owners: env_or("SOAK_OWNERS", 4)?,
            min_ms: env_or("SOAK_MIN_MS", 200)?,
            max_ms: env_or("SOAK_MAX_MS", 2_000)?,
            failure_rate: env_or("SOAK_FAILURE_RATE", 0.1)?,
        };
        anyhow::ensure!(config.owners > 0, "SOAK_OWNERS must be positive");
        anyhow::ensure!(config.min_ms <= config.max_ms, "SOAK_MIN_MS exceeds SOAK_MAX_MS");
        anyhow::ensure!(
            (0.0..=1.0).contains(&config.failure_rate),
            "SOAK_FAILURE_RATE must be within 0..=1"
        );
        Ok(config)
    }
}

impl SoakConfig {
    /// Worst case for draining every task one at a time
    fn drain_budget(&self) -> Duration {
        Duration::from_millis(self.max_ms.max(1))
            .checked_mul(u32::try_from(self.tasks.max(1)).unwrap_or(u32::MAX))
            .unwrap_or(Duration::MAX)
    }
}

fn env_or<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .with_context(|| format!("Invalid value for {}: {:?}", name, raw)),
        Err(_) => Ok(default),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let mut telemetry_config = TelemetryConfig::from_env();
    if telemetry_config.log_filter.is_none() {
        telemetry_config.log_filter = Some("conveyor_scheduler=info,conveyor_soak=info".to_string());
    }
    init_telemetry(telemetry_config);

    let soak = SoakConfig::from_env()?;
    let config = SchedulerConfig::from_env().context("Failed to load scheduler configuration")?;
    tracing::info!(?soak, ?config, "conveyor-soak starting...");

    let history = Arc::new(InMemoryHistoryStore::new());
    let (min_ms, max_ms, failure_rate) = (soak.min_ms, soak.max_ms, soak.failure_rate);
    let worker = worker_fn(move |payload, progress| async move {
        let (sleep_ms, fail) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(min_ms..=max_ms), rng.gen_bool(failure_rate))
        };

        progress.report(0, 2, "Warming up");
        tokio::time::sleep(Duration::from_millis(sleep_ms / 2)).await;
        progress.report(1, 2, "Halfway");
        tokio::time::sleep(Duration::from_millis(sleep_ms - sleep_ms / 2)).await;

        if fail {
            return Err(WorkerError::new("synthetic failure").with_kind("soak"));
        }
        Ok(WorkerOutput::new(json!({ "slept_ms": sleep_ms, "input": payload })))
    });

    let scheduler = Scheduler::builder(worker)
        .with_config(config)
        .with_history_store(history.clone())
        .build()
        .context("Failed to build scheduler")?;
    scheduler.start()?;

    for i in 0..soak.tasks {
        let priority = if i % 5 == 0 {
            TaskPriority::High
        } else {
            TaskPriority::Normal
        };
        let request = TaskRequest::new(format!("owner-{}", i % soak.owners), json!({ "n": i }))
            .with_priority(priority)
            .with_total_steps(2);
        scheduler.submit(request).context("Failed to submit task")?;
    }

    let budget = soak.drain_budget();
    tokio::select! {
        drained = scheduler.wait_for_quiescence(budget) => {
            if !drained {
                tracing::warn!("Load did not drain within budget");
            }
        }
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("Received shutdown signal");
        }
    }

    let stats = scheduler.aggregate_stats();
    let records = history.records();
    let failed = records
        .iter()
        .filter(|r| r.status == TaskStatus::Failed)
        .count();
    tracing::info!(
        queue_size = stats.queue_size,
        in_flight = stats.in_flight_count,
        concurrency_limit = stats.concurrency_limit,
        average_latency_ms = stats.average_latency_ms,
        history_records = records.len(),
        failed,
        "Soak finished"
    );

    scheduler.stop();
    tracing::info!("Scheduler shutdown complete");
    Ok(())
}
