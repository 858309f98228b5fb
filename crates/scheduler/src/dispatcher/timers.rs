//! Periodic loops armed by `Scheduler::start`
//!
//! Both loops hold a weak reference so that dropping every scheduler handle
//! ends them even if `stop()` is never called.

use std::sync::{Arc, Weak};
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::debug;

use super::Inner;

/// Re-broadcast progress and elapsed time for every running task
pub(super) fn spawn_heartbeat_loop(
    inner: &Arc<Inner>,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_ticker(inner, period, shutdown_rx, "Heartbeat", |inner| {
        inner.heartbeat_tick();
    })
}

/// Re-evaluate the concurrency limit and prune finished records
pub(super) fn spawn_evaluation_loop(
    inner: &Arc<Inner>,
    period: Duration,
    shutdown_rx: watch::Receiver<bool>,
) -> JoinHandle<()> {
    spawn_ticker(inner, period, shutdown_rx, "Evaluation", |inner| {
        inner.evaluation_tick();
    })
}

fn spawn_ticker<F>(
    inner: &Arc<Inner>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    name: &'static str,
    on_tick: F,
) -> JoinHandle<()>
where
    F: Fn(&Arc<Inner>) + Send + 'static,
{
    let weak: Weak<Inner> = Arc::downgrade(inner);

    inner.runtime.spawn(async move {
        // First tick one period out; `interval` would fire immediately
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let Some(inner) = weak.upgrade() else {
                        debug!(loop_name = name, "Scheduler dropped");
                        break;
                    };
                    on_tick(&inner);
                }
                _ = shutdown_rx.changed() => {
                    debug!(loop_name = name, "Shutdown requested");
                    break;
                }
            }
        }

        debug!(loop_name = name, "Loop exited");
    })
}
