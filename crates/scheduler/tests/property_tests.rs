//! Property-based tests using proptest
//!
//! Controller bounds, status monotonicity and admission order under
//! arbitrary inputs.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use proptest::prelude::*;
use serde_json::json;

use conveyor_scheduler::{
    worker_fn, AdjustmentReason, ConcurrencyController, ControllerConfig, Scheduler,
    SchedulerConfig, TaskPriority, TaskRequest, TaskStatus, WorkerOutput,
};

// ─── Arbitrary Strategies ───────────────────────────────────────────────────

fn arb_priority() -> impl Strategy<Value = TaskPriority> {
    prop::sample::select(vec![
        TaskPriority::High,
        TaskPriority::Normal,
        TaskPriority::Low,
    ])
}

fn arb_status() -> impl Strategy<Value = TaskStatus> {
    prop::sample::select(vec![
        TaskStatus::Pending,
        TaskStatus::Processing,
        TaskStatus::Completed,
        TaskStatus::Failed,
    ])
}

fn arb_controller_config() -> impl Strategy<Value = ControllerConfig> {
    (1usize..4, 0usize..6, 1usize..12, 0usize..12).prop_flat_map(
        |(min, spread, window, min_samples)| {
            let max = min + spread;
            (min..=max).prop_map(move |baseline| {
                ControllerConfig::default()
                    .with_bounds(min, max)
                    .with_baseline(baseline)
                    .with_window_size(window)
                    .with_min_samples(min_samples.min(window))
            })
        },
    )
}

/// One controller step: optional latency sample, then an evaluation
fn arb_step() -> impl Strategy<Value = (Option<u64>, usize, usize)> {
    (
        proptest::option::of(0u64..60_000),
        0usize..20,
        0usize..8,
    )
}

fn rank(status: TaskStatus) -> u8 {
    match status {
        TaskStatus::Pending => 0,
        TaskStatus::Processing => 1,
        TaskStatus::Completed | TaskStatus::Failed => 2,
    }
}

// ─── Controller ─────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn limit_stays_within_bounds(
        config in arb_controller_config(),
        steps in prop::collection::vec(arb_step(), 0..60),
    ) {
        let (min, max) = (config.min_concurrent, config.max_concurrent);
        let mut controller = ConcurrencyController::new(config);
        prop_assert!((min..=max).contains(&controller.limit()));

        for (latency, queue_len, in_flight) in steps {
            if let Some(ms) = latency {
                controller.record_latency(Duration::from_millis(ms));
            }
            let adjustment = controller.evaluate(queue_len, in_flight);
            prop_assert!((min..=max).contains(&adjustment.current));
            prop_assert!(adjustment.current.abs_diff(adjustment.previous) <= 1
                || adjustment.reason == AdjustmentReason::IdleReset);
        }
    }

    #[test]
    fn idle_evaluation_always_returns_to_baseline(
        config in arb_controller_config(),
        samples in prop::collection::vec(0u64..60_000, 0..20),
        forced in 0usize..10,
    ) {
        let baseline = config.baseline;
        let mut controller = ConcurrencyController::new(config);
        for ms in samples {
            controller.record_latency(Duration::from_millis(ms));
        }
        controller.set_limit(forced);

        let adjustment = controller.evaluate(0, 0);
        prop_assert_eq!(adjustment.reason, AdjustmentReason::IdleReset);
        prop_assert_eq!(controller.limit(), baseline);
    }

    #[test]
    fn window_never_exceeds_size(
        config in arb_controller_config(),
        samples in prop::collection::vec(0u64..60_000, 0..40),
    ) {
        let window = config.window_size;
        let mut controller = ConcurrencyController::new(config);
        for ms in samples {
            controller.record_latency(Duration::from_millis(ms));
            prop_assert!(controller.sample_count() <= window);
        }
    }
}

// ─── Task Status ────────────────────────────────────────────────────────────

proptest! {
    #[test]
    fn status_only_moves_forward(from in arb_status(), to in arb_status()) {
        if from.can_transition_to(to) {
            prop_assert!(rank(to) > rank(from));
        }
        if from.is_terminal() {
            prop_assert!(!from.can_transition_to(to));
        }
    }
}

// ─── Admission Order ────────────────────────────────────────────────────────

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    /// With one slot, the first task runs immediately; the rest run HIGH
    /// first, each tier in submission order.
    #[test]
    fn admission_respects_priority_tiers(
        priorities in prop::collection::vec(arb_priority(), 1..16),
    ) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .start_paused(true)
            .build()
            .unwrap();

        let started = runtime.block_on(async {
            let order = Arc::new(Mutex::new(Vec::new()));
            let seen = order.clone();
            let worker = worker_fn(move |payload, _progress| {
                let seen = seen.clone();
                async move {
                    seen.lock().push(payload["n"].as_u64().unwrap_or(u64::MAX) as usize);
                    tokio::time::sleep(Duration::from_millis(5)).await;
                    Ok(WorkerOutput::default())
                }
            });

            let scheduler = Scheduler::builder(worker)
                .with_config(
                    SchedulerConfig::default()
                        .with_controller(ControllerConfig::default().with_bounds(1, 1).with_baseline(1))
                        .with_quiescence_poll_interval(Duration::from_millis(1)),
                )
                .build()
                .unwrap();

            for (n, priority) in priorities.iter().enumerate() {
                scheduler
                    .submit(TaskRequest::new("owner", json!({ "n": n })).with_priority(*priority))
                    .unwrap();
            }
            assert!(scheduler.wait_for_quiescence(Duration::from_secs(60)).await);
            let started = order.lock().clone();
            started
        });

        let mut expected = vec![0];
        expected.extend(
            (1..priorities.len()).filter(|&n| priorities[n] == TaskPriority::High),
        );
        expected.extend(
            (1..priorities.len()).filter(|&n| priorities[n] != TaskPriority::High),
        );
        prop_assert_eq!(started, expected);
    }
}
