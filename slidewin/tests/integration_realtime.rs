//! Wall-clock tests against the default tokio-backed scheduler.
//!
//! Assertions allow for scheduler jitter; they poll against a deadline rather
//! than expecting an exact number of rotations.

use slidewin::bucket::Bucket;
use slidewin::config::{FixedTumblingConfig, OnDemandConfig, WindowConfig};
use slidewin::data::DataType;
use slidewin::fixed_window::{FixedTumblingPayload, FixedTumblingWindow};
use slidewin::observer::FixedTumblingEvent;
use slidewin::on_demand_window::OnDemandWindow;
use slidewin::registry::WindowNameRegistry;
use std::sync::Arc;
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

/// Polls `check` every 25ms until it holds or `timeout` elapses.
fn wait_for(timeout: Duration, mut check: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(25));
    }
    check()
}

#[test]
fn test_fixed_window_rotates_on_its_own() {
    let window = WindowConfig::new(
        "realtime-fixed",
        Duration::from_millis(750),
        vec![DataType::of::<u32>()],
    )
    .unwrap()
    .with_name_registry(Arc::new(WindowNameRegistry::new()));
    let window =
        FixedTumblingWindow::new(FixedTumblingConfig::new(window, Duration::from_millis(250)).unwrap())
            .unwrap();

    let (tx, rx) = mpsc::channel();
    window.add_observer(Arc::new(
        move |event: FixedTumblingEvent, payload: &FixedTumblingPayload| {
            if event == FixedTumblingEvent::NonCurrentBucketsUpdated {
                let _ = tx.send(payload.buckets().len());
            }
        },
    ));

    window.start().unwrap();
    window.add_data(1u32).unwrap();

    // Updates arrive asynchronously on the scheduler's threads
    let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(first, 1);

    assert!(wait_for(Duration::from_secs(5), || {
        window.non_current_buckets().unwrap().len() == 3
    }));

    let buckets = window.buckets().unwrap();
    assert!(buckets.len() <= 4);
    for pair in buckets.windows(2) {
        let ended = pair[0].end_info().unwrap();
        assert_eq!(pair[1].start_ns(), ended.actual_end_ns + 1);
        assert!(!pair[0].is_mutation_allowed());
    }
    assert!(window.current_bucket().unwrap().is_current());
}

#[test]
fn test_concurrent_writers_during_rotation() {
    let window = WindowConfig::new(
        "realtime-writers",
        Duration::from_secs(2),
        vec![DataType::of::<u64>()],
    )
    .unwrap()
    .with_name_registry(Arc::new(WindowNameRegistry::new()));
    let window =
        FixedTumblingWindow::new(FixedTumblingConfig::new(window, Duration::from_millis(250)).unwrap())
            .unwrap();
    window.start().unwrap();

    let writers: Vec<_> = (0..4u64)
        .map(|w| {
            let window = window.clone();
            thread::spawn(move || {
                for i in 0..200u64 {
                    window.add_data(w * 1_000 + i).unwrap();
                    if i % 20 == 0 {
                        thread::sleep(Duration::from_millis(5));
                    }
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    // Every write landed in exactly one retained bucket
    let total: usize = window
        .buckets()
        .unwrap()
        .iter()
        .map(|b| b.data::<u64>().unwrap().len())
        .sum();
    assert_eq!(total, 800);
}

#[test]
fn test_on_demand_maintenance_runs_periodically() {
    let window = WindowConfig::new(
        "realtime-on-demand",
        Duration::from_millis(500),
        vec![DataType::of::<String>()],
    )
    .unwrap()
    .with_name_registry(Arc::new(WindowNameRegistry::new()));
    let config = OnDemandConfig::with_maintenance_interval(window, Duration::from_millis(250)).unwrap();
    let window = OnDemandWindow::new(config).unwrap();
    window.start().unwrap();

    window.add_data("expires".to_string()).unwrap();
    assert_eq!(window.item_count::<String>().unwrap(), 1);

    assert!(wait_for(Duration::from_secs(5), || {
        window.item_count::<String>().unwrap() == 0
    }));
}
