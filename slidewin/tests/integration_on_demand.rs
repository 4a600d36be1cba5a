//! Integration tests for the on-demand window: range queries, argument
//! validation and maintenance.

use slidewin::bucket::Bucket;
use slidewin::clock::{Clock, ManualClock};
use slidewin::config::{OnDemandConfig, WindowConfig};
use slidewin::data::DataType;
use slidewin::error::{ConfigError, LifecycleError, QueryError, WindowError};
use slidewin::metrics::{DATA_ITEMS, InMemoryMetrics, Metrics, TAG_CLASS, VIEW_TUMBLING_DURATION};
use slidewin::on_demand_window::OnDemandWindow;
use slidewin::query::TumblingQuery;
use slidewin::registry::WindowNameRegistry;
use slidewin::schedule::ManualTaskScheduler;
use std::sync::Arc;
use std::time::Duration;

const SEC: u64 = 1_000_000_000;
const T0: u64 = 1_700_000_000 * SEC;

struct Fixture {
    window: OnDemandWindow,
    scheduler: Arc<ManualTaskScheduler>,
    clock: Arc<ManualClock>,
    metrics: Arc<Metrics>,
    backend: Arc<InMemoryMetrics>,
}

fn fixture(length: Duration) -> Fixture {
    let scheduler = Arc::new(ManualTaskScheduler::new());
    let clock = Arc::new(ManualClock::new(T0));
    let backend = Arc::new(InMemoryMetrics::new());
    let metrics = Arc::new(Metrics::new(backend.clone()));
    let window = WindowConfig::new(
        "latencies",
        length,
        vec![DataType::of::<u64>(), DataType::of::<String>()],
    )
    .unwrap()
    .with_scheduler(scheduler.clone())
    .with_clock(clock.clone())
    .with_metrics(metrics.clone())
    .with_name_registry(Arc::new(WindowNameRegistry::new()));

    let window = OnDemandWindow::new(OnDemandConfig::new(window).unwrap()).unwrap();
    window.start().unwrap();
    Fixture {
        window,
        scheduler,
        clock,
        metrics,
        backend,
    }
}

impl Fixture {
    /// Adds one `u64` per second, tagged with its offset, then advances to
    /// one second after the last.
    fn add_per_second(&self, count: u64) {
        for i in 0..count {
            self.window.add_data(i).unwrap();
            self.clock.advance(Duration::from_secs(1));
        }
    }

    fn query_err(&self, query: TumblingQuery) -> QueryError {
        match self.window.on_demand_tumbling_buckets(query).unwrap_err() {
            WindowError::Query(e) => e,
            other => panic!("expected a query error, got {other}"),
        }
    }
}

#[test]
fn test_tumbling_buckets_over_sub_range() {
    let f = fixture(Duration::from_secs(5));
    // Items at now-5s, now-4s, now-3s, now-2s, now-1s
    f.add_per_second(5);
    let now = f.clock.now_ns();

    let buckets = f
        .window
        .on_demand_tumbling_buckets(
            TumblingQuery::new()
                .start_ns(now - 4 * SEC)
                .length(Duration::from_secs(3))
                .bucket_length(Duration::from_secs(1)),
        )
        .unwrap();

    assert_eq!(buckets.len(), 3);
    for (i, bucket) in buckets.iter().enumerate() {
        let offset = i as u64;
        assert_eq!(bucket.start_ns(), now - (4 - offset) * SEC);
        assert_eq!(bucket.end_ns(), now - (3 - offset) * SEC - 1);
        assert_eq!(bucket.data::<u64>().unwrap().values(), vec![offset + 1]);
        assert!(bucket.data::<String>().unwrap().is_empty());
        assert!(!bucket.is_mutation_allowed());
    }
}

#[test]
fn test_bucket_bounds_are_inclusive() {
    let f = fixture(Duration::from_secs(4));
    let start = f.clock.now_ns();
    f.window.add_data(1u64).unwrap();
    f.clock.set(start + SEC - 1);
    f.window.add_data(2u64).unwrap();
    f.clock.set(start + SEC);
    f.window.add_data(3u64).unwrap();
    f.clock.set(start + 4 * SEC);

    let buckets = f
        .window
        .on_demand_tumbling_buckets(
            TumblingQuery::new()
                .start_ns(start)
                .length(Duration::from_secs(2))
                .bucket_length(Duration::from_secs(1)),
        )
        .unwrap();

    assert_eq!(buckets[0].data::<u64>().unwrap().values(), vec![1, 2]);
    assert_eq!(buckets[1].data::<u64>().unwrap().values(), vec![3]);
}

#[test]
fn test_default_query_covers_whole_window() {
    let f = fixture(Duration::from_secs(3));
    f.add_per_second(4);
    let now = f.clock.now_ns();

    let buckets = f
        .window
        .on_demand_tumbling_buckets(TumblingQuery::new())
        .unwrap();

    assert_eq!(buckets.len(), 1);
    assert_eq!(buckets[0].start_ns(), now - 3 * SEC);
    assert_eq!(buckets[0].end_ns(), now - 1);
    // The item at now-4s is outside the window even before maintenance
    assert_eq!(buckets[0].data::<u64>().unwrap().values(), vec![1, 2, 3]);
    assert_eq!(f.window.item_count::<u64>().unwrap(), 4);
}

#[test]
fn test_equal_timestamps_are_all_retained() {
    let f = fixture(Duration::from_secs(2));
    for _ in 0..3 {
        f.window.add_data("same".to_string()).unwrap();
    }
    f.clock.advance(Duration::from_secs(1));

    let buckets = f
        .window
        .on_demand_tumbling_buckets(
            TumblingQuery::new()
                .start_ns(f.clock.now_ns() - SEC)
                .length(Duration::from_secs(1))
                .bucket_length(Duration::from_secs(1)),
        )
        .unwrap();
    assert_eq!(buckets[0].data::<String>().unwrap().len(), 3);
}

#[test]
fn test_query_validation_order() {
    let f = fixture(Duration::from_secs(5));
    f.clock.advance(Duration::from_secs(10));
    let now = f.clock.now_ns();

    assert_eq!(
        f.query_err(TumblingQuery::new().length(Duration::ZERO)),
        QueryError::LengthNotPositive
    );
    assert_eq!(
        f.query_err(TumblingQuery::new().bucket_length(Duration::ZERO)),
        QueryError::BucketLengthNotPositive
    );
    assert_eq!(
        f.query_err(TumblingQuery::new().start_ns(now + 1)),
        QueryError::StartInFuture
    );
    assert_eq!(
        f.query_err(TumblingQuery::new().start_ns(now - 5 * SEC - 1)),
        QueryError::StartTooEarly
    );
    assert_eq!(
        f.query_err(TumblingQuery::new().start_ns(now - SEC).length(Duration::from_secs(2))),
        QueryError::EndInFuture
    );
    assert_eq!(
        f.query_err(
            TumblingQuery::new()
                .length(Duration::from_secs(2))
                .bucket_length(Duration::from_secs(3))
                .start_ns(now - 3 * SEC)
        ),
        QueryError::LengthLessThanBucketLength
    );
    assert_eq!(
        f.query_err(TumblingQuery::new().bucket_length(Duration::from_secs(2))),
        QueryError::LengthNotMultiple
    );

    // The earliest accepted start is exactly the window horizon
    let buckets = f
        .window
        .on_demand_tumbling_buckets(TumblingQuery::new().start_ns(now - 5 * SEC))
        .unwrap();
    assert_eq!(buckets.len(), 1);
}

#[test]
fn test_periodic_maintenance_evicts_expired_entries() {
    let f = fixture(Duration::from_secs(3));
    f.add_per_second(5);
    assert_eq!(f.window.item_count::<u64>().unwrap(), 5);

    assert_eq!(f.scheduler.periodic_count(), 1);
    assert_eq!(f.scheduler.run_periodic(), 1);

    // Cutoff is now-3s: items at now-5s and now-4s go
    let values: Vec<u64> = f
        .window
        .entries::<u64>()
        .unwrap()
        .into_iter()
        .map(|e| e.data)
        .collect();
    assert_eq!(values, vec![2, 3, 4]);

    let items = f.metrics.find(DATA_ITEMS, &[(TAG_CLASS, "u64")]).unwrap();
    let snapshot = f.backend.get(&items).unwrap();
    assert!((snapshot.last - 3.0).abs() < 1e-6);
}

#[test]
fn test_maintenance_stops_after_window_is_dropped() {
    let f = fixture(Duration::from_secs(3));
    let Fixture {
        window, scheduler, ..
    } = f;
    drop(window);

    assert_eq!(scheduler.run_periodic(), 1);
    assert_eq!(scheduler.periodic_count(), 0);
}

#[test]
fn test_query_duration_is_recorded() {
    let f = fixture(Duration::from_secs(3));
    f.add_per_second(3);
    for _ in 0..2 {
        f.window
            .on_demand_tumbling_buckets(TumblingQuery::new())
            .unwrap();
    }

    let id = f.metrics.find(VIEW_TUMBLING_DURATION, &[]).unwrap();
    assert_eq!(f.backend.get(&id).unwrap().count, 2);
}

#[test]
fn test_configuration_is_validated() {
    let registry = Arc::new(WindowNameRegistry::new());
    let base = |length: Duration| {
        WindowConfig::new("validated", length, vec![DataType::of::<u8>()])
            .map(|c| c.with_name_registry(Arc::clone(&registry)))
    };

    assert!(matches!(
        base(Duration::from_millis(100)).and_then(OnDemandConfig::new),
        Err(WindowError::Config(ConfigError::LengthTooShort { .. }))
    ));
    assert!(matches!(
        base(Duration::from_secs(1)).and_then(|c| {
            OnDemandConfig::with_maintenance_interval(c, Duration::from_millis(10))
        }),
        Err(WindowError::Config(
            ConfigError::MaintenanceIntervalTooShort { .. }
        ))
    ));
    assert!(matches!(
        WindowConfig::new(" ", Duration::from_secs(1), vec![DataType::of::<u8>()]),
        Err(WindowError::Config(ConfigError::NameEmpty))
    ));
    assert!(matches!(
        WindowConfig::new("empty", Duration::from_secs(1), Vec::new()),
        Err(WindowError::Config(ConfigError::NoDataTypes))
    ));
}

#[test]
fn test_not_started_window_rejects_use() {
    let window = WindowConfig::new("idle", Duration::from_secs(1), vec![DataType::of::<u8>()])
        .unwrap()
        .with_scheduler(Arc::new(ManualTaskScheduler::new()))
        .with_name_registry(Arc::new(WindowNameRegistry::new()));
    let window = OnDemandWindow::new(OnDemandConfig::new(window).unwrap()).unwrap();

    for err in [
        window.add_data(1u8).unwrap_err(),
        window.run_maintenance().unwrap_err(),
        window
            .on_demand_tumbling_buckets(TumblingQuery::new())
            .unwrap_err(),
    ] {
        assert!(matches!(
            err,
            WindowError::Lifecycle(LifecycleError::NotStarted)
        ));
    }
}
