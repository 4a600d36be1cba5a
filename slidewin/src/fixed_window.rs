//! Fixed tumbling window.
//!
//! A [`FixedTumblingWindow`] keeps exactly one current bucket after
//! [`start`](FixedTumblingWindow::start), ends it when its scheduled end fires,
//! and retains the `length / bucket_length` most recent ended buckets.
//!
//! # Locking
//!
//! The retained-bucket queue and the current-bucket reference each sit behind
//! their own `RwLock`. Rotation takes the queue lock, then the current lock,
//! both in write mode, and commits the whole transition (end, enqueue, evict)
//! before releasing them. Rotations are serialized end to end by a reentrant
//! mutex, so a scheduler that runs the next bucket's end inline on the
//! rotating thread cannot deadlock.
//!
//! Observers run with both `RwLock`s released. They may call any accessor of
//! the window, including from the notification thread.
//!
//! # Scheduled ends
//!
//! The end task of a bucket holds a weak reference to the window plus the
//! bucket id. A task that fires after the window was dropped does nothing.

use std::collections::VecDeque;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{Mutex, ReentrantMutex, RwLock};
use tracing::{debug, error, warn};

use crate::bucket::{Bucket, BucketSummary};
use crate::clock::{duration_ns, ns_to_ms};
use crate::config::FixedTumblingConfig;
use crate::data::WindowData;
use crate::error::{LifecycleError, Result, RotationError};
use crate::fixed_bucket::{EndInfo, FixedTumblingBucket};
use crate::metrics::{BUCKET_DURATION, CONFIG_BUCKET_LENGTH_MS, WindowMetricsSpec, measure_ms};
use crate::observer::{Dispatch, FixedTumblingEvent, Observer, ObserverEvent, ObserverId, Subject};
use crate::registry::NameRegistration;
use crate::schedule::TaskScheduler;

/// Ratio of actual to configured bucket length above which drift is logged.
const DRIFT_WARNING_RATIO: f64 = 1.1;

/// What observers of a fixed tumbling window receive.
#[derive(Debug, Clone)]
pub enum FixedTumblingPayload {
    /// A single bucket: started, ending or already evicted.
    Bucket(Arc<FixedTumblingBucket>),
    /// Every retained non-current bucket, oldest first.
    Buckets(Vec<Arc<FixedTumblingBucket>>),
}

impl FixedTumblingPayload {
    /// The buckets carried, oldest first.
    pub fn buckets(&self) -> &[Arc<FixedTumblingBucket>] {
        match self {
            Self::Bucket(bucket) => std::slice::from_ref(bucket),
            Self::Buckets(buckets) => buckets,
        }
    }
}

/// Observer callback of a fixed tumbling window.
pub type FixedTumblingObserver = Observer<FixedTumblingEvent, FixedTumblingPayload>;

/// A window of rotating, fixed-length buckets.
///
/// Cloning is cheap and yields another handle to the same window.
///
/// # Example
///
/// ```rust,no_run
/// use slidewin::bucket::Bucket;
/// use slidewin::config::{FixedTumblingConfig, WindowConfig};
/// use slidewin::data::DataType;
/// use slidewin::fixed_window::FixedTumblingWindow;
/// use std::time::Duration;
///
/// # fn main() -> slidewin::error::Result<()> {
/// let window = WindowConfig::new("latency", Duration::from_secs(60), vec![DataType::of::<f64>()])?;
/// let window = FixedTumblingWindow::new(FixedTumblingConfig::new(window, Duration::from_secs(10))?)?;
/// window.start()?;
/// window.add_data(12.5_f64)?;
/// assert_eq!(window.current_bucket()?.data::<f64>()?.len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct FixedTumblingWindow {
    inner: Arc<Inner>,
}

struct Inner {
    config: FixedTumblingConfig,
    scheduler: Arc<dyn TaskScheduler>,
    subject: Subject<FixedTumblingEvent, FixedTumblingPayload>,
    bucket_length_ns: u64,
    non_current_bucket_count: usize,
    started: AtomicBool,
    lifecycle: Mutex<()>,
    rotation: ReentrantMutex<()>,
    queue: RwLock<VecDeque<Arc<FixedTumblingBucket>>>,
    current: RwLock<Option<Arc<FixedTumblingBucket>>>,
    next_bucket_id: AtomicU64,
    _registration: NameRegistration,
}

/// Outcome of the locked part of a rotation.
struct Rotation {
    next: Arc<FixedTumblingBucket>,
    removed: Option<Arc<FixedTumblingBucket>>,
    non_current: Vec<Arc<FixedTumblingBucket>>,
    end_info: EndInfo,
}

impl FixedTumblingWindow {
    /// Creates a window and registers its name.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NameAlreadyRegistered`] if the name is in use,
    /// or a scheduler error if the default scheduler cannot be built.
    pub fn new(config: FixedTumblingConfig) -> Result<Self> {
        let window = config.window();
        let registration =
            NameRegistration::acquire(Arc::clone(window.name_registry()), window.name())?;
        let scheduler = window.resolve_scheduler()?;

        let inner = Inner {
            bucket_length_ns: duration_ns(config.bucket_length()),
            non_current_bucket_count: config.non_current_bucket_count(),
            subject: Subject::new(Arc::clone(&scheduler)),
            scheduler,
            config,
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            rotation: ReentrantMutex::new(()),
            queue: RwLock::new(VecDeque::new()),
            current: RwLock::new(None),
            next_bucket_id: AtomicU64::new(0),
            _registration: registration,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Creates the first current bucket and schedules its end.
    ///
    /// Observers are told about the first bucket synchronously.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<()> {
        Inner::start(&self.inner)
    }

    /// Appends `data` to the current bucket, timestamped now.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`], or
    /// [`DataError::ClassNotStored`](crate::error::DataError::ClassNotStored)
    /// if `T` was not registered.
    pub fn add_data<T: WindowData>(&self, data: T) -> Result<()> {
        self.inner.ensure_started()?;
        let current = self.inner.current.read();
        let bucket = current.as_ref().ok_or(LifecycleError::NotStarted)?;
        bucket.contents().data::<T>()?.add_unchecked(data);
        Ok(())
    }

    /// Every retained bucket, oldest first, the current one last.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`].
    pub fn buckets(&self) -> Result<Vec<Arc<FixedTumblingBucket>>> {
        self.inner.ensure_started()?;
        Ok(self.inner.queue.read().iter().cloned().collect())
    }

    /// The bucket currently accepting writes.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`].
    pub fn current_bucket(&self) -> Result<Arc<FixedTumblingBucket>> {
        self.inner.ensure_started()?;
        self.inner.current_bucket()
    }

    /// Retained non-current buckets, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`].
    pub fn non_current_buckets(&self) -> Result<Vec<Arc<FixedTumblingBucket>>> {
        self.inner.ensure_started()?;
        let queue = self.inner.queue.read();
        let current = self.inner.current.read();
        Ok(queue
            .iter()
            .filter(|b| !current.as_ref().is_some_and(|c| Arc::ptr_eq(b, c)))
            .cloned()
            .collect())
    }

    /// Serializable summaries of every retained bucket, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`].
    pub fn summaries(&self) -> Result<Vec<BucketSummary>> {
        Ok(self.buckets()?.iter().map(|b| b.summary()).collect())
    }

    /// Registers an observer of bucket lifecycle events.
    pub fn add_observer(&self, observer: FixedTumblingObserver) -> ObserverId {
        self.inner.subject.add_observer(observer)
    }

    /// Removes an observer. Returns `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.subject.remove_observer(id)
    }

    /// The window's configuration.
    pub fn config(&self) -> &FixedTumblingConfig {
        &self.inner.config
    }

    /// The window's name.
    pub fn name(&self) -> &str {
        self.inner.config.window().name()
    }

    /// Whether [`Self::start`] has run.
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }
}

impl fmt::Debug for FixedTumblingWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedTumblingWindow")
            .field("name", &self.name())
            .field("length", &self.inner.config.window().length())
            .field("bucket_length", &self.inner.config.bucket_length())
            .field("started", &self.has_started())
            .finish_non_exhaustive()
    }
}

impl Inner {
    fn name(&self) -> &str {
        self.config.window().name()
    }

    fn ensure_started(&self) -> Result<()> {
        if !self.started.load(Ordering::Acquire) {
            return Err(LifecycleError::NotStarted.into());
        }
        Ok(())
    }

    fn current_bucket(&self) -> Result<Arc<FixedTumblingBucket>> {
        self.current
            .read()
            .clone()
            .ok_or_else(|| LifecycleError::NotStarted.into())
    }

    fn new_bucket(&self, start_ns: u64) -> Arc<FixedTumblingBucket> {
        let window = self.config.window();
        Arc::new(FixedTumblingBucket::new(
            self.next_bucket_id.fetch_add(1, Ordering::Relaxed),
            start_ns,
            self.bucket_length_ns,
            window.data_types(),
            Arc::clone(window.clock()),
        ))
    }

    #[allow(clippy::cast_precision_loss)] // Bucket lengths are far below 2^52 ms
    fn start(this: &Arc<Self>) -> Result<()> {
        let lifecycle = this.lifecycle.lock();
        let _rotation = this.rotation.lock();
        if this.started.load(Ordering::Acquire) {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        let spec = WindowMetricsSpec::for_events::<FixedTumblingEvent>()
            .with_gauge(
                CONFIG_BUCKET_LENGTH_MS,
                this.config.bucket_length().as_millis() as f64,
            )
            .with_timer(BUCKET_DURATION);
        this.config.window().metrics().initialize(this.config.window(), spec)?;

        let first = this.new_bucket(this.config.window().clock().now_ns());
        {
            let mut queue = this.queue.write();
            let mut current = this.current.write();
            queue.push_back(Arc::clone(&first));
            *current = Some(Arc::clone(&first));
        }
        this.started.store(true, Ordering::Release);
        drop(lifecycle);
        debug!(
            window = %this.name(),
            bucket_length_ms = this.config.bucket_length().as_millis(),
            retained = this.non_current_bucket_count,
            "window started"
        );

        this.notify(
            FixedTumblingEvent::CurrentBucketStarted,
            FixedTumblingPayload::Bucket(Arc::clone(&first)),
            Dispatch::Sync,
        );
        Self::schedule_end(this, &first);
        Ok(())
    }

    fn schedule_end(this: &Arc<Self>, bucket: &FixedTumblingBucket) {
        let weak: Weak<Self> = Arc::downgrade(this);
        let id = bucket.id();
        this.scheduler.schedule_at(
            bucket.scheduled_end_ns(),
            Box::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return;
                };
                if let Err(e) = Self::end_current_bucket(&inner, id) {
                    error!(window = %inner.name(), bucket = id, error = %e, "failed to end current bucket");
                }
            }),
        );
    }

    fn find_bucket(&self, id: u64) -> Result<Arc<FixedTumblingBucket>> {
        self.queue
            .read()
            .iter()
            .find(|b| b.id() == id)
            .cloned()
            .ok_or_else(|| RotationError::UnknownBucket { id }.into())
    }

    /// Ends bucket `id` and rotates in its successor.
    fn end_current_bucket(this: &Arc<Self>, id: u64) -> Result<()> {
        let _rotation = this.rotation.lock();
        let started_at = Instant::now();
        this.ensure_started()?;

        let ending = this.find_bucket(id)?;
        let is_current = this
            .current
            .read()
            .as_ref()
            .is_some_and(|c| Arc::ptr_eq(c, &ending));
        if !is_current || !ending.is_current() {
            return Err(RotationError::EndedBucketNotCurrent.into());
        }

        this.notify(
            FixedTumblingEvent::CurrentBucketEnding,
            FixedTumblingPayload::Bucket(Arc::clone(&ending)),
            Dispatch::Sync,
        );

        let rotation = this.rotate(&ending)?;
        Self::schedule_end(this, &rotation.next);

        this.notify(
            FixedTumblingEvent::CurrentBucketStarted,
            FixedTumblingPayload::Bucket(Arc::clone(&rotation.next)),
            Dispatch::Sync,
        );
        if let Some(removed) = &rotation.removed {
            this.notify(
                FixedTumblingEvent::NonCurrentBucketRemoving,
                FixedTumblingPayload::Bucket(Arc::clone(removed)),
                Dispatch::Sync,
            );
        }
        if tracing::enabled!(tracing::Level::DEBUG) {
            let listing: Vec<String> = this
                .queue
                .read()
                .iter()
                .map(ToString::to_string)
                .collect();
            debug!(window = %this.name(), buckets = ?listing, "rotated current bucket");
        }

        let non_current = rotation.non_current;
        this.notify(
            FixedTumblingEvent::NonCurrentBucketsUpdated,
            FixedTumblingPayload::Buckets(non_current.clone()),
            Dispatch::Async,
        );

        this.record_bucket_duration(rotation.end_info);
        this.record_item_counts(&non_current);
        let metrics = this.config.window().metrics();
        this.record(metrics.update_maintenance_duration(ns_to_ms(
            u64::try_from(started_at.elapsed().as_nanos()).unwrap_or(u64::MAX),
        )));
        Ok(())
    }

    /// The locked part of a rotation: end, enqueue, evict.
    fn rotate(&self, ending: &Arc<FixedTumblingBucket>) -> Result<Rotation> {
        let mut queue = self.queue.write();
        let mut current = self.current.write();

        let end_info = ending.end()?;
        let next = self.new_bucket(end_info.actual_end_ns + 1);
        queue.push_back(Arc::clone(&next));
        *current = Some(Arc::clone(&next));

        let removed = if queue.len() >= self.non_current_bucket_count + 2 {
            queue.pop_front()
        } else {
            None
        };
        let non_current = queue
            .iter()
            .filter(|b| !Arc::ptr_eq(b, &next))
            .cloned()
            .collect();

        Ok(Rotation {
            next,
            removed,
            non_current,
            end_info,
        })
    }

    fn record_bucket_duration(&self, end_info: EndInfo) {
        let metrics = self.config.window().metrics();
        self.record(metrics.update_named_timer(BUCKET_DURATION, end_info.duration_ms));

        let configured_ms = ns_to_ms(self.bucket_length_ns);
        if exceeds_drift(configured_ms, end_info.duration_ms) {
            warn!(
                window = %self.name(),
                duration_ms = end_info.duration_ms,
                bucket_length_ms = configured_ms,
                "bucket ran more than 10% longer than configured; the scheduler is lagging"
            );
        }
    }

    fn record_item_counts(&self, non_current: &[Arc<FixedTumblingBucket>]) {
        let window = self.config.window();
        for data_type in window.data_types() {
            let count = non_current
                .iter()
                .filter_map(|b| b.contents().item_count(data_type))
                .sum();
            self.record(window.metrics().update_data_item_count(data_type, count));
        }
    }

    fn notify(&self, event: FixedTumblingEvent, payload: FixedTumblingPayload, dispatch: Dispatch) {
        let ((), elapsed_ms) =
            measure_ms(|| self.subject.notify_observers(event, payload, dispatch));
        let metrics = self.config.window().metrics();
        self.record(metrics.update_observer_duration(event.name(), elapsed_ms));
    }

    fn record(&self, result: Result<()>) {
        if let Err(e) = result {
            debug!(window = %self.name(), error = %e, "metrics update skipped");
        }
    }
}

/// Whether a bucket that lasted `duration_ms` ran more than
/// [`DRIFT_WARNING_RATIO`] times its configured length.
fn exceeds_drift(configured_ms: f64, duration_ms: f64) -> bool {
    duration_ms > configured_ms * DRIFT_WARNING_RATIO
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::config::WindowConfig;
    use crate::data::DataType;
    use crate::error::{DataError, WindowError};
    use crate::registry::WindowNameRegistry;
    use crate::schedule::ManualTaskScheduler;

    const SEC: u64 = 1_000_000_000;

    struct Harness {
        window: FixedTumblingWindow,
        scheduler: Arc<ManualTaskScheduler>,
        clock: Arc<ManualClock>,
    }

    fn harness(length_secs: u64) -> Harness {
        let scheduler = Arc::new(ManualTaskScheduler::new());
        let clock = Arc::new(ManualClock::new(1_000 * SEC));
        let window = WindowConfig::new(
            "fixed-unit",
            Duration::from_secs(length_secs),
            vec![DataType::of::<String>(), DataType::of::<u32>()],
        )
        .unwrap()
        .with_scheduler(scheduler.clone())
        .with_clock(clock.clone())
        .with_name_registry(Arc::new(WindowNameRegistry::new()));
        let config = FixedTumblingConfig::new(window, Duration::from_secs(1)).unwrap();
        Harness {
            window: FixedTumblingWindow::new(config).unwrap(),
            scheduler,
            clock,
        }
    }

    impl Harness {
        fn tick(&self) {
            self.clock.advance(Duration::from_secs(1));
            assert_eq!(self.scheduler.run_scheduled_until(self.clock.now_ns()), 1);
        }
    }

    #[test]
    fn test_accessors_fail_before_start() {
        let h = harness(3);
        assert!(!h.window.has_started());
        for err in [
            h.window.add_data(1u32).unwrap_err(),
            h.window.buckets().unwrap_err(),
            h.window.current_bucket().unwrap_err(),
            h.window.non_current_buckets().unwrap_err(),
        ] {
            assert!(matches!(err, WindowError::Lifecycle(LifecycleError::NotStarted)));
        }
    }

    #[test]
    fn test_start_twice_fails() {
        let h = harness(3);
        h.window.start().unwrap();
        assert!(matches!(
            h.window.start().unwrap_err(),
            WindowError::Lifecycle(LifecycleError::AlreadyStarted)
        ));
    }

    #[test]
    fn test_start_schedules_first_end() {
        let h = harness(3);
        h.window.start().unwrap();

        let current = h.window.current_bucket().unwrap();
        assert_eq!(current.start_ns(), 1_000 * SEC);
        assert_eq!(h.scheduler.next_scheduled_at(), Some(1_001 * SEC - 1));
        assert!(h.window.non_current_buckets().unwrap().is_empty());
        assert_eq!(h.window.buckets().unwrap().len(), 1);
    }

    #[test]
    fn test_add_data_lands_in_current_bucket() {
        let h = harness(3);
        h.window.start().unwrap();
        h.window.add_data("a".to_string()).unwrap();
        h.window.add_data(7u32).unwrap();

        let current = h.window.current_bucket().unwrap();
        let entries = current.data::<String>().unwrap().entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].data, "a");
        assert!(entries[0].timestamp_ns >= 1_000 * SEC);

        assert!(matches!(
            h.window.add_data(1u64).unwrap_err(),
            WindowError::Data(DataError::ClassNotStored { type_name: "u64" })
        ));
    }

    #[test]
    fn test_rotation_starts_next_bucket_after_actual_end() {
        let h = harness(3);
        h.window.start().unwrap();
        let first = h.window.current_bucket().unwrap();

        h.tick();

        let second = h.window.current_bucket().unwrap();
        let info = first.end_info().unwrap();
        assert_eq!(info.actual_end_ns, 1_001 * SEC);
        assert_eq!(second.start_ns(), info.actual_end_ns + 1);
        assert!(!first.is_mutation_allowed());
        assert_eq!(h.window.non_current_buckets().unwrap(), vec![first]);
    }

    #[test]
    fn test_retention_is_bounded_fifo() {
        let h = harness(3);
        h.window.start().unwrap();

        let mut starts = vec![h.window.current_bucket().unwrap().start_ns()];
        for _ in 0..5 {
            h.tick();
            starts.push(h.window.current_bucket().unwrap().start_ns());
        }

        let retained: Vec<u64> = h
            .window
            .non_current_buckets()
            .unwrap()
            .iter()
            .map(|b| b.start_ns())
            .collect();
        assert_eq!(retained, starts[2..5].to_vec());
        assert_eq!(h.window.buckets().unwrap().len(), 4);
    }

    #[test]
    fn test_stale_end_is_rejected() {
        let h = harness(3);
        h.window.start().unwrap();
        let first = h.window.current_bucket().unwrap();
        h.tick();

        let err = Inner::end_current_bucket(&h.window.inner, first.id()).unwrap_err();
        assert!(matches!(
            err,
            WindowError::Rotation(RotationError::EndedBucketNotCurrent)
        ));

        let err = Inner::end_current_bucket(&h.window.inner, 999).unwrap_err();
        assert!(matches!(
            err,
            WindowError::Rotation(RotationError::UnknownBucket { id: 999 })
        ));
    }

    #[test]
    fn test_drift_threshold_is_strict() {
        assert!(!exceeds_drift(1_000.0, 1_000.0));
        assert!(!exceeds_drift(1_000.0, 1_100.0));
        assert!(exceeds_drift(1_000.0, 1_100.01));
        assert!(exceeds_drift(250.0, 300.0));
    }

    #[test]
    fn test_late_rotation_still_ends_bucket() {
        let h = harness(3);
        h.window.start().unwrap();
        let first = h.window.current_bucket().unwrap();

        // 1.2x the bucket length
        h.clock.advance(Duration::from_millis(1_200));
        assert_eq!(h.scheduler.run_scheduled_until(h.clock.now_ns()), 1);

        let info = first.end_info().unwrap();
        assert!((info.duration_ms - 1_200.0).abs() < 1e-6);
        assert!(exceeds_drift(1_000.0, info.duration_ms));
        assert_eq!(h.window.non_current_buckets().unwrap().len(), 1);
    }

    #[test]
    fn test_next_end_is_scheduled_before_observers_run() {
        let h = harness(3);
        let scheduler = Arc::clone(&h.scheduler);
        let pending: Arc<Mutex<Vec<usize>>> = Arc::default();
        let sink = Arc::clone(&pending);
        h.window.add_observer(Arc::new(
            move |event: FixedTumblingEvent, _: &FixedTumblingPayload| {
                if event == FixedTumblingEvent::CurrentBucketStarted {
                    sink.lock().push(scheduler.pending_scheduled());
                }
            },
        ));

        h.window.start().unwrap();
        h.tick();

        // Nothing pending before the first bucket's end is scheduled
        assert_eq!(*pending.lock(), vec![0, 1]);
    }

    #[test]
    fn test_panicking_observer_does_not_halt_rotation() {
        let h = harness(3);
        h.window.add_observer(Arc::new(
            |event: FixedTumblingEvent, _: &FixedTumblingPayload| {
                panic!("observer failed on {}", event.name());
            },
        ));

        h.window.start().unwrap();
        for _ in 0..5 {
            h.tick();
            assert_eq!(h.scheduler.pending_scheduled(), 1);
        }

        assert_eq!(h.window.non_current_buckets().unwrap().len(), 3);
        assert_eq!(h.window.current_bucket().unwrap().start_ns(), 1_005 * SEC + 1);
    }

    #[test]
    fn test_start_from_observer_reports_already_started() {
        let h = harness(3);
        let results: Arc<Mutex<Vec<Result<()>>>> = Arc::default();
        let sink = Arc::clone(&results);
        let window = h.window.clone();
        let id = h.window.add_observer(Arc::new(
            move |event: FixedTumblingEvent, _: &FixedTumblingPayload| {
                if event == FixedTumblingEvent::CurrentBucketStarted {
                    sink.lock().push(window.start());
                }
            },
        ));

        h.window.start().unwrap();
        assert!(h.window.remove_observer(id));

        let results = results.lock();
        assert_eq!(results.len(), 1);
        assert!(matches!(
            results[0],
            Err(WindowError::Lifecycle(LifecycleError::AlreadyStarted))
        ));
    }

    #[test]
    fn test_evicted_bucket_is_gone_when_observers_hear_of_it() {
        let h = harness(3);
        let seen: Arc<Mutex<Vec<(Arc<FixedTumblingBucket>, bool)>>> = Arc::default();
        let sink = Arc::clone(&seen);
        let window = h.window.clone();
        let id = h.window.add_observer(Arc::new(
            move |event: FixedTumblingEvent, payload: &FixedTumblingPayload| {
                if event == FixedTumblingEvent::NonCurrentBucketRemoving {
                    let evicted = Arc::clone(&payload.buckets()[0]);
                    let retained = window
                        .buckets()
                        .unwrap()
                        .iter()
                        .any(|b| Arc::ptr_eq(b, &evicted));
                    sink.lock().push((evicted, retained));
                }
            },
        ));

        h.window.start().unwrap();
        let first = h.window.current_bucket().unwrap();
        for _ in 0..3 {
            h.tick();
        }
        assert!(seen.lock().is_empty());

        h.tick();
        assert!(h.window.remove_observer(id));
        let seen = seen.lock();
        assert_eq!(seen.len(), 1);
        let (evicted, retained) = &seen[0];
        assert!(Arc::ptr_eq(evicted, &first));
        assert!(!retained);
        assert!(!evicted.is_mutation_allowed());
        assert_eq!(h.window.buckets().unwrap().len(), 4);
    }

    #[test]
    fn test_summaries() {
        let h = harness(3);
        h.window.start().unwrap();
        h.window.add_data(1u32).unwrap();
        h.tick();

        let summaries = h.window.summaries().unwrap();
        assert_eq!(summaries.len(), 2);
        assert_eq!(summaries[0].counts["u32"], 1);
        assert_eq!(summaries[0].end_ns, 1_001 * SEC);
        assert_eq!(summaries[1].counts["u32"], 0);
    }

    #[test]
    fn test_name_released_on_drop() {
        let registry = Arc::new(WindowNameRegistry::new());
        let make = || {
            let window = WindowConfig::new("reusable", Duration::from_secs(1), vec![DataType::of::<u8>()])
                .unwrap()
                .with_scheduler(Arc::new(ManualTaskScheduler::new()))
                .with_name_registry(Arc::clone(&registry));
            FixedTumblingWindow::new(FixedTumblingConfig::new(window, Duration::from_secs(1)).unwrap())
        };

        let first = make().unwrap();
        assert!(matches!(
            make().unwrap_err(),
            WindowError::Lifecycle(LifecycleError::NameAlreadyRegistered { .. })
        ));
        drop(first);
        make().unwrap();
    }
}
