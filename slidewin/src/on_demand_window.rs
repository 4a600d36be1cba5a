//! On-demand window.
//!
//! An [`OnDemandWindow`] does not commit to bucket boundaries while data
//! arrives. Every value goes into a per-type store ordered by insertion time,
//! a periodic maintenance pass evicts entries older than the window length,
//! and [`on_demand_tumbling_buckets`](OnDemandWindow::on_demand_tumbling_buckets)
//! slices any sub-range of the retained data into immutable buckets.
//!
//! Maintenance only excludes other maintenance passes. Inserts and queries run
//! concurrently with it and may observe entries an in-flight pass is about to
//! evict.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

use crate::bucket::BucketContents;
use crate::clock::duration_ns;
use crate::config::OnDemandConfig;
use crate::data::{MutationFlag, TimestampedData, WindowData, short_type_name};
use crate::error::{DataError, LifecycleError, Result};
use crate::metrics::{VIEW_TUMBLING_DURATION, WindowMetricsSpec, measure_ms};
use crate::observer::{Observer, ObserverId, OnDemandEvent, Subject};
use crate::on_demand_bucket::OnDemandBucket;
use crate::query::TumblingQuery;
use crate::registry::NameRegistration;
use crate::schedule::TaskScheduler;
use crate::store::{ErasedStore, TimeOrderedStore};

/// Observer callback of an on-demand window.
pub type OnDemandObserver = Observer<OnDemandEvent, ()>;

/// Outcome of one maintenance pass.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceReport {
    /// Entries strictly before this instant were evicted.
    pub cutoff_ns: u64,
    /// Entries evicted, per type name.
    pub evicted: BTreeMap<String, usize>,
    /// Entries retained, per type name.
    pub retained: BTreeMap<String, usize>,
}

/// A window that stores data flat and buckets it at query time.
///
/// Cloning is cheap and yields another handle to the same window.
#[derive(Clone)]
pub struct OnDemandWindow {
    inner: Arc<Inner>,
}

struct Inner {
    config: OnDemandConfig,
    scheduler: Arc<dyn TaskScheduler>,
    subject: Subject<OnDemandEvent, ()>,
    stores: HashMap<TypeId, Box<dyn ErasedStore>>,
    next_seq: AtomicU64,
    started: AtomicBool,
    lifecycle: Mutex<()>,
    maintenance: Mutex<()>,
    _registration: NameRegistration,
}

impl OnDemandWindow {
    /// Creates a window and registers its name.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NameAlreadyRegistered`] if the name is in use,
    /// or a scheduler error if the default scheduler cannot be built.
    pub fn new(config: OnDemandConfig) -> Result<Self> {
        let window = config.window();
        let registration =
            NameRegistration::acquire(Arc::clone(window.name_registry()), window.name())?;
        let scheduler = window.resolve_scheduler()?;
        let stores = window
            .data_types()
            .iter()
            .map(|dt| (dt.id(), dt.new_store()))
            .collect();

        let inner = Inner {
            subject: Subject::new(Arc::clone(&scheduler)),
            scheduler,
            config,
            stores,
            next_seq: AtomicU64::new(0),
            started: AtomicBool::new(false),
            lifecycle: Mutex::new(()),
            maintenance: Mutex::new(()),
            _registration: registration,
        };
        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    /// Schedules periodic maintenance.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::AlreadyStarted`] on a second call.
    pub fn start(&self) -> Result<()> {
        let inner = &self.inner;
        let _lifecycle = inner.lifecycle.lock();
        if inner.started.load(Ordering::Acquire) {
            return Err(LifecycleError::AlreadyStarted.into());
        }

        let window = inner.config.window();
        let spec = WindowMetricsSpec::for_events::<OnDemandEvent>().with_timer(VIEW_TUMBLING_DURATION);
        window.metrics().initialize(window, spec)?;
        inner.started.store(true, Ordering::Release);

        let interval = inner.config.maintenance_interval();
        let weak: Weak<Inner> = Arc::downgrade(inner);
        inner.scheduler.schedule_every(
            interval,
            Arc::new(move || {
                let Some(inner) = weak.upgrade() else {
                    return ControlFlow::Break(());
                };
                if let Err(e) = inner.run_maintenance() {
                    error!(window = %inner.name(), error = %e, "maintenance failed");
                }
                ControlFlow::Continue(())
            }),
        );
        debug!(
            window = %inner.name(),
            maintenance_interval_ms = interval.as_millis(),
            "window started; maintenance scheduled"
        );
        Ok(())
    }

    /// Stores `data`, timestamped now.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`], or
    /// [`DataError::ClassNotStored`] if `T` was not registered.
    pub fn add_data<T: WindowData>(&self, data: T) -> Result<()> {
        self.inner.ensure_started()?;
        let store = self.inner.store::<T>()?;
        let timestamp_ns = self.inner.config.window().clock().now_ns();
        let seq = self.inner.next_seq.fetch_add(1, Ordering::Relaxed);
        store.insert(timestamp_ns, seq, data);
        Ok(())
    }

    /// Slices retained data into contiguous immutable buckets.
    ///
    /// Unset query fields default to the whole window as one bucket. Buckets
    /// are returned oldest first; bucket `i` holds the entries with timestamps
    /// in `[start + i * bucket_length, start + (i + 1) * bucket_length - 1ns]`.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`], or the
    /// [`QueryError`](crate::error::QueryError) for the first violated rule.
    pub fn on_demand_tumbling_buckets(&self, query: TumblingQuery) -> Result<Vec<OnDemandBucket>> {
        self.inner.ensure_started()?;
        let window = self.inner.config.window();
        let clock = window.clock();
        let range = query.resolve(clock.now_ns(), window.length())?;

        let (buckets, elapsed_ms) = measure_ms(|| {
            let flag = MutationFlag::frozen();
            let data_types = window.data_types();
            let mut slices: Vec<_> = data_types
                .iter()
                .filter_map(|dt| self.inner.stores.get(&dt.id()))
                .map(|store| store.tumbling_slices(&range, &flag, clock).into_iter())
                .collect();

            range
                .bucket_bounds()
                .map(|(start_ns, end_ns)| {
                    let data = data_types
                        .iter()
                        .zip(slices.iter_mut())
                        .filter_map(|(dt, slice)| slice.next().map(|d| (dt.id(), d)))
                        .collect();
                    let contents =
                        BucketContents::from_parts(start_ns, data_types, data, Arc::clone(&flag));
                    OnDemandBucket::new(contents, end_ns)
                })
                .collect::<Vec<_>>()
        });

        self.inner
            .record(window.metrics().update_named_timer(VIEW_TUMBLING_DURATION, elapsed_ms));
        Ok(buckets)
    }

    /// Runs one maintenance pass now.
    ///
    /// # Errors
    ///
    /// Returns [`LifecycleError::NotStarted`] before [`Self::start`].
    pub fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.inner.run_maintenance()
    }

    /// Number of retained entries of `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::ClassNotStored`] if `T` was not registered.
    pub fn item_count<T: WindowData>(&self) -> Result<usize> {
        Ok(ErasedStore::len(self.inner.store::<T>()?))
    }

    /// Every retained entry of `T`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::ClassNotStored`] if `T` was not registered.
    pub fn entries<T: WindowData>(&self) -> Result<Vec<TimestampedData<T>>> {
        Ok(self.inner.store::<T>()?.snapshot())
    }

    /// Registers an observer. On-demand windows currently emit no events.
    pub fn add_observer(&self, observer: OnDemandObserver) -> ObserverId {
        self.inner.subject.add_observer(observer)
    }

    /// Removes an observer. Returns `true` if it was registered.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        self.inner.subject.remove_observer(id)
    }

    /// The window's configuration.
    pub fn config(&self) -> &OnDemandConfig {
        &self.inner.config
    }

    /// The window's name.
    pub fn name(&self) -> &str {
        self.inner.name()
    }

    /// Whether [`Self::start`] has run.
    pub fn has_started(&self) -> bool {
        self.inner.started.load(Ordering::Acquire)
    }
}

impl fmt::Debug for OnDemandWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandWindow")
            .field("name", &self.name())
            .field("length", &self.inner.config.window().length())
            .field("maintenance_interval", &self.inner.config.maintenance_interval())
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

    fn store<T: WindowData>(&self) -> Result<&TimeOrderedStore<T>> {
        self.stores
            .get(&TypeId::of::<T>())
            .and_then(|store| store.as_any().downcast_ref::<TimeOrderedStore<T>>())
            .ok_or_else(|| {
                DataError::ClassNotStored {
                    type_name: short_type_name::<T>(),
                }
                .into()
            })
    }

    fn run_maintenance(&self) -> Result<MaintenanceReport> {
        self.ensure_started()?;
        let _maintenance = self.maintenance.lock();
        let window = self.config.window();

        let (report, elapsed_ms) = measure_ms(|| {
            let cutoff_ns = window
                .clock()
                .now_ns()
                .saturating_sub(duration_ns(window.length()));
            let mut report = MaintenanceReport {
                cutoff_ns,
                evicted: BTreeMap::new(),
                retained: BTreeMap::new(),
            };
            for data_type in window.data_types() {
                let Some(store) = self.stores.get(&data_type.id()) else {
                    continue;
                };
                let evicted = store.evict_before(cutoff_ns);
                let retained = store.len();
                if evicted > 0 {
                    debug!(
                        window = %self.name(),
                        class = data_type.name(),
                        evicted,
                        retained,
                        "evicted expired entries"
                    );
                }
                self.record(window.metrics().update_data_item_count(data_type, retained));
                report.evicted.insert(data_type.name().to_string(), evicted);
                report.retained.insert(data_type.name().to_string(), retained);
            }
            report
        });

        self.record(window.metrics().update_maintenance_duration(elapsed_ms));
        Ok(report)
    }

    fn record(&self, result: Result<()>) {
        if let Err(e) = result {
            debug!(window = %self.name(), error = %e, "metrics update skipped");
        }
    }
}
