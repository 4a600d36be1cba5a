//! Metrics collaborator.
//!
//! [`Metrics`] renders a fixed catalog of gauges, timers and distribution
//! summaries for one window when the window starts, and forwards updates to a
//! pluggable [`MetricsBackend`]. Every metric is tagged with `window_name`.
//!
//! # Catalog
//!
//! | Name | Kind | Extra tag |
//! |------|------|-----------|
//! | `window.config.length_ms` | gauge | |
//! | `window.maintenance.duration` | timer | |
//! | `window.observer.duration` | timer | `event` |
//! | `window.data.items` | distribution summary | `class` |
//!
//! Fixed tumbling windows add `window.config.bucket.length_ms` (gauge) and
//! `window.bucket.duration` (timer); on-demand windows add
//! `window.view.tumbling.duration` (timer).
//!
//! Strategies request their extras through [`WindowMetricsSpec`].

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, OnceLock};
use std::time::Instant;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::config::WindowConfig;
use crate::data::DataType;
use crate::error::{MetricsError, Result};
use crate::observer::ObserverEvent;

/// Gauge with the configured window length in milliseconds.
pub const CONFIG_LENGTH_MS: &str = "window.config.length_ms";
/// Timer of maintenance passes.
pub const MAINTENANCE_DURATION: &str = "window.maintenance.duration";
/// Timer of observer dispatch, one per event.
pub const OBSERVER_DURATION: &str = "window.observer.duration";
/// Distribution summary of live items, one per stored type.
pub const DATA_ITEMS: &str = "window.data.items";

/// Gauge with the configured bucket length of a fixed tumbling window.
pub const CONFIG_BUCKET_LENGTH_MS: &str = "window.config.bucket.length_ms";
/// Timer of the actual duration of ended fixed tumbling buckets.
pub const BUCKET_DURATION: &str = "window.bucket.duration";
/// Timer of on-demand tumbling bucket queries.
pub const VIEW_TUMBLING_DURATION: &str = "window.view.tumbling.duration";

/// Tag carrying the window name.
pub const TAG_WINDOW_NAME: &str = "window_name";
/// Tag carrying the observer event name.
pub const TAG_EVENT: &str = "event";
/// Tag carrying the stored type name.
pub const TAG_CLASS: &str = "class";

/// Kind of a rendered metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    /// A value set once at registration.
    Gauge,
    /// Durations in milliseconds.
    Timer,
    /// Arbitrary sampled values.
    DistributionSummary,
}

/// Identity of a rendered metric: name, kind and tags.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricId {
    /// Metric name.
    pub name: String,
    /// Metric kind.
    pub kind: MetricKind,
    /// Tags, sorted by key.
    pub tags: BTreeMap<String, String>,
}

impl MetricId {
    fn new(name: &str, kind: MetricKind, window_name: &str) -> Self {
        let mut tags = BTreeMap::new();
        tags.insert(TAG_WINDOW_NAME.to_string(), window_name.to_string());
        Self {
            name: name.to_string(),
            kind,
            tags,
        }
    }

    fn tagged(mut self, key: &str, value: &str) -> Self {
        self.tags.insert(key.to_string(), value.to_string());
        self
    }

    /// Returns `true` if every `(key, value)` pair is among this metric's tags.
    pub fn has_tags(&self, tags: &[(&str, &str)]) -> bool {
        tags.iter()
            .all(|(k, v)| self.tags.get(*k).is_some_and(|existing| existing == v))
    }
}

impl fmt::Display for MetricId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{{", self.name)?;
        for (i, (k, v)) in self.tags.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{k}={v}")?;
        }
        f.write_str("}")
    }
}

/// Receives rendered metrics and their updates.
pub trait MetricsBackend: Send + Sync + fmt::Debug {
    /// Registers a metric. Gauges carry their value.
    fn register(&self, id: &MetricId, gauge_value: Option<f64>);

    /// Records a duration in milliseconds.
    fn update_timer(&self, id: &MetricId, duration_ms: f64);

    /// Records a sampled value.
    fn update_distribution_summary(&self, id: &MetricId, value: f64);
}

/// A backend that discards everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpMetrics;

impl MetricsBackend for NoOpMetrics {
    fn register(&self, _id: &MetricId, _gauge_value: Option<f64>) {}

    fn update_timer(&self, _id: &MetricId, _duration_ms: f64) {}

    fn update_distribution_summary(&self, _id: &MetricId, _value: f64) {}
}

/// Aggregated statistics of one metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSnapshot {
    /// The metric.
    #[serde(flatten)]
    pub id: MetricId,
    /// Gauge value, for gauges.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<f64>,
    /// Number of samples.
    pub count: u64,
    /// Sum of samples.
    pub total: f64,
    /// Largest sample.
    pub max: f64,
    /// Most recent sample.
    pub last: f64,
}

impl MetricSnapshot {
    fn new(id: MetricId, value: Option<f64>) -> Self {
        Self {
            id,
            value,
            count: 0,
            total: 0.0,
            max: 0.0,
            last: 0.0,
        }
    }

    fn record(&mut self, sample: f64) {
        self.count += 1;
        self.total += sample;
        self.last = sample;
        if self.count == 1 || sample > self.max {
            self.max = sample;
        }
    }

    /// Mean of samples, or `None` if there are none.
    #[allow(clippy::cast_precision_loss)] // Sample counts stay far below 2^52
    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total / self.count as f64)
    }
}

/// A backend that keeps statistics in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetrics {
    metrics: Mutex<BTreeMap<MetricId, MetricSnapshot>>,
}

impl InMemoryMetrics {
    /// Creates an empty backend.
    pub fn new() -> Self {
        Self::default()
    }

    /// All metrics, ordered by identity.
    pub fn snapshot(&self) -> Vec<MetricSnapshot> {
        self.metrics.lock().values().cloned().collect()
    }

    /// Statistics of one metric.
    pub fn get(&self, id: &MetricId) -> Option<MetricSnapshot> {
        self.metrics.lock().get(id).cloned()
    }

    fn record(&self, id: &MetricId, sample: f64) {
        self.metrics
            .lock()
            .entry(id.clone())
            .or_insert_with(|| MetricSnapshot::new(id.clone(), None))
            .record(sample);
    }
}

impl MetricsBackend for InMemoryMetrics {
    fn register(&self, id: &MetricId, gauge_value: Option<f64>) {
        self.metrics
            .lock()
            .insert(id.clone(), MetricSnapshot::new(id.clone(), gauge_value));
    }

    fn update_timer(&self, id: &MetricId, duration_ms: f64) {
        self.record(id, duration_ms);
    }

    fn update_distribution_summary(&self, id: &MetricId, value: f64) {
        self.record(id, value);
    }
}

/// Strategy-specific additions to the base catalog.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WindowMetricsSpec {
    observer_events: Vec<&'static str>,
    gauges: Vec<(&'static str, f64)>,
    timers: Vec<&'static str>,
}

impl WindowMetricsSpec {
    /// A spec rendering one observer timer per event of `E`.
    pub fn for_events<E: ObserverEvent>() -> Self {
        Self {
            observer_events: E::all().iter().map(ObserverEvent::name).collect(),
            ..Self::default()
        }
    }

    /// Adds a gauge.
    #[must_use]
    pub fn with_gauge(mut self, name: &'static str, value: f64) -> Self {
        self.gauges.push((name, value));
        self
    }

    /// Adds a timer.
    #[must_use]
    pub fn with_timer(mut self, name: &'static str) -> Self {
        self.timers.push(name);
        self
    }
}

#[derive(Debug)]
struct Catalog {
    maintenance: MetricId,
    observers: HashMap<&'static str, MetricId>,
    items: HashMap<TypeId, MetricId>,
    named_timers: HashMap<&'static str, MetricId>,
    rendered: Vec<MetricId>,
}

/// Per-window metrics: a catalog rendered once, plus the backend it reports to.
pub struct Metrics {
    backend: Arc<dyn MetricsBackend>,
    catalog: OnceLock<Catalog>,
}

impl Metrics {
    /// Reports to `backend`.
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self {
            backend,
            catalog: OnceLock::new(),
        }
    }

    /// Discards all updates.
    pub fn no_op() -> Self {
        Self::new(Arc::new(NoOpMetrics))
    }

    /// The backend updates are forwarded to.
    pub fn backend(&self) -> &Arc<dyn MetricsBackend> {
        &self.backend
    }

    /// Whether the catalog has been rendered.
    pub fn is_initialized(&self) -> bool {
        self.catalog.get().is_some()
    }

    /// Renders and registers the catalog for `config`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::AlreadyInitialized`] on a second call.
    #[allow(clippy::cast_precision_loss)] // Window lengths are far below 2^52 ms
    pub fn initialize(&self, config: &WindowConfig, spec: WindowMetricsSpec) -> Result<()> {
        if self.is_initialized() {
            return Err(MetricsError::AlreadyInitialized.into());
        }

        let name = config.name();
        let mut gauges = vec![(
            MetricId::new(CONFIG_LENGTH_MS, MetricKind::Gauge, name),
            config.length().as_millis() as f64,
        )];
        gauges.extend(
            spec.gauges
                .iter()
                .map(|(g, v)| (MetricId::new(g, MetricKind::Gauge, name), *v)),
        );

        let maintenance = MetricId::new(MAINTENANCE_DURATION, MetricKind::Timer, name);
        let observers: HashMap<_, _> = spec
            .observer_events
            .iter()
            .map(|event| {
                let id = MetricId::new(OBSERVER_DURATION, MetricKind::Timer, name)
                    .tagged(TAG_EVENT, event);
                (*event, id)
            })
            .collect();
        let items: HashMap<_, _> = config
            .data_types()
            .iter()
            .map(|dt| {
                let id = MetricId::new(DATA_ITEMS, MetricKind::DistributionSummary, name)
                    .tagged(TAG_CLASS, dt.name());
                (dt.id(), id)
            })
            .collect();
        let named_timers: HashMap<_, _> = spec
            .timers
            .iter()
            .map(|t| (*t, MetricId::new(t, MetricKind::Timer, name)))
            .collect();

        let mut rendered: Vec<MetricId> = gauges.iter().map(|(id, _)| id.clone()).collect();
        rendered.push(maintenance.clone());
        rendered.extend(spec.observer_events.iter().filter_map(|e| observers.get(e).cloned()));
        rendered.extend(
            config
                .data_types()
                .iter()
                .filter_map(|dt| items.get(&dt.id()).cloned()),
        );
        rendered.extend(spec.timers.iter().filter_map(|t| named_timers.get(t).cloned()));

        let catalog = Catalog {
            maintenance,
            observers,
            items,
            named_timers,
            rendered,
        };
        self.catalog
            .set(catalog)
            .map_err(|_| MetricsError::AlreadyInitialized)?;

        for (id, value) in &gauges {
            self.backend.register(id, Some(*value));
        }
        for id in self.catalog()?.rendered.iter().filter(|id| id.kind != MetricKind::Gauge) {
            self.backend.register(id, None);
        }
        Ok(())
    }

    fn catalog(&self) -> Result<&Catalog> {
        self.catalog
            .get()
            .ok_or_else(|| MetricsError::NotInitialized.into())
    }

    /// Every rendered metric, in registration order.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::NotInitialized`] before [`Self::initialize`].
    pub fn rendered_metrics(&self) -> Result<Vec<MetricId>> {
        Ok(self.catalog()?.rendered.clone())
    }

    /// Looks a rendered metric up by name and a subset of its tags.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::NotInitialized`] before [`Self::initialize`],
    /// or [`MetricsError::UnknownMetric`] if nothing matches.
    pub fn find(&self, name: &str, tags: &[(&str, &str)]) -> Result<MetricId> {
        self.catalog()?
            .rendered
            .iter()
            .find(|id| id.name == name && id.has_tags(tags))
            .cloned()
            .ok_or_else(|| {
                MetricsError::UnknownMetric {
                    name: name.to_string(),
                }
                .into()
            })
    }

    /// Records a duration against `id`.
    pub fn update_timer(&self, id: &MetricId, duration_ms: f64) {
        self.backend.update_timer(id, duration_ms);
    }

    /// Records a sample against `id`.
    pub fn update_distribution_summary(&self, id: &MetricId, value: f64) {
        self.backend.update_distribution_summary(id, value);
    }

    /// Records a maintenance pass duration.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::NotInitialized`] before [`Self::initialize`].
    pub fn update_maintenance_duration(&self, duration_ms: f64) -> Result<()> {
        let catalog = self.catalog()?;
        self.update_timer(&catalog.maintenance, duration_ms);
        Ok(())
    }

    /// Records how long dispatching `event` took.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::NotInitialized`] before [`Self::initialize`],
    /// or [`MetricsError::UnknownObserverEvent`] if the event has no timer.
    pub fn update_observer_duration(&self, event: &str, duration_ms: f64) -> Result<()> {
        let id = self.catalog()?.observers.get(event).ok_or_else(|| {
            MetricsError::UnknownObserverEvent {
                event: event.to_string(),
            }
        })?;
        self.update_timer(id, duration_ms);
        Ok(())
    }

    /// Records the live item count of `data_type`.
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::NotInitialized`] before [`Self::initialize`],
    /// or [`MetricsError::ClassNotStored`] if the type is not registered.
    #[allow(clippy::cast_precision_loss)] // Item counts stay far below 2^52
    pub fn update_data_item_count(&self, data_type: &DataType, count: usize) -> Result<()> {
        let id = self
            .catalog()?
            .items
            .get(&data_type.id())
            .ok_or(MetricsError::ClassNotStored {
                type_name: data_type.name(),
            })?;
        self.update_distribution_summary(id, count as f64);
        Ok(())
    }

    /// Records a duration against a timer added with [`WindowMetricsSpec::with_timer`].
    ///
    /// # Errors
    ///
    /// Returns [`MetricsError::NotInitialized`] before [`Self::initialize`],
    /// or [`MetricsError::UnknownMetric`] if no such timer was rendered.
    pub fn update_named_timer(&self, name: &str, duration_ms: f64) -> Result<()> {
        let id = self
            .catalog()?
            .named_timers
            .get(name)
            .ok_or_else(|| MetricsError::UnknownMetric {
                name: name.to_string(),
            })?;
        self.update_timer(id, duration_ms);
        Ok(())
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::no_op()
    }
}

impl fmt::Debug for Metrics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Metrics")
            .field("backend", &self.backend)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}

/// Runs `f` and returns its result with the elapsed wall time in milliseconds.
pub fn measure_ms<R>(f: impl FnOnce() -> R) -> (R, f64) {
    let started = Instant::now();
    let result = f();
    (result, started.elapsed().as_secs_f64() * 1_000.0)
}
