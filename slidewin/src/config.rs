//! Window configuration and validation.
//!
//! A [`WindowConfig`] carries what every window needs: a unique name, the
//! retained length, the stored data types and the collaborators. Strategy
//! configs wrap it and add their own parameters:
//!
//! - [`FixedTumblingConfig`]: bucket length; the window length must be an
//!   exact multiple of it.
//! - [`OnDemandConfig`]: maintenance interval, `length / 4` by default.
//!
//! All configs are validated on construction and immutable afterwards.
//! [`WindowSettings`] is the serializable form of the same parameters, used by
//! tools that read window definitions from JSON.
//!
//! # Example
//!
//! ```rust
//! use slidewin::config::{FixedTumblingConfig, WindowConfig};
//! use slidewin::data::DataType;
//! use std::time::Duration;
//!
//! let window = WindowConfig::new("requests", Duration::from_secs(3), vec![DataType::of::<u64>()])?;
//! let config = FixedTumblingConfig::new(window, Duration::from_secs(1))?;
//! assert_eq!(config.non_current_bucket_count(), 3);
//! # Ok::<(), slidewin::error::WindowError>(())
//! ```

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::clock::{Clock, SystemClock, duration_ns};
use crate::data::DataType;
use crate::error::{ConfigError, Result};
use crate::metrics::Metrics;
use crate::registry::WindowNameRegistry;
use crate::schedule::{DefaultTaskScheduler, TaskScheduler};

/// Shortest accepted window length.
pub const MIN_LENGTH: Duration = Duration::from_millis(250);

/// Shortest accepted bucket length.
pub const MIN_BUCKET_LENGTH: Duration = Duration::from_millis(250);

/// Shortest accepted maintenance interval.
pub const MIN_MAINTENANCE_INTERVAL: Duration = Duration::from_millis(250);

/// Parameters shared by every window strategy.
#[derive(Debug, Clone)]
pub struct WindowConfig {
    name: String,
    length: Duration,
    data_types: Vec<DataType>,
    scheduler: Option<Arc<dyn TaskScheduler>>,
    metrics: Arc<Metrics>,
    clock: Arc<dyn Clock>,
    name_registry: Arc<WindowNameRegistry>,
}

impl WindowConfig {
    /// Creates a configuration with default collaborators.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::NameEmpty`] for a blank name,
    /// [`ConfigError::NoDataTypes`] for an empty type list, or
    /// [`ConfigError::DuplicateDataType`] if a type is listed twice.
    pub fn new(name: impl Into<String>, length: Duration, data_types: Vec<DataType>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        validate_data_types(&data_types)?;
        Ok(Self {
            name,
            length,
            data_types,
            scheduler: None,
            metrics: Arc::new(Metrics::no_op()),
            clock: Arc::new(SystemClock),
            name_registry: WindowNameRegistry::global(),
        })
    }

    /// Uses `scheduler` for rotation, maintenance and async observers.
    #[must_use]
    pub fn with_scheduler(mut self, scheduler: Arc<dyn TaskScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }

    /// Reports to `metrics`.
    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = metrics;
        self
    }

    /// Reads the time from `clock`.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Registers the window name in `registry` instead of the global one.
    #[must_use]
    pub fn with_name_registry(mut self, registry: Arc<WindowNameRegistry>) -> Self {
        self.name_registry = registry;
        self
    }

    /// Window name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Retained length.
    pub fn length(&self) -> Duration {
        self.length
    }

    /// Stored data types, in registration order.
    pub fn data_types(&self) -> &[DataType] {
        &self.data_types
    }

    /// Metrics collaborator.
    pub fn metrics(&self) -> &Arc<Metrics> {
        &self.metrics
    }

    /// Clock collaborator.
    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Name registry the window registers in.
    pub fn name_registry(&self) -> &Arc<WindowNameRegistry> {
        &self.name_registry
    }

    /// The configured scheduler, if one was supplied.
    pub fn scheduler(&self) -> Option<&Arc<dyn TaskScheduler>> {
        self.scheduler.as_ref()
    }

    /// The configured scheduler, or a new [`DefaultTaskScheduler`] on this
    /// config's clock.
    pub(crate) fn resolve_scheduler(&self) -> Result<Arc<dyn TaskScheduler>> {
        if let Some(scheduler) = &self.scheduler {
            return Ok(Arc::clone(scheduler));
        }
        let scheduler = DefaultTaskScheduler::new()?.with_clock(Arc::clone(&self.clock));
        Ok(Arc::new(scheduler))
    }
}

/// Configuration of a fixed tumbling window.
#[derive(Debug, Clone)]
pub struct FixedTumblingConfig {
    window: WindowConfig,
    bucket_length: Duration,
}

impl FixedTumblingConfig {
    /// Validates `bucket_length` against the window length.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if either length is below its minimum, the
    /// window is shorter than a bucket, or the window length is not an exact
    /// multiple of the bucket length.
    pub fn new(window: WindowConfig, bucket_length: Duration) -> Result<Self> {
        validate_fixed_lengths(window.length, bucket_length)?;
        Ok(Self {
            window,
            bucket_length,
        })
    }

    /// Shared window parameters.
    pub fn window(&self) -> &WindowConfig {
        &self.window
    }

    /// Length of each bucket.
    pub fn bucket_length(&self) -> Duration {
        self.bucket_length
    }

    /// Number of non-current buckets retained: `length / bucket_length`.
    pub fn non_current_bucket_count(&self) -> usize {
        let count = duration_ns(self.window.length) / duration_ns(self.bucket_length);
        usize::try_from(count).unwrap_or(usize::MAX)
    }
}

/// Configuration of an on-demand window.
#[derive(Debug, Clone)]
pub struct OnDemandConfig {
    window: WindowConfig,
    maintenance_interval: Duration,
}

impl OnDemandConfig {
    /// Uses a maintenance interval of a quarter of the window length.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the length or the derived interval is
    /// below its minimum.
    pub fn new(window: WindowConfig) -> Result<Self> {
        let maintenance_interval = default_maintenance_interval(window.length);
        Self::with_maintenance_interval(window, maintenance_interval)
    }

    /// Uses an explicit maintenance interval.
    ///
    /// # Errors
    ///
    /// Returns a [`ConfigError`] if the length or the interval is below its
    /// minimum.
    pub fn with_maintenance_interval(
        window: WindowConfig,
        maintenance_interval: Duration,
    ) -> Result<Self> {
        validate_on_demand(window.length, maintenance_interval)?;
        Ok(Self {
            window,
            maintenance_interval,
        })
    }

    /// Shared window parameters.
    pub fn window(&self) -> &WindowConfig {
        &self.window
    }

    /// Interval between maintenance passes.
    pub fn maintenance_interval(&self) -> Duration {
        self.maintenance_interval
    }
}

/// Serializable window definition.
///
/// ```rust
/// use slidewin::config::WindowSettings;
/// use std::time::Duration;
///
/// let settings = WindowSettings::from_json(
///     r#"{"name": "api", "length": 3.0, "strategy": {"type": "fixed_tumbling", "bucket_length": 1.0}}"#,
/// )?;
/// assert_eq!(settings.length, Duration::from_secs(3));
/// settings.validate()?;
/// # Ok::<(), slidewin::error::WindowError>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSettings {
    /// Window name.
    pub name: String,
    /// Retained length, in seconds.
    #[serde(with = "duration_serde")]
    pub length: Duration,
    /// Windowing strategy and its parameters.
    pub strategy: StrategySettings,
}

/// Strategy part of [`WindowSettings`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StrategySettings {
    /// A fixed tumbling window.
    FixedTumbling {
        /// Bucket length, in seconds.
        #[serde(with = "duration_serde")]
        bucket_length: Duration,
    },
    /// An on-demand window.
    OnDemand {
        /// Maintenance interval, in seconds. Defaults to `length / 4`.
        #[serde(
            default,
            with = "option_duration_serde",
            skip_serializing_if = "Option::is_none"
        )]
        maintenance_interval: Option<Duration>,
    },
}

impl WindowSettings {
    /// Parses settings from JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Settings`] if the document is malformed.
    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(|e| ConfigError::Settings(e.to_string()).into())
    }

    /// Serializes settings to pretty-printed JSON.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Settings`] if serialization fails.
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).map_err(|e| ConfigError::Settings(e.to_string()).into())
    }

    /// Applies every rule the corresponding config would apply, except the
    /// data type checks.
    ///
    /// # Errors
    ///
    /// Returns the first violated [`ConfigError`].
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        match self.strategy {
            StrategySettings::FixedTumbling { bucket_length } => {
                validate_fixed_lengths(self.length, bucket_length)
            }
            StrategySettings::OnDemand { .. } => {
                validate_on_demand(self.length, self.effective_maintenance_interval())
            }
        }
    }

    /// The maintenance interval an on-demand window built from these settings
    /// would use.
    pub fn effective_maintenance_interval(&self) -> Duration {
        match self.strategy {
            StrategySettings::OnDemand {
                maintenance_interval: Some(interval),
            } => interval,
            _ => default_maintenance_interval(self.length),
        }
    }

    /// Builds the shared window config for `data_types`.
    ///
    /// # Errors
    ///
    /// See [`WindowConfig::new`].
    pub fn window_config(&self, data_types: Vec<DataType>) -> Result<WindowConfig> {
        WindowConfig::new(self.name.clone(), self.length, data_types)
    }
}

fn default_maintenance_interval(length: Duration) -> Duration {
    length / 4
}

fn validate_name(name: &str) -> Result<()> {
    if name.trim().is_empty() {
        return Err(ConfigError::NameEmpty.into());
    }
    Ok(())
}

fn validate_data_types(data_types: &[DataType]) -> Result<()> {
    if data_types.is_empty() {
        return Err(ConfigError::NoDataTypes.into());
    }
    let mut seen = HashSet::with_capacity(data_types.len());
    for dt in data_types {
        if !seen.insert(dt.id()) {
            return Err(ConfigError::DuplicateDataType {
                type_name: dt.name(),
            }
            .into());
        }
    }
    Ok(())
}

fn validate_length(length: Duration) -> Result<()> {
    if length < MIN_LENGTH {
        return Err(ConfigError::LengthTooShort {
            minimum: MIN_LENGTH,
            actual: length,
        }
        .into());
    }
    Ok(())
}

fn validate_fixed_lengths(length: Duration, bucket_length: Duration) -> Result<()> {
    validate_length(length)?;
    if bucket_length < MIN_BUCKET_LENGTH {
        return Err(ConfigError::BucketLengthTooShort {
            minimum: MIN_BUCKET_LENGTH,
            actual: bucket_length,
        }
        .into());
    }
    if length < bucket_length {
        return Err(ConfigError::LengthLessThanBucketLength {
            length,
            bucket_length,
        }
        .into());
    }
    if duration_ns(length) % duration_ns(bucket_length) != 0 {
        return Err(ConfigError::LengthNotMultiple {
            length,
            bucket_length,
        }
        .into());
    }
    Ok(())
}

fn validate_on_demand(length: Duration, maintenance_interval: Duration) -> Result<()> {
    validate_length(length)?;
    if maintenance_interval < MIN_MAINTENANCE_INTERVAL {
        return Err(ConfigError::MaintenanceIntervalTooShort {
            minimum: MIN_MAINTENANCE_INTERVAL,
            actual: maintenance_interval,
        }
        .into());
    }
    Ok(())
}

mod duration_serde {
    use std::time::Duration;

    use serde::de::Error;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.as_secs_f64().serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(D::Error::custom)
    }
}

mod option_duration_serde {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    #[allow(clippy::ref_option)] // Signature required by serde's `with`
    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(d) => super::duration_serde::serialize(d, serializer),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct Wrapper(#[serde(with = "super::duration_serde")] Duration);

        Ok(Option::<Wrapper>::deserialize(deserializer)?.map(|Wrapper(d)| d))
    }
}
