//! Error types for the slidewin windowing engine.

use std::time::Duration;

use thiserror::Error;

/// The main error type for all slidewin operations.
///
/// Every failure is a synchronous, condition-typed signal. None are retried
/// internally, and a failed operation leaves prior window state intact.
#[derive(Error, Debug)]
pub enum WindowError {
    /// Error validating a window configuration.
    #[error("config error: {0}")]
    Config(#[from] ConfigError),

    /// Error in the window lifecycle (start, naming).
    #[error("lifecycle error: {0}")]
    Lifecycle(#[from] LifecycleError),

    /// Error adding or accessing bucket data.
    #[error("data error: {0}")]
    Data(#[from] DataError),

    /// Error in the arguments of an on-demand range query.
    #[error("query error: {0}")]
    Query(#[from] QueryError),

    /// Error detected while rotating the current bucket.
    #[error("rotation error: {0}")]
    Rotation(#[from] RotationError),

    /// Error using the metrics collaborator.
    #[error("metrics error: {0}")]
    Metrics(#[from] MetricsError),

    /// Error creating the default task scheduler.
    #[error("scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),
}

/// Errors raised while building a task scheduler.
#[derive(Error, Debug)]
pub enum SchedulerError {
    /// The async runtime backing the scheduler could not be built.
    #[error("failed to build scheduler runtime: {source}")]
    RuntimeBuild {
        /// The underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

/// Errors raised while validating a window configuration.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// The window name is empty or blank.
    #[error("'name' must not be empty")]
    NameEmpty,

    /// No data types were registered for storage.
    #[error("'data_types' must not be empty")]
    NoDataTypes,

    /// The same data type was registered more than once.
    #[error("data type '{type_name}' registered more than once")]
    DuplicateDataType {
        /// Display name of the repeated type.
        type_name: &'static str,
    },

    /// The total window length is below the minimum.
    #[error("'length' must be >= {}ms (got {actual:?})", minimum.as_millis())]
    LengthTooShort {
        /// The minimum accepted length.
        minimum: Duration,
        /// The configured length.
        actual: Duration,
    },

    /// The bucket length is below the minimum.
    #[error("'bucket_length' must be >= {}ms (got {actual:?})", minimum.as_millis())]
    BucketLengthTooShort {
        /// The minimum accepted bucket length.
        minimum: Duration,
        /// The configured bucket length.
        actual: Duration,
    },

    /// The window length is shorter than a single bucket.
    #[error("'length' ({length:?}) must be >= 'bucket_length' ({bucket_length:?})")]
    LengthLessThanBucketLength {
        /// The configured window length.
        length: Duration,
        /// The configured bucket length.
        bucket_length: Duration,
    },

    /// The window length is not an exact multiple of the bucket length.
    #[error("'length' ({length:?}) must be an exact multiple of 'bucket_length' ({bucket_length:?})")]
    LengthNotMultiple {
        /// The configured window length.
        length: Duration,
        /// The configured bucket length.
        bucket_length: Duration,
    },

    /// The maintenance interval is below the minimum.
    #[error("'maintenance_interval' must be >= {}ms (got {actual:?})", minimum.as_millis())]
    MaintenanceIntervalTooShort {
        /// The minimum accepted interval.
        minimum: Duration,
        /// The configured interval.
        actual: Duration,
    },

    /// The settings document could not be parsed.
    #[error("invalid window settings: {0}")]
    Settings(String),
}

/// Errors raised by the window lifecycle.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LifecycleError {
    /// The window was used before `start()`.
    #[error("not started")]
    NotStarted,

    /// `start()` was called more than once.
    #[error("already started")]
    AlreadyStarted,

    /// Another live window already uses this name.
    #[error("window name '{name}' already registered")]
    NameAlreadyRegistered {
        /// The conflicting name.
        name: String,
    },
}

/// Errors raised when adding to or reading from bucket data.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
    /// The data type was not registered when the window was configured.
    #[error("class not stored: {type_name}")]
    ClassNotStored {
        /// Display name of the unregistered type.
        type_name: &'static str,
    },

    /// The owning bucket no longer accepts mutations.
    #[error("mutations no longer allowed")]
    MutationsNoLongerAllowed,

    /// The bucket has already transitioned to non-current.
    #[error("already ended")]
    AlreadyEnded,
}

/// Argument violations for on-demand tumbling bucket queries.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QueryError {
    /// The requested length is zero.
    #[error("'length' must be > 0ms")]
    LengthNotPositive,

    /// The requested bucket length is zero.
    #[error("'bucket_length' must be > 0ms")]
    BucketLengthNotPositive,

    /// The requested start lies after now.
    #[error("'start' must not be in the future")]
    StartInFuture,

    /// The requested start lies before the window's retention horizon.
    #[error("'start' must be later than the start of the window")]
    StartTooEarly,

    /// The requested range ends after now.
    #[error("'start' + 'length' must not be in the future")]
    EndInFuture,

    /// The requested length is shorter than one bucket.
    #[error("'length' must be >= 'bucket_length'")]
    LengthLessThanBucketLength,

    /// The requested length is not an exact multiple of the bucket length.
    #[error("'length' must be an exact multiple of 'bucket_length'")]
    LengthNotMultiple,
}

/// Consistency failures detected during bucket rotation.
///
/// These indicate a scheduler or logic defect rather than a user error.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RotationError {
    /// A scheduled end fired for a bucket that is no longer current.
    #[error("ended bucket is not marked as current")]
    EndedBucketNotCurrent,

    /// A scheduled end referenced a bucket the window no longer retains.
    #[error("unknown bucket id {id}")]
    UnknownBucket {
        /// The identifier carried by the scheduled task.
        id: u64,
    },
}

/// Errors raised by the metrics collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MetricsError {
    /// `initialize` was called twice.
    #[error("already initialized")]
    AlreadyInitialized,

    /// The metrics were used before `initialize`.
    #[error("not initialized")]
    NotInitialized,

    /// The observer event has no timer in the catalog.
    #[error("unknown observer event: {event}")]
    UnknownObserverEvent {
        /// The event name that was looked up.
        event: String,
    },

    /// The data type has no item-count metric in the catalog.
    #[error("class not stored: {type_name}")]
    ClassNotStored {
        /// Display name of the type that was looked up.
        type_name: &'static str,
    },

    /// No rendered metric matches the lookup.
    #[error("unknown metric '{name}'")]
    UnknownMetric {
        /// The metric name that was looked up.
        name: String,
    },
}

/// Type alias for `Result<T, WindowError>`.
pub type Result<T> = std::result::Result<T, WindowError>;
