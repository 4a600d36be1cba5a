//! # slidewin
//!
//! In-memory, time-bounded data retention with tumbling buckets.
//!
//! slidewin keeps only the data that falls inside a rolling time window and
//! partitions it into discrete time buckets. Writers append typed values
//! concurrently; readers get point-in-time snapshots that never observe a
//! half-rotated window.
//!
//! ## Strategies
//!
//! - [`FixedTumblingWindow`]: one mutable current bucket, rotated on a fixed
//!   schedule, plus a bounded FIFO of frozen historical buckets.
//! - [`OnDemandWindow`]: all recent data in a flat time-ordered store, evicted
//!   periodically, bucketed only when queried.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use slidewin::{DataType, FixedTumblingConfig, FixedTumblingWindow, WindowConfig};
//! use std::time::Duration;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Keep 3 seconds of history in 1 second buckets
//! let window = WindowConfig::new(
//!     "requests",
//!     Duration::from_secs(3),
//!     vec![DataType::of::<String>()],
//! )?;
//! let window = FixedTumblingWindow::new(FixedTumblingConfig::new(window, Duration::from_secs(1))?)?;
//! window.start()?;
//!
//! window.add_data("GET /".to_string())?;
//!
//! for bucket in window.non_current_buckets()? {
//!     println!("{bucket}");
//! }
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`config`]: Window configuration, validation and JSON settings
//! - [`fixed_window`] / [`fixed_bucket`]: Fixed tumbling strategy
//! - [`on_demand_window`] / [`on_demand_bucket`]: On-demand strategy
//! - [`query`]: Range arithmetic for on-demand queries
//! - [`bucket`] / [`data`]: Bucket contract and typed data containers
//! - [`observer`]: Lifecycle event dispatch
//! - [`schedule`]: Scheduling collaborators
//! - [`metrics`]: Metrics collaborator and backends
//! - [`clock`]: Time sources
//! - [`registry`]: Window name registry
//! - [`error`]: Error types

pub mod bucket;
pub mod clock;
pub mod config;
pub mod data;
pub mod error;
pub mod fixed_bucket;
pub mod fixed_window;
pub mod metrics;
pub mod observer;
pub mod on_demand_bucket;
pub mod on_demand_window;
pub mod query;
pub mod registry;
pub mod schedule;
mod store;

pub use bucket::{Bucket, BucketStatus, BucketSummary, BucketType};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    FixedTumblingConfig, OnDemandConfig, StrategySettings, WindowConfig, WindowSettings,
};
pub use data::{BucketData, DataType, TimestampedData, WindowData};
pub use error::{Result, WindowError};
pub use fixed_bucket::{EndInfo, FixedTumblingBucket};
pub use fixed_window::{FixedTumblingObserver, FixedTumblingPayload, FixedTumblingWindow};
pub use metrics::{InMemoryMetrics, Metrics, MetricsBackend, NoOpMetrics};
pub use observer::{Dispatch, FixedTumblingEvent, ObserverId, OnDemandEvent};
pub use on_demand_bucket::OnDemandBucket;
pub use on_demand_window::{MaintenanceReport, OnDemandObserver, OnDemandWindow};
pub use query::TumblingQuery;
pub use registry::WindowNameRegistry;
pub use schedule::{DefaultTaskScheduler, ManualTaskScheduler, TaskScheduler};
