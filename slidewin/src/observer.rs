//! Lifecycle event fan-out.
//!
//! A [`Subject`] holds the observers registered on a window. Notifications
//! run either synchronously, in registration order on the caller's thread, or
//! asynchronously, each observer submitted as its own task to the window's
//! [`TaskScheduler`]. The observer list is cloned under a read lock and the
//! lock is released before any observer runs, so observers may register or
//! remove observers themselves. A panicking observer is logged and skipped;
//! it neither reaches the emitter nor stops delivery to the others.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::error;

use crate::schedule::TaskScheduler;

/// An event a window can emit.
pub trait ObserverEvent: Copy + fmt::Debug + Send + Sync + 'static {
    /// Metric tag value and log name of the event.
    fn name(&self) -> &'static str;

    /// Every event of this kind, used to render one timer per event.
    fn all() -> &'static [Self];
}

/// Events emitted by a fixed tumbling window.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FixedTumblingEvent {
    /// A new current bucket has been created. Payload: the new bucket.
    CurrentBucketStarted,
    /// The current bucket is about to end. Payload: the ending bucket.
    CurrentBucketEnding,
    /// The retained non-current buckets changed. Payload: all of them.
    NonCurrentBucketsUpdated,
    /// The oldest non-current bucket has been evicted. Fires after the
    /// rotation that dropped it, so the bucket is no longer in the window and
    /// the payload is the last handle to it. Payload: that bucket.
    NonCurrentBucketRemoving,
}

impl ObserverEvent for FixedTumblingEvent {
    fn name(&self) -> &'static str {
        match self {
            Self::CurrentBucketStarted => "current_bucket_started",
            Self::CurrentBucketEnding => "current_bucket_ending",
            Self::NonCurrentBucketsUpdated => "non_current_buckets_updated",
            Self::NonCurrentBucketRemoving => "non_current_bucket_removing",
        }
    }

    fn all() -> &'static [Self] {
        &[
            Self::CurrentBucketStarted,
            Self::CurrentBucketEnding,
            Self::NonCurrentBucketsUpdated,
            Self::NonCurrentBucketRemoving,
        ]
    }
}

/// Events emitted by an on-demand window. There are none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OnDemandEvent {}

impl ObserverEvent for OnDemandEvent {
    fn name(&self) -> &'static str {
        match *self {}
    }

    fn all() -> &'static [Self] {
        &[]
    }
}

/// How a notification reaches observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// In registration order on the caller's thread; the caller waits.
    Sync,
    /// Each observer submitted independently to the scheduler; no ordering
    /// between observers and no error propagation to the emitter.
    Async,
}

/// Handle returned by [`Subject::add_observer`], used to remove the observer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObserverId(u64);

/// A registered callback.
pub type Observer<E, D> = Arc<dyn Fn(E, &D) + Send + Sync>;

/// Registered observers of one window.
pub struct Subject<E, D> {
    observers: RwLock<Vec<(ObserverId, Observer<E, D>)>>,
    next_id: AtomicU64,
    scheduler: Arc<dyn TaskScheduler>,
}

impl<E: ObserverEvent, D: Send + Sync + 'static> Subject<E, D> {
    /// Creates a subject whose async notifications go to `scheduler`.
    pub fn new(scheduler: Arc<dyn TaskScheduler>) -> Self {
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(0),
            scheduler,
        }
    }

    /// Registers `observer` and returns its handle.
    pub fn add_observer(&self, observer: Observer<E, D>) -> ObserverId {
        let id = ObserverId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((id, observer));
        id
    }

    /// Removes the observer registered under `id`. Returns `true` if it existed.
    pub fn remove_observer(&self, id: ObserverId) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(existing, _)| *existing != id);
        observers.len() != before
    }

    /// Number of registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Delivers `event` with `payload` to every registered observer.
    pub fn notify_observers(&self, event: E, payload: D, dispatch: Dispatch) {
        let observers: Vec<Observer<E, D>> = self
            .observers
            .read()
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();

        match dispatch {
            Dispatch::Sync => {
                for observer in observers {
                    deliver(&observer, event, &payload);
                }
            }
            Dispatch::Async => {
                let payload = Arc::new(payload);
                for observer in observers {
                    let payload = Arc::clone(&payload);
                    self.scheduler
                        .execute(Box::new(move || deliver(&observer, event, &payload)));
                }
            }
        }
    }
}

fn deliver<E: ObserverEvent, D>(observer: &Observer<E, D>, event: E, payload: &D) {
    if panic::catch_unwind(AssertUnwindSafe(|| observer(event, payload))).is_err() {
        error!(event = event.name(), "observer panicked");
    }
}

impl<E, D> fmt::Debug for Subject<E, D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subject")
            .field("observers", &self.observers.read().len())
            .finish_non_exhaustive()
    }
}
