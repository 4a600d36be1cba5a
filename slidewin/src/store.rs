//! Time-ordered per-type storage for on-demand windows.
//!
//! An on-demand window keeps one [`TimeOrderedStore`] per registered type.
//! Entries are keyed by `(timestamp, sequence)` so that values added at the
//! same instant keep their insertion order and never overwrite each other.
//! Maintenance evicts everything older than the retention horizon; queries
//! snapshot the store and slice it into immutable buckets.

use std::any::Any;
use std::collections::BTreeMap;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::clock::Clock;
use crate::data::{BucketData, ErasedBucketData, MutationFlag, TimestampedData, WindowData};
use crate::query::{TumblingRange, filter_range};

/// Ordering key: timestamp first, insertion sequence as tie-breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct EntryKey {
    pub(crate) timestamp_ns: u64,
    pub(crate) seq: u64,
}

/// Entries of one data type ordered by insertion time.
#[derive(Debug)]
pub(crate) struct TimeOrderedStore<T> {
    entries: RwLock<BTreeMap<EntryKey, T>>,
}

impl<T: WindowData> TimeOrderedStore<T> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
        }
    }

    pub(crate) fn insert(&self, timestamp_ns: u64, seq: u64, value: T) {
        self.entries
            .write()
            .insert(EntryKey { timestamp_ns, seq }, value);
    }

    /// Copies every entry in timestamp order.
    pub(crate) fn snapshot(&self) -> Vec<TimestampedData<T>> {
        self.entries
            .read()
            .iter()
            .map(|(key, value)| TimestampedData::new(key.timestamp_ns, value.clone()))
            .collect()
    }

    /// Copies the entries with timestamps in `[from_ns, to_ns]`.
    pub(crate) fn range_snapshot(&self, from_ns: u64, to_ns: u64) -> Vec<TimestampedData<T>> {
        if from_ns > to_ns {
            return Vec::new();
        }
        let lower = EntryKey {
            timestamp_ns: from_ns,
            seq: 0,
        };
        let upper = EntryKey {
            timestamp_ns: to_ns,
            seq: u64::MAX,
        };
        self.entries
            .read()
            .range(lower..=upper)
            .map(|(key, value)| TimestampedData::new(key.timestamp_ns, value.clone()))
            .collect()
    }
}

/// Type-erased view of a `TimeOrderedStore<T>`.
pub(crate) trait ErasedStore: Send + Sync {
    fn as_any(&self) -> &dyn Any;

    fn len(&self) -> usize;

    /// Drops every entry with a timestamp strictly before `cutoff_ns`.
    /// Returns the number of entries removed.
    fn evict_before(&self, cutoff_ns: u64) -> usize;

    /// Builds one immutable container per bucket of `range`, in chronological
    /// order.
    fn tumbling_slices(
        &self,
        range: &TumblingRange,
        flag: &Arc<MutationFlag>,
        clock: &Arc<dyn Clock>,
    ) -> Vec<Box<dyn ErasedBucketData>>;
}

impl<T: WindowData> ErasedStore for TimeOrderedStore<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn len(&self) -> usize {
        self.entries.read().len()
    }

    fn evict_before(&self, cutoff_ns: u64) -> usize {
        let mut entries = self.entries.write();
        let mut removed = 0;
        while let Some(entry) = entries.first_entry() {
            if entry.key().timestamp_ns >= cutoff_ns {
                break;
            }
            entry.remove();
            removed += 1;
        }
        removed
    }

    fn tumbling_slices(
        &self,
        range: &TumblingRange,
        flag: &Arc<MutationFlag>,
        clock: &Arc<dyn Clock>,
    ) -> Vec<Box<dyn ErasedBucketData>> {
        let in_range = self.range_snapshot(range.start_ns(), range.end_ns());

        range
            .bucket_bounds()
            .map(|(from, to)| {
                let data = BucketData::<T>::new(Arc::clone(flag), Arc::clone(clock));
                data.add_all(filter_range(&in_range, from, to).to_vec());
                Box::new(data) as Box<dyn ErasedBucketData>
            })
            .collect()
    }
}
