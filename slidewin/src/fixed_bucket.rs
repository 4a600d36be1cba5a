//! Buckets of a fixed tumbling window.
//!
//! A [`FixedTumblingBucket`] starts out current and transitions exactly once
//! to non-current when [`end`](FixedTumblingBucket::end) is called. Ending
//! records the actual end instant and duration and freezes every data
//! container of the bucket.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bucket::{Bucket, BucketContents, BucketStatus, BucketSummary, BucketType, counts_map};
use crate::clock::{Clock, ns_to_ms};
use crate::data::{DataType, MutationFlag};
use crate::error::{DataError, Result};

/// When and after how long a bucket actually ended.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EndInfo {
    /// Instant `end()` ran, in nanoseconds since the epoch.
    pub actual_end_ns: u64,
    /// `actual_end - start`, in milliseconds.
    pub duration_ms: f64,
}

/// One slice of a fixed tumbling window.
pub struct FixedTumblingBucket {
    id: u64,
    contents: BucketContents,
    scheduled_end_ns: u64,
    end_info: Mutex<Option<EndInfo>>,
    clock: Arc<dyn Clock>,
}

impl FixedTumblingBucket {
    /// Creates a current bucket covering `[start, start + bucket_length - 1ns]`.
    pub(crate) fn new(
        id: u64,
        start_ns: u64,
        bucket_length_ns: u64,
        data_types: &[DataType],
        clock: Arc<dyn Clock>,
    ) -> Self {
        let contents = BucketContents::new(start_ns, data_types, MutationFlag::mutable(), &clock);
        Self {
            id,
            contents,
            scheduled_end_ns: (start_ns + bucket_length_ns).saturating_sub(1),
            end_info: Mutex::new(None),
            clock,
        }
    }

    /// Window-local identifier, carried by the scheduled end task.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Instant the bucket is scheduled to end.
    pub fn scheduled_end_ns(&self) -> u64 {
        self.scheduled_end_ns
    }

    /// Actual end information, once the bucket has ended.
    pub fn end_info(&self) -> Option<EndInfo> {
        *self.end_info.lock()
    }

    /// Current lifecycle state.
    pub fn status(&self) -> BucketStatus {
        if self.end_info.lock().is_some() {
            BucketStatus::NonCurrent
        } else {
            BucketStatus::Current
        }
    }

    /// Returns `true` while the bucket accepts writes.
    pub fn is_current(&self) -> bool {
        self.status() == BucketStatus::Current
    }

    /// Ends the bucket now.
    ///
    /// Only one caller can succeed; the transition is serialized on the
    /// bucket's own lock.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::AlreadyEnded`] if the bucket is already non-current.
    pub fn end(&self) -> Result<EndInfo> {
        let mut end_info = self.end_info.lock();
        if end_info.is_some() {
            return Err(DataError::AlreadyEnded.into());
        }
        let actual_end_ns = self.clock.now_ns();
        let info = EndInfo {
            actual_end_ns,
            duration_ms: ns_to_ms(actual_end_ns.saturating_sub(self.start_ns())),
        };
        self.contents.flag().freeze();
        *end_info = Some(info);
        Ok(info)
    }

    /// Serializable description of the bucket.
    pub fn summary(&self) -> BucketSummary {
        let end_info = self.end_info();
        BucketSummary {
            bucket_type: self.bucket_type(),
            start_ns: self.start_ns(),
            end_ns: end_info.map_or(self.scheduled_end_ns, |e| e.actual_end_ns),
            status: Some(if end_info.is_some() {
                BucketStatus::NonCurrent
            } else {
                BucketStatus::Current
            }),
            counts: counts_map(&self.contents),
        }
    }
}

impl Bucket for FixedTumblingBucket {
    fn contents(&self) -> &BucketContents {
        &self.contents
    }

    fn bucket_type(&self) -> BucketType {
        BucketType::Tumbling
    }
}

impl PartialEq for FixedTumblingBucket {
    fn eq(&self, other: &Self) -> bool {
        self.start_ns() == other.start_ns() && self.scheduled_end_ns == other.scheduled_end_ns
    }
}

impl Eq for FixedTumblingBucket {}

impl fmt::Debug for FixedTumblingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FixedTumblingBucket")
            .field("id", &self.id)
            .field("start_ns", &self.start_ns())
            .field("scheduled_end_ns", &self.scheduled_end_ns)
            .field("end_info", &self.end_info())
            .field("counts", &self.entry_counts())
            .finish()
    }
}

impl fmt::Display for FixedTumblingBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "FixedTumblingBucket(status={}, type={}, start={}, ",
            self.status(),
            self.bucket_type(),
            self.start_ns()
        )?;
        match self.end_info() {
            Some(info) => write!(
                f,
                "actualEnd={}, durationMs={:.3}, ",
                info.actual_end_ns, info.duration_ms
            )?,
            None => write!(f, "scheduledEnd={}, ", self.scheduled_end_ns)?,
        }
        write!(
            f,
            "isMutationAllowed={}, entriesPerDataClass=[",
            self.is_mutation_allowed()
        )?;
        for (i, (name, count)) in self.entry_counts().into_iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}={count}")?;
        }
        f.write_str("])")
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::clock::ManualClock;
    use crate::error::WindowError;

    const MS: u64 = 1_000_000;

    fn bucket(clock: &Arc<ManualClock>) -> FixedTumblingBucket {
        FixedTumblingBucket::new(
            1,
            clock.now_ns(),
            1_000 * MS,
            &[DataType::of::<String>()],
            Arc::clone(clock) as Arc<dyn Clock>,
        )
    }

    #[test]
    fn test_scheduled_end_is_inclusive() {
        let clock = Arc::new(ManualClock::new(5_000 * MS));
        let b = bucket(&clock);
        assert_eq!(b.scheduled_end_ns(), 6_000 * MS - 1);
        assert_eq!(b.status(), BucketStatus::Current);
        assert!(b.end_info().is_none());
    }

    #[test]
    fn test_end_records_duration_and_freezes() {
        let clock = Arc::new(ManualClock::new(5_000 * MS));
        let b = bucket(&clock);
        b.data::<String>().unwrap().add("x".into()).unwrap();

        clock.advance(Duration::from_millis(1_001));
        let info = b.end().unwrap();

        assert_eq!(info.actual_end_ns, 6_001 * MS);
        assert!((info.duration_ms - 1_001.0).abs() < 1e-9);
        assert_eq!(b.status(), BucketStatus::NonCurrent);
        assert!(!b.is_mutation_allowed());

        let err = b.data::<String>().unwrap().add("y".into()).unwrap_err();
        assert!(matches!(
            err,
            WindowError::Data(DataError::MutationsNoLongerAllowed)
        ));
        assert_eq!(b.data::<String>().unwrap().len(), 1);
    }

    #[test]
    fn test_end_twice_fails() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bucket(&clock);
        b.end().unwrap();
        assert!(matches!(
            b.end().unwrap_err(),
            WindowError::Data(DataError::AlreadyEnded)
        ));
    }

    #[test]
    fn test_only_one_concurrent_end_succeeds() {
        let clock = Arc::new(ManualClock::new(0));
        let b = Arc::new(bucket(&clock));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = Arc::clone(&b);
                std::thread::spawn(move || b.end().is_ok())
            })
            .collect();
        let successes = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|ok| *ok)
            .count();
        assert_eq!(successes, 1);
    }

    #[test]
    fn test_equality_by_bounds() {
        let clock = Arc::new(ManualClock::new(100));
        let a = bucket(&clock);
        let b = FixedTumblingBucket::new(
            99,
            100,
            1_000 * MS,
            &[DataType::of::<u8>()],
            Arc::clone(&clock) as Arc<dyn Clock>,
        );
        assert_eq!(a, b);

        clock.set(200);
        assert_ne!(a, bucket(&clock));
    }

    #[test]
    fn test_display() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bucket(&clock);
        b.data::<String>().unwrap().add("x".into()).unwrap();

        let text = b.to_string();
        assert!(text.starts_with("FixedTumblingBucket(status=CURRENT, type=TUMBLING, start=0, "));
        assert!(text.contains("scheduledEnd=999999999"));
        assert!(text.ends_with("isMutationAllowed=true, entriesPerDataClass=[String=1])"));
    }

    #[test]
    fn test_summary_uses_actual_end_once_ended() {
        let clock = Arc::new(ManualClock::new(0));
        let b = bucket(&clock);
        assert_eq!(b.summary().end_ns, 1_000 * MS - 1);

        clock.set(900 * MS);
        b.end().unwrap();
        let summary = b.summary();
        assert_eq!(summary.end_ns, 900 * MS);
        assert_eq!(summary.status, Some(BucketStatus::NonCurrent));
    }
}
