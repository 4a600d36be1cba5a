//! Range arithmetic for on-demand tumbling bucket queries.
//!
//! A [`TumblingQuery`] carries the optional arguments a caller supplies. It is
//! resolved against the current time and the window length into a validated
//! [`TumblingRange`], which partitions `[start, start + length)` into
//! contiguous, boundary-inclusive sub-ranges `[s, s + bucket_length - 1ns]`.
//!
//! # Example
//!
//! ```rust
//! use slidewin::query::TumblingQuery;
//! use std::time::Duration;
//!
//! let query = TumblingQuery::new()
//!     .start_ns(1_000)
//!     .length(Duration::from_secs(3))
//!     .bucket_length(Duration::from_secs(1));
//! assert_eq!(query.start_ns, Some(1_000));
//! ```

use std::time::Duration;

use crate::clock::duration_ns;
use crate::data::TimestampedData;
use crate::error::{QueryError, Result};

/// Optional arguments of an on-demand tumbling bucket query.
///
/// Unset fields default to: `start = now - window length`,
/// `length = window length`, `bucket_length = window length`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TumblingQuery {
    /// First instant covered, in nanoseconds since the epoch.
    pub start_ns: Option<u64>,
    /// Total span covered by the returned buckets.
    pub length: Option<Duration>,
    /// Span of each returned bucket.
    pub bucket_length: Option<Duration>,
}

impl TumblingQuery {
    /// A query using every default.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the start instant.
    #[must_use]
    pub fn start_ns(mut self, start_ns: u64) -> Self {
        self.start_ns = Some(start_ns);
        self
    }

    /// Sets the total length.
    #[must_use]
    pub fn length(mut self, length: Duration) -> Self {
        self.length = Some(length);
        self
    }

    /// Sets the bucket length.
    #[must_use]
    pub fn bucket_length(mut self, bucket_length: Duration) -> Self {
        self.bucket_length = Some(bucket_length);
        self
    }

    /// Applies defaults and validates the query.
    ///
    /// Checks run in a fixed order and the first violation is reported.
    ///
    /// # Errors
    ///
    /// Returns the matching [`QueryError`] variant for the first violated rule.
    pub fn resolve(&self, now_ns: u64, window_length: Duration) -> Result<TumblingRange> {
        let window_ns = duration_ns(window_length);
        let horizon_ns = now_ns.saturating_sub(window_ns);

        let start_ns = self.start_ns.unwrap_or(horizon_ns);
        let length_ns = duration_ns(self.length.unwrap_or(window_length));
        let bucket_length_ns = duration_ns(self.bucket_length.unwrap_or(window_length));

        if length_ns == 0 {
            return Err(QueryError::LengthNotPositive.into());
        }
        if bucket_length_ns == 0 {
            return Err(QueryError::BucketLengthNotPositive.into());
        }
        if start_ns > now_ns {
            return Err(QueryError::StartInFuture.into());
        }
        if start_ns < horizon_ns {
            return Err(QueryError::StartTooEarly.into());
        }
        match start_ns.checked_add(length_ns) {
            Some(end) if end <= now_ns => {}
            _ => return Err(QueryError::EndInFuture.into()),
        }
        if bucket_length_ns > length_ns {
            return Err(QueryError::LengthLessThanBucketLength.into());
        }
        if length_ns % bucket_length_ns != 0 {
            return Err(QueryError::LengthNotMultiple.into());
        }

        Ok(TumblingRange {
            start_ns,
            length_ns,
            bucket_length_ns,
        })
    }
}

/// A validated query range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TumblingRange {
    start_ns: u64,
    length_ns: u64,
    bucket_length_ns: u64,
}

impl TumblingRange {
    /// First instant covered.
    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    /// Outer inclusive bound used for the first filtering pass: `start + length`.
    pub fn end_ns(&self) -> u64 {
        self.start_ns + self.length_ns
    }

    /// Total length in nanoseconds.
    pub fn length_ns(&self) -> u64 {
        self.length_ns
    }

    /// Bucket length in nanoseconds.
    pub fn bucket_length_ns(&self) -> u64 {
        self.bucket_length_ns
    }

    /// Number of buckets the range partitions into.
    pub fn bucket_count(&self) -> u64 {
        self.length_ns / self.bucket_length_ns
    }

    /// Inclusive `(start, end)` bounds of each bucket, in chronological order.
    pub fn bucket_bounds(&self) -> impl Iterator<Item = (u64, u64)> + '_ {
        (0..self.bucket_count()).map(move |i| {
            let start = self.start_ns + i * self.bucket_length_ns;
            (start, start + self.bucket_length_ns - 1)
        })
    }
}

/// Returns the sub-slice of `entries` whose timestamps fall in
/// `[from_ns, to_ns]`.
///
/// `entries` must be sorted by timestamp. Both ends are located by binary
/// search.
pub fn filter_range<T>(
    entries: &[TimestampedData<T>],
    from_ns: u64,
    to_ns: u64,
) -> &[TimestampedData<T>] {
    let lower = entries.partition_point(|e| e.timestamp_ns < from_ns);
    let upper = entries.partition_point(|e| e.timestamp_ns <= to_ns);
    if lower >= upper {
        return &[];
    }
    &entries[lower..upper]
}
