//! Immutable buckets produced by on-demand range queries.

use std::fmt;

use crate::bucket::{Bucket, BucketContents, BucketSummary, BucketType, counts_map};

/// A frozen, fully populated view of `[start, end]`.
///
/// Never accepts mutations. Equality compares the bounds only.
pub struct OnDemandBucket {
    contents: BucketContents,
    end_ns: u64,
}

impl OnDemandBucket {
    pub(crate) fn new(contents: BucketContents, end_ns: u64) -> Self {
        debug_assert!(!contents.is_mutation_allowed());
        Self { contents, end_ns }
    }

    /// Last instant covered, inclusive.
    pub fn end_ns(&self) -> u64 {
        self.end_ns
    }

    /// Serializable description of the bucket.
    pub fn summary(&self) -> BucketSummary {
        BucketSummary {
            bucket_type: self.bucket_type(),
            start_ns: self.start_ns(),
            end_ns: self.end_ns,
            status: None,
            counts: counts_map(&self.contents),
        }
    }
}

impl Bucket for OnDemandBucket {
    fn contents(&self) -> &BucketContents {
        &self.contents
    }

    fn bucket_type(&self) -> BucketType {
        BucketType::Tumbling
    }
}

impl PartialEq for OnDemandBucket {
    fn eq(&self, other: &Self) -> bool {
        self.start_ns() == other.start_ns() && self.end_ns == other.end_ns
    }
}

impl Eq for OnDemandBucket {}

impl fmt::Debug for OnDemandBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OnDemandBucket")
            .field("start_ns", &self.start_ns())
            .field("end_ns", &self.end_ns)
            .field("counts", &self.entry_counts())
            .finish()
    }
}

impl fmt::Display for OnDemandBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "OnDemandBucket(type={}, start={}, end={}, entriesPerDataClass=[",
            self.bucket_type(),
            self.start_ns(),
            self.end_ns
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
