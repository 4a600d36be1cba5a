//! The bucket contract shared by both windowing strategies.
//!
//! A bucket is one time slice holding a [`BucketData`] container per
//! registered data type. Concrete forms are
//! [`FixedTumblingBucket`](crate::fixed_bucket::FixedTumblingBucket), which is
//! mutable while current, and
//! [`OnDemandBucket`](crate::on_demand_bucket::OnDemandBucket), which is always
//! frozen.

use std::any::TypeId;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::data::{BucketData, DataType, ErasedBucketData, MutationFlag, WindowData, short_type_name};
use crate::error::{DataError, Result};

/// The kind of time slicing a bucket belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketType {
    /// Non-overlapping, fixed-width, sequential slices.
    Tumbling,
}

impl fmt::Display for BucketType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tumbling => f.write_str("TUMBLING"),
        }
    }
}

/// Lifecycle state of a fixed tumbling bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BucketStatus {
    /// Accepting writes.
    Current,
    /// Ended and frozen.
    NonCurrent,
}

impl fmt::Display for BucketStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Current => f.write_str("CURRENT"),
            Self::NonCurrent => f.write_str("NON_CURRENT"),
        }
    }
}

/// Storage shared by every bucket form: a start instant, one container per
/// registered type, and the mutation flag those containers consult.
pub struct BucketContents {
    start_ns: u64,
    data_types: Vec<DataType>,
    data: HashMap<TypeId, Box<dyn ErasedBucketData>>,
    flag: Arc<MutationFlag>,
}

impl BucketContents {
    /// Creates one empty container per type.
    pub(crate) fn new(
        start_ns: u64,
        data_types: &[DataType],
        flag: Arc<MutationFlag>,
        clock: &Arc<dyn Clock>,
    ) -> Self {
        let data = data_types
            .iter()
            .map(|dt| (dt.id(), dt.new_bucket_data(Arc::clone(&flag), Arc::clone(clock))))
            .collect();
        Self {
            start_ns,
            data_types: data_types.to_vec(),
            data,
            flag,
        }
    }

    /// Wraps containers that were already populated.
    pub(crate) fn from_parts(
        start_ns: u64,
        data_types: &[DataType],
        data: HashMap<TypeId, Box<dyn ErasedBucketData>>,
        flag: Arc<MutationFlag>,
    ) -> Self {
        Self {
            start_ns,
            data_types: data_types.to_vec(),
            data,
            flag,
        }
    }

    /// Start instant in nanoseconds since the epoch.
    pub fn start_ns(&self) -> u64 {
        self.start_ns
    }

    /// Registered data types, in configuration order.
    pub fn data_types(&self) -> &[DataType] {
        &self.data_types
    }

    /// Whether the containers still accept mutations.
    pub fn is_mutation_allowed(&self) -> bool {
        self.flag.is_allowed()
    }

    pub(crate) fn flag(&self) -> &Arc<MutationFlag> {
        &self.flag
    }

    /// Returns the container for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::ClassNotStored`] if `T` is not a registered type.
    pub fn data<T: WindowData>(&self) -> Result<&BucketData<T>> {
        self.data
            .get(&TypeId::of::<T>())
            .and_then(|erased| erased.as_any().downcast_ref::<BucketData<T>>())
            .ok_or_else(|| {
                DataError::ClassNotStored {
                    type_name: short_type_name::<T>(),
                }
                .into()
            })
    }

    /// Number of entries stored for `data_type`, or `None` if it is not registered.
    pub fn item_count(&self, data_type: &DataType) -> Option<usize> {
        self.data.get(&data_type.id()).map(|d| d.len())
    }

    /// Entry counts per type name, in configuration order.
    pub fn counts(&self) -> Vec<(&'static str, usize)> {
        self.data_types
            .iter()
            .map(|dt| (dt.name(), self.item_count(dt).unwrap_or(0)))
            .collect()
    }
}

impl fmt::Debug for BucketContents {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketContents")
            .field("start_ns", &self.start_ns)
            .field("mutation_allowed", &self.is_mutation_allowed())
            .field("counts", &self.counts())
            .finish()
    }
}

/// Common contract of a time-sliced container of per-type data.
pub trait Bucket {
    /// Shared storage of this bucket.
    fn contents(&self) -> &BucketContents;

    /// The slicing strategy this bucket belongs to.
    fn bucket_type(&self) -> BucketType;

    /// Start instant in nanoseconds since the epoch.
    fn start_ns(&self) -> u64 {
        self.contents().start_ns()
    }

    /// Whether data may still be added.
    fn is_mutation_allowed(&self) -> bool {
        self.contents().is_mutation_allowed()
    }

    /// Returns the container for `T`.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::ClassNotStored`] if `T` is not a registered type.
    fn data<T: WindowData>(&self) -> Result<&BucketData<T>>
    where
        Self: Sized,
    {
        self.contents().data::<T>()
    }

    /// Entry counts per type name.
    fn entry_counts(&self) -> Vec<(&'static str, usize)> {
        self.contents().counts()
    }
}

/// Serializable point-in-time description of a bucket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    /// Slicing strategy.
    pub bucket_type: BucketType,
    /// Start instant in nanoseconds since the epoch.
    pub start_ns: u64,
    /// Actual end if the bucket has ended, otherwise the scheduled end.
    pub end_ns: u64,
    /// Lifecycle state, for buckets that have one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<BucketStatus>,
    /// Entry count per type name.
    pub counts: BTreeMap<String, usize>,
}

pub(crate) fn counts_map(contents: &BucketContents) -> BTreeMap<String, usize> {
    contents
        .counts()
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::error::WindowError;

    struct Plain(BucketContents);

    impl Bucket for Plain {
        fn contents(&self) -> &BucketContents {
            &self.0
        }

        fn bucket_type(&self) -> BucketType {
            BucketType::Tumbling
        }
    }

    fn plain(flag: Arc<MutationFlag>) -> Plain {
        let clock: Arc<dyn Clock> = Arc::new(ManualClock::new(42));
        Plain(BucketContents::new(
            7,
            &[DataType::of::<String>(), DataType::of::<u32>()],
            flag,
            &clock,
        ))
    }

    #[test]
    fn test_typed_access() {
        let bucket = plain(MutationFlag::mutable());
        bucket.data::<String>().unwrap().add("a".to_string()).unwrap();
        bucket.data::<u32>().unwrap().add(1).unwrap();
        bucket.data::<u32>().unwrap().add(2).unwrap();

        assert_eq!(bucket.start_ns(), 7);
        assert_eq!(bucket.entry_counts(), vec![("String", 1), ("u32", 2)]);
        assert_eq!(bucket.data::<u32>().unwrap().entries()[0].timestamp_ns, 42);
    }

    #[test]
    fn test_unregistered_type_rejected() {
        let bucket = plain(MutationFlag::mutable());
        let err = bucket.data::<i64>().unwrap_err();
        assert!(matches!(
            err,
            WindowError::Data(DataError::ClassNotStored { type_name: "i64" })
        ));
    }

    #[test]
    fn test_frozen_bucket_rejects_mutation() {
        let flag = MutationFlag::mutable();
        let bucket = plain(Arc::clone(&flag));
        assert!(bucket.is_mutation_allowed());

        flag.freeze();
        assert!(!bucket.is_mutation_allowed());
        assert!(bucket.data::<u32>().unwrap().add(1).is_err());
    }

    #[test]
    fn test_summary_serializes() {
        let bucket = plain(MutationFlag::mutable());
        bucket.data::<u32>().unwrap().add(9).unwrap();

        let summary = BucketSummary {
            bucket_type: bucket.bucket_type(),
            start_ns: bucket.start_ns(),
            end_ns: 10,
            status: Some(BucketStatus::Current),
            counts: counts_map(bucket.contents()),
        };
        let json = serde_json::to_string(&summary).unwrap();
        assert!(json.contains("\"bucket_type\":\"tumbling\""));
        assert!(json.contains("\"status\":\"current\""));
        assert!(json.contains("\"u32\":1"));

        let back: BucketSummary = serde_json::from_str(&json).unwrap();
        assert_eq!(back, summary);
    }
}
