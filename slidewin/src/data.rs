//! Typed, timestamped data containers.
//!
//! Each bucket holds one [`BucketData`] per registered data type. Types are
//! registered up front as [`DataType`] tokens; lookups by runtime type are
//! validated against that set and go through a type-erased container that is
//! downcast back to `BucketData<T>` by the generic accessors.
//!
//! # Ordering
//!
//! Entries are appended in insertion order and the timestamp is taken while
//! the container's write lock is held, so entry timestamps never decrease
//! within a container. Entries are never removed or reordered.

use std::any::{Any, TypeId};
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::clock::Clock;
use crate::error::{DataError, Result};
use crate::store::{ErasedStore, TimeOrderedStore};

/// Marker for values that can be stored in a window.
///
/// Blanket-implemented for every `Clone + Send + Sync + 'static` type.
pub trait WindowData: Clone + Send + Sync + 'static {}

impl<T: Clone + Send + Sync + 'static> WindowData for T {}

/// A value paired with the instant it was added.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimestampedData<T> {
    /// Insertion time in nanoseconds since the UNIX epoch.
    pub timestamp_ns: u64,
    /// The stored value.
    pub data: T,
}

impl<T> TimestampedData<T> {
    /// Pairs `data` with `timestamp_ns`.
    pub fn new(timestamp_ns: u64, data: T) -> Self {
        Self { timestamp_ns, data }
    }
}

/// Shared mutation-allowed flag of a bucket and its data containers.
#[derive(Debug)]
pub(crate) struct MutationFlag(AtomicBool);

impl MutationFlag {
    pub(crate) fn mutable() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(true)))
    }

    pub(crate) fn frozen() -> Arc<Self> {
        Arc::new(Self(AtomicBool::new(false)))
    }

    pub(crate) fn is_allowed(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }

    pub(crate) fn freeze(&self) {
        self.0.store(false, Ordering::Release);
    }
}

/// An append-only sequence of timestamped values of one type within one bucket.
///
/// Equality is identity: two containers are equal only if they are the same
/// instance.
pub struct BucketData<T> {
    flag: Arc<MutationFlag>,
    clock: Arc<dyn Clock>,
    entries: RwLock<Vec<TimestampedData<T>>>,
    /// Kept separately so `len()` never touches the entry lock.
    size: AtomicUsize,
}

impl<T: WindowData> BucketData<T> {
    pub(crate) fn new(flag: Arc<MutationFlag>, clock: Arc<dyn Clock>) -> Self {
        Self {
            flag,
            clock,
            entries: RwLock::new(Vec::new()),
            size: AtomicUsize::new(0),
        }
    }

    /// Appends `data`, timestamped now.
    ///
    /// # Errors
    ///
    /// Returns [`DataError::MutationsNoLongerAllowed`] if the owning bucket no
    /// longer accepts mutations.
    pub fn add(&self, data: T) -> Result<()> {
        if !self.is_mutation_allowed() {
            return Err(DataError::MutationsNoLongerAllowed.into());
        }
        self.add_unchecked(data);
        Ok(())
    }

    /// Appends without consulting the mutation flag. The caller guarantees the
    /// owning bucket is still current.
    pub(crate) fn add_unchecked(&self, data: T) {
        let mut entries = self.entries.write();
        entries.push(TimestampedData::new(self.clock.now_ns(), data));
        self.size.fetch_add(1, Ordering::Release);
    }

    /// Bulk append preserving input order. Only used while building immutable
    /// buckets.
    pub(crate) fn add_all(&self, data: Vec<TimestampedData<T>>) {
        let added = data.len();
        self.entries.write().extend(data);
        self.size.fetch_add(added, Ordering::Release);
    }

    /// Returns a snapshot copy of all entries in insertion order.
    pub fn entries(&self) -> Vec<TimestampedData<T>> {
        self.entries.read().clone()
    }

    /// Returns the stored values without timestamps, in insertion order.
    pub fn values(&self) -> Vec<T> {
        self.entries.read().iter().map(|e| e.data.clone()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.size.load(Ordering::Acquire)
    }

    /// Returns `true` if there are no entries.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Timestamp of the oldest entry.
    pub fn first_entry_timestamp(&self) -> Option<u64> {
        self.entries.read().first().map(|e| e.timestamp_ns)
    }

    /// Timestamp of the newest entry.
    pub fn last_entry_timestamp(&self) -> Option<u64> {
        self.entries.read().last().map(|e| e.timestamp_ns)
    }

    /// Whether the owning bucket still accepts mutations.
    pub fn is_mutation_allowed(&self) -> bool {
        self.flag.is_allowed()
    }
}

impl<T> PartialEq for BucketData<T> {
    fn eq(&self, other: &Self) -> bool {
        std::ptr::eq(self, other)
    }
}

impl<T> Eq for BucketData<T> {}

impl<T> fmt::Debug for BucketData<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BucketData")
            .field("len", &self.size.load(Ordering::Relaxed))
            .field("mutation_allowed", &self.flag.is_allowed())
            .finish()
    }
}

/// Type-erased view of a `BucketData<T>`.
pub(crate) trait ErasedBucketData: Send + Sync {
    fn as_any(&self) -> &dyn Any;
    fn len(&self) -> usize;
}

impl<T: WindowData> ErasedBucketData for BucketData<T> {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn len(&self) -> usize {
        BucketData::len(self)
    }
}

/// Token identifying a data type a window stores.
///
/// # Examples
///
/// ```rust
/// use slidewin::data::DataType;
///
/// let ty = DataType::of::<String>();
/// assert_eq!(ty.name(), "String");
/// assert!(ty.is::<String>());
/// assert!(!ty.is::<u32>());
/// ```
#[derive(Clone, Copy)]
pub struct DataType {
    id: TypeId,
    name: &'static str,
    new_bucket_data: fn(Arc<MutationFlag>, Arc<dyn Clock>) -> Box<dyn ErasedBucketData>,
    new_store: fn() -> Box<dyn ErasedStore>,
}

impl DataType {
    /// Returns the token for `T`.
    pub fn of<T: WindowData>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: short_type_name::<T>(),
            new_bucket_data: erased_bucket_data::<T>,
            new_store: erased_store::<T>,
        }
    }

    /// The runtime type identifier.
    pub fn id(&self) -> TypeId {
        self.id
    }

    /// Short display name, used as the `class` metric tag.
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Returns `true` if this token identifies `T`.
    pub fn is<T: 'static>(&self) -> bool {
        self.id == TypeId::of::<T>()
    }

    pub(crate) fn new_bucket_data(
        &self,
        flag: Arc<MutationFlag>,
        clock: Arc<dyn Clock>,
    ) -> Box<dyn ErasedBucketData> {
        (self.new_bucket_data)(flag, clock)
    }

    pub(crate) fn new_store(&self) -> Box<dyn ErasedStore> {
        (self.new_store)()
    }
}

impl PartialEq for DataType {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for DataType {}

impl Hash for DataType {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Debug for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DataType({})", self.name)
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name)
    }
}

fn erased_bucket_data<T: WindowData>(
    flag: Arc<MutationFlag>,
    clock: Arc<dyn Clock>,
) -> Box<dyn ErasedBucketData> {
    Box::new(BucketData::<T>::new(flag, clock))
}

fn erased_store<T: WindowData>() -> Box<dyn ErasedStore> {
    Box::new(TimeOrderedStore::<T>::new())
}

/// Returns the last path segment of `T`'s type name, without generics.
pub(crate) fn short_type_name<T: ?Sized>() -> &'static str {
    let full = std::any::type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}
