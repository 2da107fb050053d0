//! Bucket records and their open/closed lifecycle
//!
//! A `Bucket` is the unit the catalog hands to persistence. While open it is
//! exclusively owned by its catalog slot and mutated only under that slot's
//! lock; once closed it is immutable and travels by value.
use crate::types::{BucketId, GroupingKey, Measurement, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a bucket
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BucketState {
    /// Accepting measurements
    Open,
    /// Finalized and handed to persistence
    Closed,
}

/// Why a bucket was closed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CloseReason {
    /// An incoming measurement fell outside the live max span
    TimeSpan,
    /// The bucket reached the configured measurement limit
    Count,
    /// The collection was flushed
    Flush,
}

impl CloseReason {
    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            CloseReason::TimeSpan => "time_span",
            CloseReason::Count => "count",
            CloseReason::Flush => "flush",
        }
    }
}

impl fmt::Display for CloseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A group of measurements sharing a grouping key
///
/// `min_time` is the time of the first measurement placed into the bucket
/// and never changes afterwards. `max_time` tracks the largest accepted
/// timestamp.
///
/// # Example
///
/// ```
/// use kuba_buckets::bucket::{Bucket, BucketState};
/// use kuba_buckets::types::{GroupingKey, Measurement};
///
/// let bucket = Bucket::from_measurements(
///     "weather",
///     vec![
///         Measurement::new(GroupingKey::Global, 1_000),
///         Measurement::new(GroupingKey::Global, 5_000),
///     ],
/// )
/// .unwrap();
///
/// assert_eq!(bucket.time_range(), (1_000, 5_000));
/// assert_eq!(bucket.count(), 2);
/// assert_eq!(bucket.state(), BucketState::Open);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    id: BucketId,
    collection: String,
    /// Catalog generation the bucket was opened in; 0 when untracked
    #[serde(default)]
    generation: u64,
    key: GroupingKey,
    min_time: Timestamp,
    max_time: Timestamp,
    count: u32,
    state: BucketState,
    close_reason: Option<CloseReason>,
    measurements: Vec<Measurement>,
}

impl Bucket {
    /// Create an empty open bucket anchored at `anchor`
    ///
    /// The bucket holds no measurements yet; callers absorb the anchoring
    /// measurement before publishing it.
    pub(crate) fn anchored(
        id: BucketId,
        collection: impl Into<String>,
        generation: u64,
        key: GroupingKey,
        anchor: Timestamp,
    ) -> Self {
        Self {
            id,
            collection: collection.into(),
            generation,
            key,
            min_time: anchor,
            max_time: anchor,
            count: 0,
            state: BucketState::Open,
            close_reason: None,
            measurements: Vec::new(),
        }
    }

    /// Build an open bucket from a sequence of measurements
    ///
    /// The first measurement anchors the bucket. Returns `None` for an empty
    /// input. No span check is performed. The bucket belongs to no catalog
    /// generation.
    pub fn from_measurements(
        collection: impl Into<String>,
        measurements: Vec<Measurement>,
    ) -> Option<Self> {
        let mut iter = measurements.into_iter();
        let first = iter.next()?;
        let mut bucket = Self::anchored(
            BucketId::next(),
            collection,
            0,
            first.key.clone(),
            first.timestamp,
        );
        bucket.absorb(first);
        for m in iter {
            bucket.absorb(m);
        }
        Some(bucket)
    }

    /// Place a measurement into this bucket
    pub(crate) fn absorb(&mut self, measurement: Measurement) {
        debug_assert_eq!(self.state, BucketState::Open, "absorb into closed bucket");
        if measurement.timestamp > self.max_time {
            self.max_time = measurement.timestamp;
        }
        self.count = self.count.saturating_add(1);
        self.measurements.push(measurement);
    }

    /// Finalize the bucket
    pub(crate) fn close(mut self, reason: CloseReason) -> Self {
        self.state = BucketState::Closed;
        self.close_reason = Some(reason);
        self
    }

    /// Span from `min_time` to `timestamp`
    ///
    /// Negative when `timestamp` precedes the bucket's first measurement.
    #[inline]
    pub fn span_to(&self, timestamp: Timestamp) -> i64 {
        timestamp.saturating_sub(self.min_time)
    }

    /// Bucket identifier
    pub fn id(&self) -> BucketId {
        self.id
    }

    /// Owning collection name
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Generation of the catalog that opened this bucket
    ///
    /// A dropped and recreated collection starts a new generation, so stale
    /// buckets can be told apart from the new collection's buckets.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Grouping key
    pub fn key(&self) -> &GroupingKey {
        &self.key
    }

    /// Time of the first measurement
    pub fn min_time(&self) -> Timestamp {
        self.min_time
    }

    /// Largest accepted timestamp
    pub fn max_time(&self) -> Timestamp {
        self.max_time
    }

    /// `(min_time, max_time)`
    pub fn time_range(&self) -> (Timestamp, Timestamp) {
        (self.min_time, self.max_time)
    }

    /// Number of measurements
    pub fn count(&self) -> u32 {
        self.count
    }

    /// Lifecycle state
    pub fn state(&self) -> BucketState {
        self.state
    }

    /// Whether the bucket still accepts measurements
    pub fn is_open(&self) -> bool {
        self.state == BucketState::Open
    }

    /// Reason the bucket was closed, if it is closed
    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason
    }

    /// Measurements in arrival order
    pub fn measurements(&self) -> &[Measurement] {
        &self.measurements
    }

    /// Lightweight copy of the bucket's bookkeeping fields
    pub fn summary(&self) -> BucketSummary {
        BucketSummary {
            id: self.id,
            key: self.key.clone(),
            min_time: self.min_time,
            max_time: self.max_time,
            count: self.count,
            state: self.state,
        }
    }
}

/// Bookkeeping view of a bucket without its measurements
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BucketSummary {
    /// Bucket identifier
    pub id: BucketId,
    /// Grouping key
    pub key: GroupingKey,
    /// Time of the first measurement
    pub min_time: Timestamp,
    /// Largest accepted timestamp
    pub max_time: Timestamp,
    /// Number of measurements
    pub count: u32,
    /// Lifecycle state
    pub state: BucketState,
}
