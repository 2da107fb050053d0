//! Time-series collections
//!
//! A `Collection` ties together the live time-series configuration, the
//! catalog of open buckets, and the assigner that routes measurements into
//! them. The configuration's granularity is the only field that changes
//! after creation, and only through `GranularityTransitionValidator`.
//!
//! Once dropped, a collection rejects inserts and flushes with
//! `Error::NamespaceNotFound`, including through handles obtained before
//! the drop.

/// Granularity transition rules
pub mod transition;

pub use transition::{GranularityTransitionValidator, Transition};

use crate::bucket::{BucketAssigner, BucketCatalog, BucketSummary, CatalogStats, CloseReason, InsertOutcome};
use crate::config::TimeseriesOptions;
use crate::error::{ConfigurationError, Error, Result};
use crate::granularity::Granularity;
use crate::ingestion::MeasurementExtractor;
use crate::storage::{BucketSink, PersistTicket};
use crate::types::Measurement;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

/// Live time-series configuration of one collection
///
/// The granularity is stored as its rank in an atomic byte so readers never
/// take a lock and never observe a torn value.
#[derive(Debug)]
pub struct CollectionTimeseriesConfig {
    time_field: String,
    meta_field: Option<String>,
    granularity: AtomicU8,
}

impl CollectionTimeseriesConfig {
    /// Build the live configuration from creation options
    pub fn new(options: &TimeseriesOptions) -> Self {
        Self {
            time_field: options.time_field.clone(),
            meta_field: options.meta_field.clone(),
            granularity: AtomicU8::new(options.granularity.rank()),
        }
    }

    /// Time field name
    pub fn time_field(&self) -> &str {
        &self.time_field
    }

    /// Meta field name, if configured
    pub fn meta_field(&self) -> Option<&str> {
        self.meta_field.as_deref()
    }

    /// Current granularity
    #[inline]
    pub fn granularity(&self) -> Granularity {
        Granularity::from_rank(self.granularity.load(Ordering::Acquire)).unwrap_or(Granularity::Hours)
    }

    /// Snapshot of the configuration as creation options
    pub fn options(&self) -> TimeseriesOptions {
        TimeseriesOptions {
            time_field: self.time_field.clone(),
            meta_field: self.meta_field.clone(),
            granularity: self.granularity(),
        }
    }

    /// Publish `new` only if the live value is still `current`
    ///
    /// On failure returns the value that is actually live.
    pub(crate) fn compare_exchange_granularity(
        &self,
        current: Granularity,
        new: Granularity,
    ) -> std::result::Result<(), Granularity> {
        self.granularity
            .compare_exchange(current.rank(), new.rank(), Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| Granularity::from_rank(actual).unwrap_or(Granularity::Hours))
    }

    /// Overwrite the granularity without validation
    #[cfg(test)]
    pub(crate) fn store_granularity(&self, granularity: Granularity) {
        self.granularity.store(granularity.rank(), Ordering::Release);
    }
}

/// A time-series collection
///
/// # Example
///
/// ```
/// use kuba_buckets::bucket::Assignment;
/// use kuba_buckets::collection::Collection;
/// use kuba_buckets::config::TimeseriesOptions;
/// use kuba_buckets::granularity::Granularity;
/// use kuba_buckets::storage::{BucketSink, PersistTicket};
/// use kuba_buckets::bucket::Bucket;
/// use serde_json::json;
/// use std::sync::Arc;
///
/// struct Discard;
/// impl BucketSink for Discard {
///     fn hand_off(&self, bucket: Bucket) -> PersistTicket {
///         PersistTicket::completed(bucket.id(), Ok(()))
///     }
/// }
///
/// let coll = Collection::new("weather", TimeseriesOptions::new("t"), Arc::new(Discard)).unwrap();
/// assert!(coll.generation() > 0);
/// let hour = 3_600_000;
///
/// coll.insert_document(&json!({"t": 0})).unwrap();
/// coll.set_granularity(Granularity::Minutes).unwrap();
///
/// // Within a day of the first measurement: still the same bucket
/// let out = coll.insert_document(&json!({"t": 2 * hour})).unwrap();
/// assert_eq!(out.assignment, Assignment::JoinedExistingBucket);
/// assert_eq!(coll.bucket_count(), 1);
///
/// assert!(coll.set_granularity(Granularity::Seconds).is_err());
/// ```
pub struct Collection {
    name: String,
    config: CollectionTimeseriesConfig,
    catalog: BucketCatalog,
    assigner: BucketAssigner,
    extractor: MeasurementExtractor,
    dropped: AtomicBool,
}

impl fmt::Debug for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collection")
            .field("name", &self.name)
            .field("generation", &self.generation())
            .field("granularity", &self.granularity())
            .field("dropped", &self.is_dropped())
            .finish()
    }
}

impl Collection {
    /// Create a collection handing closed buckets to `sink`
    pub fn new(
        name: impl Into<String>,
        options: TimeseriesOptions,
        sink: Arc<dyn BucketSink>,
    ) -> std::result::Result<Self, ConfigurationError> {
        options.validate()?;
        let name = name.into();
        Ok(Self {
            config: CollectionTimeseriesConfig::new(&options),
            catalog: BucketCatalog::new(name.clone()),
            assigner: BucketAssigner::new(sink),
            extractor: MeasurementExtractor::new(options.time_field, options.meta_field),
            dropped: AtomicBool::new(false),
            name,
        })
    }

    /// Also rotate buckets that reach `limit` measurements
    pub fn with_max_measurements(mut self, limit: Option<u32>) -> Self {
        self.assigner = self.assigner.with_max_measurements(limit);
        self
    }

    /// Collection name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Catalog generation stamped on this collection's buckets
    pub fn generation(&self) -> u64 {
        self.catalog.generation()
    }

    /// Whether the collection has been dropped
    pub fn is_dropped(&self) -> bool {
        self.dropped.load(Ordering::Acquire)
    }

    fn ensure_live(&self) -> Result<()> {
        if self.is_dropped() {
            return Err(Error::NamespaceNotFound(self.name.clone()));
        }
        Ok(())
    }

    /// Live configuration
    pub fn config(&self) -> &CollectionTimeseriesConfig {
        &self.config
    }

    /// Current granularity
    pub fn granularity(&self) -> Granularity {
        self.config.granularity()
    }

    /// Open bucket catalog
    pub fn catalog(&self) -> &BucketCatalog {
        &self.catalog
    }

    /// Place an already extracted measurement
    ///
    /// Fails with `NamespaceNotFound` once the collection is dropped.
    pub fn insert(&self, measurement: Measurement) -> Result<InsertOutcome> {
        self.ensure_live()?;
        Ok(self.assigner.assign(&self.config, &self.catalog, measurement))
    }

    /// Validate a document and place it
    pub fn insert_document(&self, document: &Value) -> Result<InsertOutcome> {
        self.ensure_live()?;
        let measurement = self.extractor.extract(document)?;
        self.insert(measurement)
    }

    /// Request a granularity change
    pub fn set_granularity(
        &self,
        requested: Granularity,
    ) -> std::result::Result<Transition, ConfigurationError> {
        GranularityTransitionValidator::apply(&self.name, &self.config, requested)
    }

    /// Close every open bucket and hand each to persistence
    pub fn flush(&self) -> Result<Vec<PersistTicket>> {
        self.ensure_live()?;
        Ok(self
            .catalog
            .close_all(CloseReason::Flush)
            .into_iter()
            .map(|bucket| self.assigner.hand_off(bucket))
            .collect())
    }

    /// Mark the collection dropped and discard its open buckets
    ///
    /// Inserts racing the drop may still open a bucket in the discarded
    /// catalog; its generation keeps any later hand-off out of the store.
    /// Returns the number of open buckets discarded.
    pub(crate) fn mark_dropped(&self) -> usize {
        self.dropped.store(true, Ordering::Release);
        self.catalog.clear()
    }

    /// Buckets handed off plus buckets currently open
    pub fn bucket_count(&self) -> u64 {
        self.catalog.closed_count() + self.catalog.open_count() as u64
    }

    /// Open buckets, ordered by id
    pub fn open_buckets(&self) -> Vec<BucketSummary> {
        self.catalog.open_buckets()
    }

    /// Catalog statistics
    pub fn stats(&self) -> CatalogStats {
        self.catalog.stats()
    }
}
