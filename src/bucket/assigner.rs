//! Bucket assignment
//!
//! Decides, for each incoming measurement, whether it extends the open
//! bucket for its grouping key or forces a rotation. The collection's
//! granularity is read live on every evaluation, inside the key's critical
//! section, so an upgrade applied while a bucket is open widens that
//! bucket's window immediately.
use crate::bucket::catalog::BucketCatalog;
use crate::bucket::record::{Bucket, CloseReason};
use crate::collection::CollectionTimeseriesConfig;
use crate::error::StorageError;
use crate::granularity::GranularityPolicy;
use crate::storage::{BucketSink, PersistTicket};
use crate::types::{BucketId, Measurement};
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Outcome of placing one measurement
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assignment {
    /// The measurement extended the key's open bucket
    JoinedExistingBucket,
    /// A bucket was opened for the measurement
    CreatedNewBucket,
}

impl Assignment {
    /// Label used in logs and metrics
    pub fn as_str(self) -> &'static str {
        match self {
            Assignment::JoinedExistingBucket => "joined",
            Assignment::CreatedNewBucket => "created",
        }
    }
}

impl fmt::Display for Assignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of an insert
#[derive(Debug)]
pub struct InsertOutcome {
    /// Whether the measurement joined or created a bucket
    pub assignment: Assignment,
    /// Bucket now holding the measurement
    pub bucket_id: BucketId,
    /// Persistence ticket for the bucket this insert closed, if any
    pub closed: Option<PersistTicket>,
}

impl InsertOutcome {
    /// Wait for the bucket closed by this insert, if any, to become durable
    pub async fn wait_durable(self) -> Result<(), StorageError> {
        match self.closed {
            Some(ticket) => ticket.wait().await,
            None => Ok(()),
        }
    }
}

/// Places measurements into buckets and rotates on span or count limits
pub struct BucketAssigner {
    sink: Arc<dyn BucketSink>,
    max_measurements: Option<u32>,
}

impl BucketAssigner {
    /// Create an assigner handing closed buckets to `sink`
    pub fn new(sink: Arc<dyn BucketSink>) -> Self {
        Self {
            sink,
            max_measurements: None,
        }
    }

    /// Also rotate buckets once they hold `limit` measurements
    pub fn with_max_measurements(mut self, limit: Option<u32>) -> Self {
        self.max_measurements = limit.filter(|&n| n > 0);
        self
    }

    /// Configured measurement limit, if any
    pub fn max_measurements(&self) -> Option<u32> {
        self.max_measurements
    }

    /// Place `measurement` into the open bucket for its key
    ///
    /// The lookup, span check and any rotation run as one critical section
    /// for the key. The closed bucket, if any, is handed to the sink after the
    /// key's lock is released.
    pub fn assign(
        &self,
        config: &CollectionTimeseriesConfig,
        catalog: &BucketCatalog,
        measurement: Measurement,
    ) -> InsertOutcome {
        let key = measurement.key.clone();
        let t = measurement.timestamp;
        let max_measurements = self.max_measurements;

        let (assignment, bucket_id, closed) = catalog.with_key(&key, |entry| {
            let limit = GranularityPolicy::max_span_ms(config.granularity());

            let (bucket, created) = entry.get_or_create_open(t);
            if created {
                let id = bucket.absorb_returning_id(measurement);
                return (Assignment::CreatedNewBucket, id, None);
            }

            let reason = if bucket.span_to(t) >= limit {
                Some(CloseReason::TimeSpan)
            } else if max_measurements.is_some_and(|n| bucket.count() >= n) {
                Some(CloseReason::Count)
            } else {
                None
            };

            match reason {
                None => {
                    let id = bucket.absorb_returning_id(measurement);
                    (Assignment::JoinedExistingBucket, id, None)
                }
                Some(reason) => {
                    let mut fresh = entry.new_bucket(t);
                    let id = fresh.absorb_returning_id(measurement);
                    let closed = entry.close_and_replace(fresh, reason);
                    (Assignment::CreatedNewBucket, id, closed)
                }
            }
        });

        crate::metrics::record_insert(assignment.as_str());
        if assignment == Assignment::CreatedNewBucket {
            crate::metrics::record_bucket_opened();
        }

        let closed = closed.map(|bucket| self.hand_off(bucket));

        InsertOutcome {
            assignment,
            bucket_id,
            closed,
        }
    }

    /// Hand a closed bucket to the sink
    pub(crate) fn hand_off(&self, bucket: Bucket) -> PersistTicket {
        if let Some(reason) = bucket.close_reason() {
            crate::metrics::record_bucket_closed(reason.as_str());
        }
        debug!(
            collection = bucket.collection(),
            bucket_id = %bucket.id(),
            count = bucket.count(),
            min_time = bucket.min_time(),
            max_time = bucket.max_time(),
            "Handing off closed bucket"
        );
        self.sink.hand_off(bucket)
    }
}

impl Bucket {
    #[inline]
    fn absorb_returning_id(&mut self, measurement: Measurement) -> BucketId {
        self.absorb(measurement);
        self.id()
    }
}
