//! Property tests for bucket assignment and granularity transitions
//!
//! Uses property-based testing (proptest) to check the bucket-count law for
//! monotonic streams, the half-open window boundary, upgrade behavior on
//! open buckets, and the monotonicity of granularity changes.

use kuba_buckets::bucket::{Assignment, Bucket};
use kuba_buckets::collection::{Collection, GranularityTransitionValidator};
use kuba_buckets::storage::{BucketSink, PersistTicket};
use kuba_buckets::types::{GroupingKey, Measurement};
use kuba_buckets::{Granularity, GranularityPolicy, TimeseriesOptions};
use parking_lot::Mutex;
use proptest::prelude::*;
use std::sync::Arc;

// =============================================================================
// Test Data Strategies
// =============================================================================

fn granularity() -> impl Strategy<Value = Granularity> {
    prop_oneof![
        Just(Granularity::Seconds),
        Just(Granularity::Minutes),
        Just(Granularity::Hours),
    ]
}

/// Strategy for generating monotonically increasing timestamps
///
/// Deltas are skewed so that streams cross window boundaries at every
/// granularity without being dominated by rotations.
fn timestamp_sequence(max_len: usize) -> impl Strategy<Value = Vec<i64>> {
    prop::collection::vec(
        prop_oneof![
            4 => 0i64..1_000,
            3 => 1_000i64..3_600_000,
            2 => 3_600_000i64..86_400_000,
            1 => 86_400_000i64..3_000_000_000,
        ],
        1..max_len,
    )
    .prop_map(|deltas| {
        let mut result = Vec::with_capacity(deltas.len());
        let mut current = 1_619_121_600_000i64;
        for delta in deltas {
            current += delta;
            result.push(current);
        }
        result
    })
}

// =============================================================================
// Helpers
// =============================================================================

#[derive(Default)]
struct CollectingSink {
    closed: Mutex<Vec<Bucket>>,
}

impl BucketSink for CollectingSink {
    fn hand_off(&self, bucket: Bucket) -> PersistTicket {
        let id = bucket.id();
        self.closed.lock().push(bucket);
        PersistTicket::completed(id, Ok(()))
    }
}

fn collection(g: Granularity) -> (Collection, Arc<CollectingSink>) {
    let sink = Arc::new(CollectingSink::default());
    let coll = Collection::new(
        "prop",
        TimeseriesOptions::new("t").with_granularity(g),
        sink.clone(),
    )
    .expect("create collection");
    (coll, sink)
}

fn insert(coll: &Collection, t: i64) -> Assignment {
    coll.insert(Measurement::new(GroupingKey::Global, t))
        .expect("insert")
        .assignment
}

/// Reference model: buckets = 1 + number of times t - anchor >= limit
fn expected_buckets(timestamps: &[i64], limit: i64) -> u64 {
    let mut anchor = timestamps[0];
    let mut buckets = 1;
    for &t in &timestamps[1..] {
        if t - anchor >= limit {
            anchor = t;
            buckets += 1;
        }
    }
    buckets
}

// =============================================================================
// Properties
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Bucket count for a monotonic stream follows the reference model
    #[test]
    fn prop_bucket_count_law(g in granularity(), ts in timestamp_sequence(200)) {
        let (coll, sink) = collection(g);
        for &t in &ts {
            insert(&coll, t);
        }

        let limit = GranularityPolicy::max_span_ms(g);
        prop_assert_eq!(coll.bucket_count(), expected_buckets(&ts, limit));

        let closed = sink.closed.lock();
        for bucket in closed.iter() {
            prop_assert!(bucket.max_time() - bucket.min_time() < limit);
        }
        let total: u64 = closed.iter().map(|b| u64::from(b.count())).sum::<u64>()
            + coll.open_buckets().iter().map(|b| u64::from(b.count)).sum::<u64>();
        prop_assert_eq!(total, ts.len() as u64);
    }

    /// minTime + limit - 1ms joins, minTime + limit rotates
    #[test]
    fn prop_half_open_boundary(g in granularity(), anchor in -1_000_000_000_000i64..4_000_000_000_000) {
        let limit = GranularityPolicy::max_span_ms(g);
        let (coll, _sink) = collection(g);

        prop_assert_eq!(insert(&coll, anchor), Assignment::CreatedNewBucket);
        prop_assert_eq!(insert(&coll, anchor + limit - 1), Assignment::JoinedExistingBucket);
        prop_assert_eq!(insert(&coll, anchor + limit), Assignment::CreatedNewBucket);
    }

    /// After g1 -> g2, times in [limit(g1), limit(g2)) join the open bucket
    #[test]
    fn prop_upgrade_rescues(
        from in granularity(),
        to in granularity(),
        frac in 0.0f64..1.0,
    ) {
        prop_assume!(to.rank() > from.rank());
        let (low, high) = (GranularityPolicy::max_span_ms(from), GranularityPolicy::max_span_ms(to));
        let offset = low + ((high - low) as f64 * frac) as i64;
        prop_assume!(offset < high);

        let (coll, _sink) = collection(from);
        insert(&coll, 0);
        coll.set_granularity(to).expect("upgrade");

        prop_assert_eq!(insert(&coll, offset), Assignment::JoinedExistingBucket);
        prop_assert_eq!(coll.bucket_count(), 1);
    }

    /// Any sequence of requests leaves the granularity at the running maximum
    #[test]
    fn prop_transitions_are_monotonic(
        initial in granularity(),
        requests in prop::collection::vec(granularity(), 0..20),
    ) {
        let (coll, _sink) = collection(initial);
        let mut expected = initial;

        for requested in requests {
            let before = coll.granularity();
            let result = coll.set_granularity(requested);

            prop_assert_eq!(result.is_ok(), requested.rank() >= before.rank());
            prop_assert_eq!(
                result.is_ok(),
                GranularityTransitionValidator::validate(before, requested).is_ok()
            );
            if requested > expected {
                expected = requested;
            }
            prop_assert_eq!(coll.granularity(), expected);
        }
    }
}
