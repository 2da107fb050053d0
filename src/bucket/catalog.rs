//! Per-collection index of open buckets
//!
//! The catalog maps each grouping key to a slot holding at most one open
//! bucket. Slots are individually locked: every lookup-then-maybe-rotate
//! sequence for a key runs inside that key's critical section, while
//! inserts for different keys never contend.
//!
//! # Architecture
//!
//! ```text
//! DashMap<GroupingKey, Arc<Mutex<KeySlot>>>
//!            │                  │
//!            │                  └── open: Option<Bucket>   (per-key lock)
//!            └── shard locks held only long enough to clone the Arc
//! ```
//!
//! The shard lock is never held while a slot lock is taken, so a slow
//! rotation on one key cannot stall lookups for keys on the same shard.
use crate::bucket::record::{Bucket, BucketSummary, CloseReason};
use crate::types::{BucketId, GroupingKey, Measurement, Timestamp};
use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Generation 0 is reserved for buckets built outside a catalog
static NEXT_GENERATION: AtomicU64 = AtomicU64::new(1);

/// Slot holding the open bucket for one grouping key
#[derive(Debug, Default)]
struct KeySlot {
    open: Option<Bucket>,
    /// Set when the slot has been unlinked from the index; holders of a
    /// stale `Arc` must look the key up again
    retired: bool,
}

/// Catalog statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CatalogStats {
    /// Buckets ever opened
    pub buckets_opened: u64,
    /// Buckets closed and handed off
    pub buckets_closed: u64,
    /// Buckets currently open
    pub open_buckets: usize,
    /// Grouping keys with a slot
    pub keys: usize,
}

/// In-memory index of currently open buckets for one collection
///
/// # Example
///
/// ```
/// use kuba_buckets::bucket::BucketCatalog;
/// use kuba_buckets::types::{GroupingKey, Measurement};
///
/// let catalog = BucketCatalog::new("weather");
/// let key = GroupingKey::Global;
///
/// let id = catalog.with_key(&key, |entry| {
///     let (bucket, created) = entry.get_or_create_open(1_000);
///     assert!(created);
///     let id = bucket.id();
///     entry.absorb(Measurement::new(GroupingKey::Global, 1_000));
///     id
/// });
///
/// assert_eq!(catalog.open_bucket(&key).unwrap().id, id);
/// assert_eq!(catalog.open_count(), 1);
/// ```
pub struct BucketCatalog {
    collection: String,
    generation: u64,
    slots: DashMap<GroupingKey, Arc<Mutex<KeySlot>>>,
    opened: AtomicU64,
    closed: AtomicU64,
}

impl BucketCatalog {
    /// Create an empty catalog for `collection`
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            generation: NEXT_GENERATION.fetch_add(1, Ordering::Relaxed),
            slots: DashMap::new(),
            opened: AtomicU64::new(0),
            closed: AtomicU64::new(0),
        }
    }

    /// Owning collection name
    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Generation stamped on every bucket this catalog opens
    ///
    /// Unique per catalog instance within the process.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Run `f` inside the critical section for `key`
    ///
    /// Everything `f` does through the `KeyEntry` is indivisible with respect
    /// to other callers targeting the same key. `f` must not call back into
    /// this catalog for the same key.
    pub fn with_key<R>(&self, key: &GroupingKey, f: impl FnOnce(&mut KeyEntry<'_>) -> R) -> R {
        loop {
            let slot = self.slot_for(key);
            let mut guard = slot.lock();
            if guard.retired {
                // Unlinked between lookup and lock
                continue;
            }
            let mut entry = KeyEntry {
                catalog: self,
                key,
                slot: &mut *guard,
            };
            return f(&mut entry);
        }
    }

    /// Fetch or create the slot for `key` without holding a shard lock afterwards
    fn slot_for(&self, key: &GroupingKey) -> Arc<Mutex<KeySlot>> {
        if let Some(slot) = self.slots.get(key) {
            return Arc::clone(slot.value());
        }
        Arc::clone(self.slots.entry(key.clone()).or_default().value())
    }

    /// Snapshot every slot handle so callers can lock them without shard locks
    fn slot_handles(&self) -> Vec<(GroupingKey, Arc<Mutex<KeySlot>>)> {
        self.slots
            .iter()
            .map(|e| (e.key().clone(), Arc::clone(e.value())))
            .collect()
    }

    /// Summary of the open bucket for `key`, if any
    pub fn open_bucket(&self, key: &GroupingKey) -> Option<BucketSummary> {
        let slot = self.slots.get(key).map(|s| Arc::clone(s.value()))?;
        let guard = slot.lock();
        guard.open.as_ref().map(Bucket::summary)
    }

    /// Summaries of all open buckets, ordered by bucket id
    pub fn open_buckets(&self) -> Vec<BucketSummary> {
        let mut out: Vec<BucketSummary> = self
            .slot_handles()
            .into_iter()
            .filter_map(|(_, slot)| {
                let guard = slot.lock();
                guard.open.as_ref().map(Bucket::summary)
            })
            .collect();
        out.sort_by_key(|s| s.id);
        out
    }

    /// Number of open buckets
    pub fn open_count(&self) -> usize {
        self.slot_handles()
            .into_iter()
            .filter(|(_, slot)| slot.lock().open.is_some())
            .count()
    }

    /// Number of buckets closed and handed off so far
    pub fn closed_count(&self) -> u64 {
        self.closed.load(Ordering::Acquire)
    }

    /// Number of buckets ever opened
    pub fn opened_count(&self) -> u64 {
        self.opened.load(Ordering::Acquire)
    }

    /// Current statistics
    pub fn stats(&self) -> CatalogStats {
        CatalogStats {
            buckets_opened: self.opened_count(),
            buckets_closed: self.closed_count(),
            open_buckets: self.open_count(),
            keys: self.slots.len(),
        }
    }

    /// Close every open bucket and return them for hand-off
    ///
    /// Emptied slots are unlinked, so keys that never receive another
    /// measurement do not keep an entry. The next insert for a key registers
    /// a fresh slot and opens a fresh bucket.
    pub fn close_all(&self, reason: CloseReason) -> Vec<Bucket> {
        let mut closed = Vec::new();
        for (key, slot) in self.slot_handles() {
            let mut guard = slot.lock();
            if guard.retired {
                continue;
            }
            // Only unlink the slot we hold; a newer one may already be registered
            self.slots.remove_if(&key, |_, current| Arc::ptr_eq(current, &slot));
            guard.retired = true;
            if let Some(bucket) = guard.open.take() {
                self.closed.fetch_add(1, Ordering::AcqRel);
                debug!(
                    collection = %self.collection,
                    bucket_id = %bucket.id(),
                    key = %key,
                    reason = reason.as_str(),
                    "Closed bucket"
                );
                closed.push(bucket.close(reason));
            }
        }
        closed.sort_by_key(Bucket::id);
        closed
    }

    /// Discard every open bucket and unlink all keys
    ///
    /// Discarded buckets are not counted as closed and are not handed to
    /// persistence. Returns the number of open buckets dropped.
    pub fn clear(&self) -> usize {
        let keys: Vec<GroupingKey> = self.slots.iter().map(|e| e.key().clone()).collect();
        let mut discarded = 0;
        for key in keys {
            if let Some((_, slot)) = self.slots.remove(&key) {
                let mut guard = slot.lock();
                guard.retired = true;
                if guard.open.take().is_some() {
                    discarded += 1;
                }
            }
        }
        discarded
    }
}

/// Exclusive access to one key's slot inside `BucketCatalog::with_key`
pub struct KeyEntry<'a> {
    catalog: &'a BucketCatalog,
    key: &'a GroupingKey,
    slot: &'a mut KeySlot,
}

impl<'a> KeyEntry<'a> {
    /// Grouping key this entry guards
    pub fn key(&self) -> &GroupingKey {
        self.key
    }

    /// The open bucket, if any
    pub fn open_bucket(&self) -> Option<&Bucket> {
        self.slot.open.as_ref()
    }

    /// Return the open bucket, creating one anchored at `timestamp` if none exists
    ///
    /// The boolean is `true` when a bucket was created. A freshly created
    /// bucket holds no measurements until the caller absorbs one.
    pub fn get_or_create_open(&mut self, timestamp: Timestamp) -> (&mut Bucket, bool) {
        let created = self.slot.open.is_none();
        let catalog = self.catalog;
        let key = self.key;
        let bucket = self.slot.open.get_or_insert_with(|| {
            catalog.opened.fetch_add(1, Ordering::AcqRel);
            Bucket::anchored(
                BucketId::next(),
                catalog.collection.as_str(),
                catalog.generation,
                key.clone(),
                timestamp,
            )
        });
        if created {
            debug!(
                collection = %catalog.collection,
                bucket_id = %bucket.id(),
                key = %key,
                min_time = timestamp,
                "Opened bucket"
            );
        }
        (bucket, created)
    }

    /// Allocate a new open bucket for this key without installing it
    pub fn new_bucket(&self, anchor: Timestamp) -> Bucket {
        Bucket::anchored(
            BucketId::next(),
            self.catalog.collection.as_str(),
            self.catalog.generation,
            self.key.clone(),
            anchor,
        )
    }

    /// Place a measurement into the open bucket
    ///
    /// Returns the bucket id, or `None` if no bucket is open.
    pub fn absorb(&mut self, measurement: Measurement) -> Option<BucketId> {
        let bucket = self.slot.open.as_mut()?;
        bucket.absorb(measurement);
        Some(bucket.id())
    }

    /// Close the current open bucket and install `replacement`
    ///
    /// Both steps happen under the key's lock, so no insert can observe the
    /// key without an open bucket or land in the bucket being closed.
    /// Returns the closed bucket, if there was one.
    pub fn close_and_replace(&mut self, replacement: Bucket, reason: CloseReason) -> Option<Bucket> {
        debug_assert!(replacement.is_open());
        let replacement_id = replacement.id();
        let replacement_min = replacement.min_time();
        let previous = self.slot.open.replace(replacement);
        self.catalog.opened.fetch_add(1, Ordering::AcqRel);

        let closed = previous.map(|bucket| {
            self.catalog.closed.fetch_add(1, Ordering::AcqRel);
            bucket.close(reason)
        });

        debug!(
            collection = %self.catalog.collection,
            key = %self.key,
            closed_bucket = ?closed.as_ref().map(Bucket::id),
            bucket_id = %replacement_id,
            min_time = replacement_min,
            reason = reason.as_str(),
            "Rotated bucket"
        );

        closed
    }
}
