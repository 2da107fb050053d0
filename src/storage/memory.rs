//! In-memory bucket store
//!
//! Keeps closed buckets per collection behind a `parking_lot::RwLock`.
//! Suitable for tests, the replay tool, and as the reference behavior for
//! other `BucketStore` implementations.
use crate::bucket::Bucket;
use crate::error::StorageError;
use crate::storage::BucketStore;
use async_trait::async_trait;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Store statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Number of successful writes
    pub write_ops: u64,
    /// Number of read operations
    pub read_ops: u64,
}

/// Bucket store backed by process memory
#[derive(Default)]
pub struct InMemoryBucketStore {
    buckets: RwLock<HashMap<String, Vec<Bucket>>>,
    write_ops: AtomicU64,
    read_ops: AtomicU64,
}

impl InMemoryBucketStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Current statistics
    pub fn stats(&self) -> StoreStats {
        StoreStats {
            write_ops: self.write_ops.load(Ordering::Relaxed),
            read_ops: self.read_ops.load(Ordering::Relaxed),
        }
    }
}

#[async_trait]
impl BucketStore for InMemoryBucketStore {
    fn engine_id(&self) -> &str {
        "in-memory-v1"
    }

    async fn write_bucket(&self, bucket: &Bucket) -> Result<(), StorageError> {
        if bucket.is_open() {
            return Err(StorageError::WriteFailed {
                bucket: bucket.id().to_string(),
                message: "bucket is still open".to_string(),
            });
        }

        let mut buckets = self.buckets.write();
        let stored = buckets.entry(bucket.collection().to_string()).or_default();
        // Writes may arrive out of order from the worker; keep id order
        let pos = stored.partition_point(|b| b.id() < bucket.id());
        if stored.get(pos).map(Bucket::id) == Some(bucket.id()) {
            stored[pos] = bucket.clone();
        } else {
            stored.insert(pos, bucket.clone());
        }
        self.write_ops.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn read_buckets(&self, collection: &str) -> Result<Vec<Bucket>, StorageError> {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        Ok(self
            .buckets
            .read()
            .get(collection)
            .cloned()
            .unwrap_or_default())
    }

    async fn bucket_count(&self, collection: &str) -> Result<usize, StorageError> {
        self.read_ops.fetch_add(1, Ordering::Relaxed);
        Ok(self.buckets.read().get(collection).map_or(0, Vec::len))
    }

    async fn drop_collection(&self, collection: &str) -> Result<(), StorageError> {
        self.buckets.write().remove(collection);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::CloseReason;
    use crate::types::{GroupingKey, Measurement};

    fn closed_bucket(collection: &str, ts: i64) -> Bucket {
        Bucket::from_measurements(collection, vec![Measurement::new(GroupingKey::Global, ts)])
            .unwrap()
            .close(CloseReason::TimeSpan)
    }

    #[tokio::test]
    async fn test_write_and_read() {
        let store = InMemoryBucketStore::new();
        let a = closed_bucket("metrics", 1);
        let b = closed_bucket("metrics", 2);

        // Out-of-order arrival is stored in id order
        store.write_bucket(&b).await.unwrap();
        store.write_bucket(&a).await.unwrap();

        let read = store.read_buckets("metrics").await.unwrap();
        assert_eq!(read.len(), 2);
        assert_eq!(read[0].id(), a.id());
        assert_eq!(read[1].id(), b.id());
        assert_eq!(store.bucket_count("metrics").await.unwrap(), 2);
        assert_eq!(store.bucket_count("other").await.unwrap(), 0);
        assert_eq!(store.stats().write_ops, 2);
    }

    #[tokio::test]
    async fn test_rewrite_is_idempotent() {
        let store = InMemoryBucketStore::new();
        let a = closed_bucket("metrics", 1);
        store.write_bucket(&a).await.unwrap();
        store.write_bucket(&a).await.unwrap();
        assert_eq!(store.bucket_count("metrics").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_rejects_open_bucket() {
        let store = InMemoryBucketStore::new();
        let open = Bucket::from_measurements(
            "metrics",
            vec![Measurement::new(GroupingKey::Global, 1)],
        )
        .unwrap();
        let result = store.write_bucket(&open).await;
        assert!(matches!(result, Err(StorageError::WriteFailed { .. })));
    }

    #[tokio::test]
    async fn test_drop_collection() {
        let store = InMemoryBucketStore::new();
        store.write_bucket(&closed_bucket("a", 1)).await.unwrap();
        store.write_bucket(&closed_bucket("b", 1)).await.unwrap();

        store.drop_collection("a").await.unwrap();
        assert_eq!(store.bucket_count("a").await.unwrap(), 0);
        assert_eq!(store.bucket_count("b").await.unwrap(), 1);
        assert_eq!(store.engine_id(), "in-memory-v1");
    }
}
