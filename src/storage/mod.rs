//! Persistence hand-off for closed buckets
//!
//! The bucket engine decides membership and spans only. Once a bucket is
//! closed it is handed to a `BucketSink`, which is responsible for making it
//! durable. The production sink is `PersistenceQueue`, a background worker
//! draining closed buckets into a `BucketStore`.
//!
//! # Architecture
//!
//! ```text
//! Insert → BucketAssigner → close → BucketSink::hand_off → PersistTicket
//!                                        │
//!                                        └─ PersistenceQueue (tokio task)
//!                                              └─ BucketStore::write_bucket
//! ```
//!
//! Assignment never waits on storage. A caller that needs durability awaits
//! the returned `PersistTicket`.

/// In-memory reference store
pub mod memory;
/// Background persistence worker
pub mod queue;

pub use memory::InMemoryBucketStore;
pub use queue::PersistenceQueue;

use crate::bucket::Bucket;
use crate::error::StorageError;
use crate::types::BucketId;
use async_trait::async_trait;
use tokio::sync::oneshot;

/// Durable storage collaborator for finalized buckets
#[async_trait]
pub trait BucketStore: Send + Sync + 'static {
    /// Unique identifier for this storage backend
    fn engine_id(&self) -> &str;

    /// Durably write a closed bucket
    async fn write_bucket(&self, bucket: &Bucket) -> Result<(), StorageError>;

    /// Read back every stored bucket of a collection, ordered by bucket id
    async fn read_buckets(&self, collection: &str) -> Result<Vec<Bucket>, StorageError>;

    /// Number of stored buckets for a collection
    async fn bucket_count(&self, collection: &str) -> Result<usize, StorageError>;

    /// Remove every stored bucket of a collection
    async fn drop_collection(&self, collection: &str) -> Result<(), StorageError>;
}

/// Receiver of closed buckets
///
/// `hand_off` must not block: it is called right after a rotation decision.
pub trait BucketSink: Send + Sync {
    /// Take ownership of a closed bucket and start making it durable
    fn hand_off(&self, bucket: Bucket) -> PersistTicket;
}

/// Handle to the outcome of persisting one closed bucket
///
/// Dropping the ticket does not cancel the write.
#[derive(Debug)]
pub struct PersistTicket {
    bucket_id: BucketId,
    rx: oneshot::Receiver<Result<(), StorageError>>,
}

impl PersistTicket {
    /// Wrap the receiving half of a persistence response channel
    pub fn new(bucket_id: BucketId, rx: oneshot::Receiver<Result<(), StorageError>>) -> Self {
        Self { bucket_id, rx }
    }

    /// A ticket whose outcome is already known
    pub fn completed(bucket_id: BucketId, result: Result<(), StorageError>) -> Self {
        let (tx, rx) = oneshot::channel();
        // Receiver is alive, send cannot fail
        let _ = tx.send(result);
        Self { bucket_id, rx }
    }

    /// Bucket being persisted
    pub fn bucket_id(&self) -> BucketId {
        self.bucket_id
    }

    /// Wait until the bucket is durable or the write has failed
    pub async fn wait(self) -> Result<(), StorageError> {
        match self.rx.await {
            Ok(result) => result,
            Err(_) => Err(StorageError::QueueClosed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_completed_ticket() {
        let ok = PersistTicket::completed(BucketId(1), Ok(()));
        assert_eq!(ok.bucket_id(), BucketId(1));
        assert!(ok.wait().await.is_ok());

        let failed = PersistTicket::completed(
            BucketId(2),
            Err(StorageError::Backend("disk full".into())),
        );
        assert_eq!(
            failed.wait().await,
            Err(StorageError::Backend("disk full".into()))
        );
    }

    #[tokio::test]
    async fn test_dropped_responder_reports_closed_queue() {
        let (tx, rx) = oneshot::channel();
        let ticket = PersistTicket::new(BucketId(3), rx);
        drop(tx);
        assert_eq!(ticket.wait().await, Err(StorageError::QueueClosed));
    }
}
