//! Background persistence worker
//!
//! Closed buckets are pushed onto an unbounded channel and written to the
//! `BucketStore` by a single tokio task, in hand-off order. Each hand-off
//! returns a `PersistTicket` that resolves once the store has answered.
//!
//! Dropping a collection retires its catalog generation on the worker.
//! Writes that reach the worker afterwards for a retired generation are
//! discarded, so a late rotation on a dropped collection never lands in the
//! namespace of a collection recreated under the same name.
use crate::bucket::Bucket;
use crate::error::StorageError;
use crate::storage::{BucketSink, BucketStore, PersistTicket};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Internal persistence request
enum PersistRequest {
    /// Write one closed bucket
    Write {
        bucket: Bucket,
        response_tx: oneshot::Sender<Result<(), StorageError>>,
    },
    /// Remove a collection's buckets once earlier writes have landed
    Drop {
        collection: String,
        /// Catalog generation whose later writes are discarded
        generation: Option<u64>,
        response_tx: oneshot::Sender<Result<(), StorageError>>,
    },
}

/// Counters shared between the queue handle and its worker
#[derive(Debug, Default)]
struct QueueCounters {
    submitted: AtomicU64,
    persisted: AtomicU64,
    failed: AtomicU64,
    discarded: AtomicU64,
}

/// Persistence statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PersistenceStats {
    /// Buckets handed off
    pub submitted: u64,
    /// Buckets durably written
    pub persisted: u64,
    /// Buckets whose write failed
    pub failed: u64,
    /// Buckets discarded because their collection was dropped
    pub discarded: u64,
}

/// Background writer draining closed buckets into a `BucketStore`
///
/// Must be created inside a tokio runtime.
///
/// # Example
///
/// ```
/// use kuba_buckets::storage::{InMemoryBucketStore, PersistenceQueue};
/// use std::sync::Arc;
///
/// # #[tokio::main]
/// # async fn main() {
/// let store = Arc::new(InMemoryBucketStore::new());
/// let queue = PersistenceQueue::spawn(store);
/// assert_eq!(queue.stats().submitted, 0);
/// queue.shutdown().await;
/// # }
/// ```
pub struct PersistenceQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<PersistRequest>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    counters: Arc<QueueCounters>,
    engine_id: String,
}

impl PersistenceQueue {
    /// Start the background worker for `store`
    pub fn spawn(store: Arc<dyn BucketStore>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<PersistRequest>();
        let counters = Arc::new(QueueCounters::default());
        let engine_id = store.engine_id().to_string();

        let worker_counters = Arc::clone(&counters);
        let worker = tokio::spawn(async move {
            let mut retired: HashSet<u64> = HashSet::new();
            while let Some(req) = rx.recv().await {
                match req {
                    PersistRequest::Write {
                        bucket,
                        response_tx,
                    } => {
                        let result = if retired.contains(&bucket.generation()) {
                            discard_one(&bucket, &worker_counters)
                        } else {
                            write_one(store.as_ref(), &bucket, &worker_counters).await
                        };
                        // Caller may have dropped its ticket
                        let _ = response_tx.send(result);
                    }
                    PersistRequest::Drop {
                        collection,
                        generation,
                        response_tx,
                    } => {
                        if let Some(generation) = generation {
                            retired.insert(generation);
                        }
                        let result = store.drop_collection(&collection).await;
                        if let Err(e) = &result {
                            error!(collection = %collection, error = %e, "Failed to drop stored buckets");
                        }
                        let _ = response_tx.send(result);
                    }
                }
            }
            debug!("Persistence worker stopped");
        });

        info!(engine = %engine_id, "Persistence queue started");

        Self {
            tx: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(worker)),
            counters,
            engine_id,
        }
    }

    /// Queue a closed bucket for persistence
    ///
    /// Never blocks. After `shutdown` the returned ticket resolves to
    /// `StorageError::QueueClosed`.
    pub fn submit(&self, bucket: Bucket) -> PersistTicket {
        let bucket_id = bucket.id();
        let (response_tx, response_rx) = oneshot::channel();

        let sent = self.send(PersistRequest::Write {
            bucket,
            response_tx,
        });

        if !sent {
            crate::metrics::record_error("queue_closed", "persist");
            return PersistTicket::completed(bucket_id, Err(StorageError::QueueClosed));
        }

        self.counters.submitted.fetch_add(1, Ordering::Relaxed);
        PersistTicket::new(bucket_id, response_rx)
    }

    /// Remove every stored bucket of `collection`
    ///
    /// Runs on the worker after all previously submitted writes, so buckets
    /// closed before the drop cannot reappear in the store afterwards.
    pub async fn drop_collection(&self, collection: &str) -> Result<(), StorageError> {
        self.request_drop(collection, None).await
    }

    /// Remove every stored bucket of `collection` and retire `generation`
    ///
    /// Like `drop_collection`, but buckets of `generation` handed off after
    /// this call are discarded instead of written. Their tickets resolve to
    /// `StorageError::CollectionDropped`.
    pub async fn retire_collection(
        &self,
        collection: &str,
        generation: u64,
    ) -> Result<(), StorageError> {
        self.request_drop(collection, Some(generation)).await
    }

    async fn request_drop(
        &self,
        collection: &str,
        generation: Option<u64>,
    ) -> Result<(), StorageError> {
        let (response_tx, response_rx) = oneshot::channel();
        let sent = self.send(PersistRequest::Drop {
            collection: collection.to_string(),
            generation,
            response_tx,
        });
        if !sent {
            return Err(StorageError::QueueClosed);
        }
        response_rx.await.unwrap_or(Err(StorageError::QueueClosed))
    }

    fn send(&self, request: PersistRequest) -> bool {
        match self.tx.lock().as_ref() {
            Some(tx) => tx.send(request).is_ok(),
            None => false,
        }
    }

    /// Current statistics
    pub fn stats(&self) -> PersistenceStats {
        PersistenceStats {
            submitted: self.counters.submitted.load(Ordering::Relaxed),
            persisted: self.counters.persisted.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            discarded: self.counters.discarded.load(Ordering::Relaxed),
        }
    }

    /// Identifier of the underlying store
    pub fn engine_id(&self) -> &str {
        &self.engine_id
    }

    /// Stop accepting work and wait for queued buckets to be written
    pub async fn shutdown(&self) {
        // Dropping the sender lets the worker drain and exit
        self.tx.lock().take();
        let worker = self.worker.lock().take();
        if let Some(worker) = worker {
            if let Err(e) = worker.await {
                error!(error = %e, "Persistence worker panicked");
            }
        }
        info!(engine = %self.engine_id, "Persistence queue stopped");
    }
}

async fn write_one(
    store: &dyn BucketStore,
    bucket: &Bucket,
    counters: &QueueCounters,
) -> Result<(), StorageError> {
    let start = Instant::now();
    let result = store.write_bucket(bucket).await;
    let duration = start.elapsed().as_secs_f64();

    match &result {
        Ok(()) => {
            counters.persisted.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_persist(duration, true);
            debug!(
                bucket_id = %bucket.id(),
                collection = bucket.collection(),
                count = bucket.count(),
                "Persisted bucket"
            );
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            crate::metrics::record_persist(duration, false);
            error!(
                bucket_id = %bucket.id(),
                collection = bucket.collection(),
                error = %e,
                "Failed to persist bucket"
            );
        }
    }
    result
}

fn discard_one(bucket: &Bucket, counters: &QueueCounters) -> Result<(), StorageError> {
    counters.discarded.fetch_add(1, Ordering::Relaxed);
    crate::metrics::record_error("collection_dropped", "persist");
    warn!(
        bucket_id = %bucket.id(),
        collection = bucket.collection(),
        generation = bucket.generation(),
        "Discarded bucket of dropped collection"
    );
    Err(StorageError::CollectionDropped(bucket.collection().to_string()))
}

impl BucketSink for PersistenceQueue {
    fn hand_off(&self, bucket: Bucket) -> PersistTicket {
        self.submit(bucket)
    }
}
