//! Registry of time-series collections
//!
//! `TimeseriesDatabase` owns every collection by name and a single
//! `PersistenceQueue` shared by all of them. It provides the collection
//! lifecycle: create, change granularity, insert, flush, and drop.
//!
//! # Example
//!
//! ```
//! use kuba_buckets::config::{EngineConfig, TimeseriesOptions};
//! use kuba_buckets::database::TimeseriesDatabase;
//! use kuba_buckets::granularity::Granularity;
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> kuba_buckets::Result<()> {
//! let db = TimeseriesDatabase::in_memory(EngineConfig::default());
//! db.create_collection("weather", TimeseriesOptions::new("t").with_meta_field("station"))?;
//!
//! db.insert("weather", &json!({"t": 0, "station": "north", "temp": 12.5}))?;
//! db.coll_mod_granularity("weather", Granularity::Hours)?;
//! assert!(db.coll_mod_granularity("weather", Granularity::Minutes).is_err());
//!
//! db.flush("weather").await?;
//! assert_eq!(db.stored_bucket_count("weather").await?, 1);
//! # db.shutdown().await;
//! # Ok(())
//! # }
//! ```

use crate::bucket::{BucketSummary, InsertOutcome};
use crate::collection::{Collection, Transition};
use crate::config::{EngineConfig, TimeseriesOptions};
use crate::error::{Error, Result};
use crate::granularity::Granularity;
use crate::storage::{BucketStore, InMemoryBucketStore, PersistenceQueue};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::Arc;
use tracing::info;

/// Named time-series collections sharing one persistence queue
pub struct TimeseriesDatabase {
    config: EngineConfig,
    collections: DashMap<String, Arc<Collection>>,
    store: Arc<dyn BucketStore>,
    queue: Arc<PersistenceQueue>,
}

impl TimeseriesDatabase {
    /// Create a database persisting into `store`
    ///
    /// Must be called inside a tokio runtime.
    pub fn new(config: EngineConfig, store: Arc<dyn BucketStore>) -> Self {
        let queue = Arc::new(PersistenceQueue::spawn(Arc::clone(&store)));
        Self {
            config,
            collections: DashMap::new(),
            store,
            queue,
        }
    }

    /// Create a database backed by `InMemoryBucketStore`
    pub fn in_memory(config: EngineConfig) -> Self {
        Self::new(config, Arc::new(InMemoryBucketStore::new()))
    }

    /// Engine configuration
    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Underlying bucket store
    pub fn store(&self) -> &Arc<dyn BucketStore> {
        &self.store
    }

    /// Shared persistence queue
    pub fn queue(&self) -> &PersistenceQueue {
        &self.queue
    }

    /// Create a collection
    ///
    /// Fails with `NamespaceExists` if the name is taken.
    pub fn create_collection(
        &self,
        name: &str,
        options: TimeseriesOptions,
    ) -> Result<Arc<Collection>> {
        match self.collections.entry(name.to_string()) {
            Entry::Occupied(_) => Err(Error::NamespaceExists(name.to_string())),
            Entry::Vacant(slot) => {
                let granularity = options.granularity;
                let sink = Arc::clone(&self.queue);
                let collection = Collection::new(name, options, sink)?
                    .with_max_measurements(self.config.catalog.max_measurements_per_bucket);
                let collection = Arc::new(collection);
                slot.insert(Arc::clone(&collection));
                info!(collection = name, granularity = %granularity, "Created collection");
                Ok(collection)
            }
        }
    }

    /// Look a collection up by name
    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .get(name)
            .map(|c| Arc::clone(c.value()))
            .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))
    }

    /// Names of all collections, sorted
    pub fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.iter().map(|e| e.key().clone()).collect();
        names.sort();
        names
    }

    /// Change a collection's granularity
    pub fn coll_mod_granularity(&self, name: &str, requested: Granularity) -> Result<Transition> {
        Ok(self.collection(name)?.set_granularity(requested)?)
    }

    /// Validate a document and insert it into `name`
    pub fn insert(&self, name: &str, document: &Value) -> Result<InsertOutcome> {
        Ok(self.collection(name)?.insert_document(document)?)
    }

    /// Buckets of `name` handed off plus buckets currently open
    pub fn bucket_count(&self, name: &str) -> Result<u64> {
        Ok(self.collection(name)?.bucket_count())
    }

    /// Buckets of `name` the store has durably written
    pub async fn stored_bucket_count(&self, name: &str) -> Result<usize> {
        Ok(self.store.bucket_count(name).await?)
    }

    /// Open buckets of `name`
    pub fn open_buckets(&self, name: &str) -> Result<Vec<BucketSummary>> {
        Ok(self.collection(name)?.open_buckets())
    }

    /// Close every open bucket of `name` and wait until all are durable
    ///
    /// Every ticket is awaited; the first failure is returned.
    pub async fn flush(&self, name: &str) -> Result<()> {
        let tickets = self.collection(name)?.flush()?;
        let mut first_error = None;
        for ticket in tickets {
            if let Err(e) = ticket.wait().await {
                first_error.get_or_insert(e);
            }
        }
        match first_error {
            Some(e) => Err(e.into()),
            None => Ok(()),
        }
    }

    /// Drop a collection
    ///
    /// Open buckets are discarded without being persisted, and the store is
    /// asked to remove everything written for the collection. Handles to the
    /// dropped collection reject further inserts and flushes, and buckets it
    /// still hands off are discarded by the persistence worker.
    pub async fn drop_collection(&self, name: &str) -> Result<()> {
        let (_, collection) = self
            .collections
            .remove(name)
            .ok_or_else(|| Error::NamespaceNotFound(name.to_string()))?;
        let discarded = collection.mark_dropped();
        self.queue
            .retire_collection(name, collection.generation())
            .await?;
        info!(collection = name, discarded, "Dropped collection");
        Ok(())
    }

    /// Stop the persistence worker after draining queued buckets
    pub async fn shutdown(&self) {
        self.queue.shutdown().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bucket::{Assignment, Bucket};
    use crate::error::{ConfigurationError, StorageError};
    use crate::types::{GroupingKey, Measurement};
    use async_trait::async_trait;
    use serde_json::json;

    const HOUR: i64 = 3_600_000;

    #[tokio::test]
    async fn test_create_twice() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();
        assert!(matches!(
            db.create_collection("c", TimeseriesOptions::new("t")),
            Err(Error::NamespaceExists(name)) if name == "c"
        ));
    }

    #[tokio::test]
    async fn test_invalid_options() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        assert!(matches!(
            db.create_collection("c", TimeseriesOptions::new("")),
            Err(Error::Configuration(ConfigurationError::InvalidOptions(_)))
        ));
        assert!(db.collection("c").is_err());
    }

    #[tokio::test]
    async fn test_unknown_collection() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        assert!(matches!(
            db.insert("nope", &json!({"t": 1})),
            Err(Error::NamespaceNotFound(_))
        ));
        assert!(matches!(
            db.coll_mod_granularity("nope", Granularity::Hours),
            Err(Error::NamespaceNotFound(_))
        ));
        assert!(db.drop_collection("nope").await.is_err());
    }

    #[tokio::test]
    async fn test_rotation_is_persisted() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();

        db.insert("c", &json!({"t": 0})).unwrap();
        let outcome = db.insert("c", &json!({"t": HOUR})).unwrap();
        assert_eq!(outcome.assignment, Assignment::CreatedNewBucket);
        outcome.wait_durable().await.unwrap();

        assert_eq!(db.bucket_count("c").unwrap(), 2);
        assert_eq!(db.stored_bucket_count("c").await.unwrap(), 1);
        assert_eq!(db.open_buckets("c").unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drop_discards_open_buckets() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();
        db.insert("c", &json!({"t": 0})).unwrap();
        db.insert("c", &json!({"t": HOUR})).unwrap();

        db.drop_collection("c").await.unwrap();
        assert_eq!(db.stored_bucket_count("c").await.unwrap(), 0);
        assert!(db.collection_names().is_empty());

        // Name is free again and starts from scratch
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();
        assert_eq!(db.bucket_count("c").unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stale_handle_cannot_write_after_drop() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();
        let stale = db.collection("c").unwrap();

        db.drop_collection("c").await.unwrap();
        assert!(stale.is_dropped());
        assert!(matches!(
            stale.insert_document(&json!({"t": 0})),
            Err(Error::NamespaceNotFound(_))
        ));
        assert!(matches!(stale.flush(), Err(Error::NamespaceNotFound(_))));

        let fresh = db.create_collection("c", TimeseriesOptions::new("t")).unwrap();
        assert_ne!(fresh.generation(), stale.generation());
        assert_eq!(db.bucket_count("c").unwrap(), 0);
        assert_eq!(db.stored_bucket_count("c").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_rotation_racing_drop_stays_out_of_recreated_collection() {
        let db = TimeseriesDatabase::in_memory(EngineConfig::default());
        let stale = db.create_collection("c", TimeseriesOptions::new("t")).unwrap();

        // An insert that was already past the drop check when the drop began
        // still rotates inside the discarded catalog and hands its bucket off.
        let catalog = stale.catalog();
        let key = GroupingKey::Global;
        db.drop_collection("c").await.unwrap();
        catalog.with_key(&key, |entry| {
            entry.get_or_create_open(0);
            entry.absorb(Measurement::new(GroupingKey::Global, 0));
        });
        let late: Vec<Bucket> = catalog.close_all(crate::bucket::CloseReason::TimeSpan);
        let tickets: Vec<_> = late.into_iter().map(|b| db.queue().submit(b)).collect();

        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();
        for ticket in tickets {
            assert_eq!(
                ticket.wait().await,
                Err(StorageError::CollectionDropped("c".into()))
            );
        }

        db.insert("c", &json!({"t": 0})).unwrap();
        db.flush("c").await.unwrap();
        assert_eq!(db.stored_bucket_count("c").await.unwrap(), 1);
        assert_eq!(db.bucket_count("c").unwrap(), 1);
        assert_eq!(db.queue().stats().discarded, 1);
    }

    /// Store whose writes always fail
    struct FailingStore;

    #[async_trait]
    impl BucketStore for FailingStore {
        fn engine_id(&self) -> &str {
            "failing"
        }

        async fn write_bucket(&self, bucket: &Bucket) -> std::result::Result<(), StorageError> {
            Err(StorageError::Backend(format!("boom {}", bucket.id())))
        }

        async fn read_buckets(
            &self,
            _collection: &str,
        ) -> std::result::Result<Vec<Bucket>, StorageError> {
            Ok(Vec::new())
        }

        async fn bucket_count(&self, _collection: &str) -> std::result::Result<usize, StorageError> {
            Ok(0)
        }

        async fn drop_collection(&self, _collection: &str) -> std::result::Result<(), StorageError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_durability_failure_reaches_inserter() {
        let db = TimeseriesDatabase::new(EngineConfig::default(), Arc::new(FailingStore));
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();

        db.insert("c", &json!({"t": 0})).unwrap();
        let outcome = db.insert("c", &json!({"t": HOUR})).unwrap();
        assert_eq!(outcome.assignment, Assignment::CreatedNewBucket);

        let result = outcome.wait_durable().await;
        assert!(matches!(result, Err(StorageError::Backend(msg)) if msg.starts_with("boom bucket-")));

        // The failed bucket stays closed; nothing is reopened or rolled back
        assert_eq!(db.bucket_count("c").unwrap(), 2);
        assert_eq!(db.open_buckets("c").unwrap().len(), 1);
        assert_eq!(db.collection("c").unwrap().stats().buckets_closed, 1);
        assert_eq!(db.queue().stats().failed, 1);

        // The next insert in the window still joins the new open bucket
        let joined = db.insert("c", &json!({"t": HOUR + 1})).unwrap();
        assert_eq!(joined.assignment, Assignment::JoinedExistingBucket);

        assert!(matches!(db.flush("c").await, Err(Error::Storage(_))));
    }

    #[tokio::test]
    async fn test_engine_limits_apply_to_new_collections() {
        let mut config = EngineConfig::default();
        config.catalog.max_measurements_per_bucket = Some(2);
        let db = TimeseriesDatabase::in_memory(config);
        db.create_collection("c", TimeseriesOptions::new("t")).unwrap();

        for t in 0..4 {
            db.insert("c", &json!({ "t": t })).unwrap();
        }
        assert_eq!(db.bucket_count("c").unwrap(), 2);
        db.flush("c").await.unwrap();
        assert_eq!(db.stored_bucket_count("c").await.unwrap(), 2);
    }
}
