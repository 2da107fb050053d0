//! Kuba Buckets - time-series bucket assignment with monotonic granularity
//!
//! This library groups time-stamped measurements into buckets and manages
//! each collection's time granularity over its lifetime:
//! - Per-key open-bucket catalog with per-key critical sections
//! - Span-based rotation using the collection's live granularity
//! - Upgrade-only granularity transitions published atomically
//! - Background persistence of closed buckets through a pluggable store
//!
//! # Example
//!
//! ```
//! use kuba_buckets::{EngineConfig, Granularity, TimeseriesDatabase, TimeseriesOptions};
//! use serde_json::json;
//!
//! # #[tokio::main]
//! # async fn main() -> kuba_buckets::Result<()> {
//! let db = TimeseriesDatabase::in_memory(EngineConfig::default());
//! db.create_collection("cpu", TimeseriesOptions::new("t"))?;
//!
//! db.insert("cpu", &json!({"t": 0, "usage": 0.4}))?;
//! db.insert("cpu", &json!({"t": 3_599_999, "usage": 0.5}))?;
//! assert_eq!(db.bucket_count("cpu")?, 1);
//!
//! db.coll_mod_granularity("cpu", Granularity::Minutes)?;
//! db.insert("cpu", &json!({"t": 7_200_000, "usage": 0.6}))?;
//! assert_eq!(db.bucket_count("cpu")?, 1);
//! # db.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod bucket;
pub mod collection;
pub mod error;
pub mod granularity;
pub mod storage;
pub mod types;

/// Prometheus metrics and telemetry
pub mod metrics;

/// Configuration management with TOML support
pub mod config;

/// Document validation ahead of bucket assignment
pub mod ingestion;

/// Collection registry and lifecycle
pub mod database;

// Re-export main types
pub use bucket::{Assignment, Bucket, BucketCatalog, InsertOutcome};
pub use collection::{Collection, GranularityTransitionValidator, Transition};
pub use config::{EngineConfig, TimeseriesOptions};
pub use database::TimeseriesDatabase;
pub use error::{Error, Result};
pub use granularity::{Granularity, GranularityPolicy};
pub use types::{GroupingKey, Measurement, Timestamp};
