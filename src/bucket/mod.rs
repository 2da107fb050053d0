//! Buckets, the open-bucket catalog, and measurement assignment
//!
//! - `record`: the `Bucket` record and its open/closed lifecycle
//! - `catalog`: per-key index of open buckets with per-key critical sections
//! - `assigner`: join-or-rotate decision for each measurement

/// Join-or-rotate decisions
pub mod assigner;
/// Open bucket index
pub mod catalog;
/// Bucket records
pub mod record;

pub use assigner::{Assignment, BucketAssigner, InsertOutcome};
pub use catalog::{BucketCatalog, CatalogStats, KeyEntry};
pub use record::{Bucket, BucketState, BucketSummary, CloseReason};
