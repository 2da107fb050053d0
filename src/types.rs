//! Core data types used throughout the bucket engine
//!
//! # Key Types
//!
//! - **`Timestamp`**: Milliseconds since the Unix epoch
//! - **`GroupingKey`**: Identity under which buckets are tracked independently
//! - **`BucketId`**: Stable identifier for a bucket record
//! - **`Measurement`**: A single time-stamped input document
//!
//! # Example
//!
//! ```rust
//! use kuba_buckets::types::{GroupingKey, Measurement};
//! use serde_json::json;
//!
//! let m = Measurement::new(GroupingKey::Global, 1_619_121_600_000)
//!     .with_field("temp", json!(21.5));
//! assert_eq!(m.payload.len(), 1);
//! ```

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// Milliseconds since the Unix epoch
pub type Timestamp = i64;

/// Key under which a collection tracks one open bucket at a time
///
/// Collections without a meta field put every measurement under
/// `GroupingKey::Global`. When a meta field is configured, its value
/// (in canonical JSON form) becomes the key. The catalog treats the key
/// as opaque and only relies on `Eq + Hash`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum GroupingKey {
    /// Single key used when no metadata partitioning is configured
    #[default]
    Global,
    /// Key derived from a metadata value
    Meta(String),
}

impl GroupingKey {
    /// Build a key from a metadata value
    ///
    /// `null` maps to the global key, matching documents that omit the field.
    pub fn from_meta(value: &Value) -> Self {
        match value {
            Value::Null => GroupingKey::Global,
            other => {
                let mut canonical = String::new();
                write_canonical(other, &mut canonical);
                GroupingKey::Meta(canonical)
            }
        }
    }

    /// Whether this is the global key
    pub fn is_global(&self) -> bool {
        matches!(self, GroupingKey::Global)
    }
}

impl fmt::Display for GroupingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GroupingKey::Global => f.write_str("<global>"),
            GroupingKey::Meta(meta) => f.write_str(meta),
        }
    }
}

/// Render JSON with object keys sorted at every level
fn write_canonical(value: &Value, out: &mut String) {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            out.push('{');
            for (i, key) in keys.into_iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                out.push_str(&Value::String(key.clone()).to_string());
                out.push(':');
                write_canonical(&map[key], out);
            }
            out.push('}');
        }
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_canonical(item, out);
            }
            out.push(']');
        }
        scalar => out.push_str(&scalar.to_string()),
    }
}

/// Process-wide bucket id counter so ids never collide across collections
static NEXT_BUCKET_ID: AtomicU64 = AtomicU64::new(1);

/// Stable identifier for a bucket record
///
/// Ids are allocated from a process-wide monotonic counter, so a newer
/// bucket always has a larger id than an older one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BucketId(pub u64);

impl BucketId {
    /// Allocate the next id
    pub fn next() -> Self {
        Self(NEXT_BUCKET_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for BucketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "bucket-{:016x}", self.0)
    }
}

/// A single measurement routed to bucket assignment
///
/// The time field has already been extracted and validated; `payload`
/// holds the remaining document fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    /// Grouping key this measurement belongs to
    pub key: GroupingKey,
    /// Measurement time
    pub timestamp: Timestamp,
    /// Remaining document fields
    #[serde(default)]
    pub payload: Map<String, Value>,
}

impl Measurement {
    /// Create a measurement with an empty payload
    pub fn new(key: GroupingKey, timestamp: Timestamp) -> Self {
        Self {
            key,
            timestamp,
            payload: Map::new(),
        }
    }

    /// Add a payload field
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.payload.insert(name.into(), value);
        self
    }
}
