//! Bucket granularity levels and the fixed span policy
//!
//! A granularity bounds how much time a single bucket may cover. The table
//! is flat: spans are plain durations measured from a bucket's
//! first measurement, never calendar-aligned windows.
//!
//! | Granularity | Rank | Max bucket span |
//! |-------------|------|-----------------|
//! | seconds     | 0    | 1 hour          |
//! | minutes     | 1    | 1 day           |
//! | hours       | 2    | 30 days         |

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Max span per granularity, indexed by rank
const MAX_SPAN_MS: [i64; 3] = [MS_PER_HOUR, MS_PER_DAY, 30 * MS_PER_DAY];

/// Time granularity of a time-series collection
///
/// Totally ordered by coarseness: `Seconds < Minutes < Hours`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum Granularity {
    /// Buckets span at most one hour
    #[default]
    Seconds = 0,
    /// Buckets span at most one day
    Minutes = 1,
    /// Buckets span at most thirty days
    Hours = 2,
}

impl Granularity {
    /// All granularities in rank order
    pub const ALL: [Granularity; 3] = [Granularity::Seconds, Granularity::Minutes, Granularity::Hours];

    /// Ordinal rank used for transition validation
    #[inline]
    pub const fn rank(self) -> u8 {
        self as u8
    }

    /// Maximum bucket span in milliseconds
    #[inline]
    pub const fn max_span_ms(self) -> i64 {
        MAX_SPAN_MS[self as usize]
    }

    /// Maximum bucket span
    #[inline]
    pub const fn max_span(self) -> Duration {
        Duration::from_millis(self.max_span_ms() as u64)
    }

    /// Look up a granularity by rank
    pub const fn from_rank(rank: u8) -> Option<Self> {
        match rank {
            0 => Some(Granularity::Seconds),
            1 => Some(Granularity::Minutes),
            2 => Some(Granularity::Hours),
            _ => None,
        }
    }

    /// Lowercase name, as accepted by `FromStr`
    pub const fn as_str(self) -> &'static str {
        match self {
            Granularity::Seconds => "seconds",
            Granularity::Minutes => "minutes",
            Granularity::Hours => "hours",
        }
    }
}

impl fmt::Display for Granularity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Granularity {
    type Err = ConfigurationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "seconds" => Ok(Granularity::Seconds),
            "minutes" => Ok(Granularity::Minutes),
            "hours" => Ok(Granularity::Hours),
            other => Err(ConfigurationError::InvalidGranularity(other.to_string())),
        }
    }
}

/// Stateless lookup consulted by the assigner and the transition validator
#[derive(Debug, Clone, Copy, Default)]
pub struct GranularityPolicy;

impl GranularityPolicy {
    /// Maximum span a bucket may cover under `granularity`
    #[inline]
    pub const fn max_span(granularity: Granularity) -> Duration {
        granularity.max_span()
    }

    /// Maximum span in milliseconds, the unit used for timestamp arithmetic
    #[inline]
    pub const fn max_span_ms(granularity: Granularity) -> i64 {
        granularity.max_span_ms()
    }

    /// Ordinal rank: seconds=0, minutes=1, hours=2
    #[inline]
    pub const fn rank(granularity: Granularity) -> u8 {
        granularity.rank()
    }
}
