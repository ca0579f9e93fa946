// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Coarse join keys: an owner (vehicle or stop) plus a timestamp floored to
//! a fixed-width window.

use crate::MS_PER_MIN;
use serde::{Deserialize, Serialize};

/// Width of a bucket. Writers and readers of the same index must be built
/// from the same value or the match rate silently drops.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BucketWidth {
    ms: i64,
}

impl BucketWidth {
    /// Zero is clamped to one minute.
    pub fn from_minutes(minutes: u32) -> Self {
        Self {
            ms: i64::from(minutes.max(1)) * MS_PER_MIN,
        }
    }

    pub fn as_ms(&self) -> i64 {
        self.ms
    }
}

impl Default for BucketWidth {
    fn default() -> Self {
        Self::from_minutes(5)
    }
}

/// Floor-truncates `ts_ms` to the start of its bucket. A timestamp exactly on
/// a boundary belongs to the bucket that begins there.
pub fn floor_to_bucket(ts_ms: i64, width: BucketWidth) -> i64 {
    ts_ms.div_euclid(width.ms) * width.ms
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TimeBucketKey {
    pub owner_id: String,
    pub bucket_start_ms: i64,
}

impl TimeBucketKey {
    pub fn new(owner_id: &str, ts_ms: i64, width: BucketWidth) -> Self {
        Self {
            owner_id: owner_id.to_string(),
            bucket_start_ms: floor_to_bucket(ts_ms, width),
        }
    }

    /// The exact bucket followed by `buckets` neighbours on each side,
    /// nearest first.
    pub fn widened(owner_id: &str, ts_ms: i64, width: BucketWidth, buckets: u32) -> Vec<Self> {
        let exact = Self::new(owner_id, ts_ms, width);
        let mut keys = Vec::with_capacity(1 + 2 * buckets as usize);

        for offset in 1..=i64::from(buckets) {
            keys.push(Self {
                owner_id: owner_id.to_string(),
                bucket_start_ms: exact.bucket_start_ms - offset * width.ms,
            });
            keys.push(Self {
                owner_id: owner_id.to_string(),
                bucket_start_ms: exact.bucket_start_ms + offset * width.ms,
            });
        }

        keys.insert(0, exact);
        keys
    }
}
