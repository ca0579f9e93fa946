// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Remembers computed dwell predictions so the same vehicle approaching the
//! same stop at the same scheduled instant is not recomputed.

use crate::clock::Clock;
use crate::dwell::request::DwellRequest;
use crate::time_bucket::{BucketWidth, floor_to_bucket};
use scc::HashMap as SccHashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PredictionContext {
    pub trip_id: String,
    pub stop_position: u32,
    pub vehicle_id: String,
    pub scheduled_bucket_ms: i64,
}

impl PredictionContext {
    /// `None` when the request has no scheduled time to bucket.
    pub fn for_request(request: &DwellRequest, width: BucketWidth) -> Option<Self> {
        request.scheduled_arrival_ms.map(|scheduled| Self {
            trip_id: request.trip_id.clone(),
            stop_position: request.stop_position,
            vehicle_id: request.vehicle_id.clone(),
            scheduled_bucket_ms: floor_to_bucket(scheduled, width),
        })
    }
}

#[derive(Clone, Copy, Debug)]
struct CachedDwell {
    value_ms: i64,
    stored_at_ms: i64,
}

pub struct DwellContextCache {
    entries: SccHashMap<PredictionContext, CachedDwell>,
    retention_ms: i64,
    clock: Arc<dyn Clock>,
}

impl DwellContextCache {
    pub fn new(retention_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: SccHashMap::new(),
            retention_ms,
            clock,
        }
    }

    pub fn get(&self, context: &PredictionContext) -> Option<i64> {
        let cutoff = self.clock.now_ms() - self.retention_ms;
        self.entries
            .read(context, |_, cached| {
                (cached.stored_at_ms >= cutoff).then_some(cached.value_ms)
            })
            .flatten()
    }

    pub fn put(&self, context: PredictionContext, value_ms: i64) {
        let cached = CachedDwell {
            value_ms,
            stored_at_ms: self.clock.now_ms(),
        };
        self.entries
            .entry(context)
            .and_modify(|existing| *existing = cached)
            .or_insert(cached);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn evict(&self) -> usize {
        let cutoff = self.clock.now_ms() - self.retention_ms;
        let mut removed = 0;
        self.entries.retain(|_, cached| {
            let keep = cached.stored_at_ms >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}
