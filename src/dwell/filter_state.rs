// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::clock::Clock;
use crate::lookups::LookupError;
use scc::HashMap as SccHashMap;
use std::sync::Arc;

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct FilterKey {
    pub trip_id: String,
    pub stop_position: u32,
}

impl FilterKey {
    pub fn new(trip_id: &str, stop_position: u32) -> Self {
        Self {
            trip_id: trip_id.to_string(),
            stop_position,
        }
    }
}

/// Last filter error per (trip, stop position). Absence means the filter has
/// not run there yet.
pub trait FilterStateStore: Send + Sync {
    fn last_error(&self, key: &FilterKey) -> Result<Option<f64>, LookupError>;
    fn put_error(&self, key: FilterKey, error: f64) -> Result<(), LookupError>;
}

#[derive(Clone, Copy, Debug, PartialEq)]
struct KalmanError {
    error: f64,
    updated_at_ms: i64,
}

pub struct KalmanErrorCache {
    errors: SccHashMap<FilterKey, KalmanError>,
    retention_ms: i64,
    clock: Arc<dyn Clock>,
}

impl KalmanErrorCache {
    pub fn new(retention_ms: i64, clock: Arc<dyn Clock>) -> Self {
        Self {
            errors: SccHashMap::new(),
            retention_ms,
            clock,
        }
    }

    pub fn len(&self) -> usize {
        self.errors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn evict(&self) -> usize {
        let cutoff = self.clock.now_ms() - self.retention_ms;
        let mut removed = 0;
        self.errors.retain(|_, entry| {
            let keep = entry.updated_at_ms >= cutoff;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

impl FilterStateStore for KalmanErrorCache {
    fn last_error(&self, key: &FilterKey) -> Result<Option<f64>, LookupError> {
        let cutoff = self.clock.now_ms() - self.retention_ms;
        Ok(self
            .errors
            .read(key, |_, entry| (entry.updated_at_ms >= cutoff).then_some(entry.error))
            .flatten())
    }

    /// Overwrites; the previous error is not blended in.
    fn put_error(&self, key: FilterKey, error: f64) -> Result<(), LookupError> {
        let entry = KalmanError {
            error,
            updated_at_ms: self.clock.now_ms(),
        };
        self.errors
            .entry(key)
            .and_modify(|existing| *existing = entry)
            .or_insert(entry);
        Ok(())
    }
}
