// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Matches passenger counter pings to AVL arrivals/departures. The two feeds
//! come from different systems with different clocks, so the join is on a
//! coarse (vehicle, time bucket) key instead of exact timestamps.

use crate::config::MatcherConfig;
use crate::models::{ApcObservation, ArrivalDepartureEvent};
use crate::time_bucket::TimeBucketKey;
use ahash::{AHashMap, AHashSet};
use rayon::prelude::*;
use serde::Serialize;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{debug, info};

const PARALLEL_MATCH_THRESHOLD: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ApcMatch {
    pub observation: ApcObservation,
    /// empty when nothing shared the bucket, more than one when the bucket was ambiguous
    pub events: Vec<ArrivalDepartureEvent>,
}

impl ApcMatch {
    pub fn is_matched(&self) -> bool {
        !self.events.is_empty()
    }

    /// The matched event closest in time to the observation.
    pub fn nearest_event(&self) -> Option<&ArrivalDepartureEvent> {
        self.events
            .iter()
            .min_by_key(|e| (e.time_ms - self.observation.arrival_epoch_ms).abs())
    }
}

/// Index over one fixed snapshot of arrivals/departures. Build a new matcher
/// to match against a new snapshot.
pub struct ApcMatcher {
    events: Vec<ArrivalDepartureEvent>,
    config: MatcherConfig,
    index: OnceLock<AHashMap<TimeBucketKey, Vec<usize>>>,
    builds: AtomicUsize,
}

impl ApcMatcher {
    pub fn new(events: Vec<ArrivalDepartureEvent>, config: MatcherConfig) -> Self {
        Self {
            events,
            config,
            index: OnceLock::new(),
            builds: AtomicUsize::new(0),
        }
    }

    fn index(&self) -> &AHashMap<TimeBucketKey, Vec<usize>> {
        self.index.get_or_init(|| self.build_index())
    }

    fn build_index(&self) -> AHashMap<TimeBucketKey, Vec<usize>> {
        self.builds.fetch_add(1, Ordering::SeqCst);

        let mut index: AHashMap<TimeBucketKey, Vec<usize>> = AHashMap::new();
        let mut count = 0;

        for (position, event) in self.events.iter().enumerate() {
            if event.vehicle_id.is_empty() {
                info!(%event, "bad data, arrival/departure has no vehicle");
                continue;
            }
            if self.config.record_is_arrival && !event.is_arrival {
                continue;
            }

            index
                .entry(TimeBucketKey::new(
                    &event.vehicle_id,
                    event.time_ms,
                    self.config.bucket_width,
                ))
                .or_default()
                .push(position);

            count += 1;
            if count % 1000 == 0 {
                info!("caching {} of {}", count, self.events.len());
            }
        }

        debug!(
            buckets = index.len(),
            indexed = count,
            "built apc match index"
        );

        index
    }

    pub fn index_len(&self) -> usize {
        self.index().len()
    }

    /// One [`ApcMatch`] per input, in input order.
    pub fn match_records(&self, records: &[ApcObservation]) -> Vec<ApcMatch> {
        let index = self.index();
        let searched = AtomicUsize::new(0);

        let match_one = |apc: &ApcObservation| {
            let result = self.match_one(index, apc);
            let n = searched.fetch_add(1, Ordering::Relaxed) + 1;
            if n % 1000 == 0 {
                debug!("searched {} of {}", n, records.len());
            }
            result
        };

        if records.len() >= PARALLEL_MATCH_THRESHOLD {
            records.par_iter().map(match_one).collect()
        } else {
            records.iter().map(match_one).collect()
        }
    }

    fn match_one(
        &self,
        index: &AHashMap<TimeBucketKey, Vec<usize>>,
        apc: &ApcObservation,
    ) -> ApcMatch {
        if apc.vehicle_id.is_empty() {
            info!(?apc, "bad data, apc record has no vehicle");
            return ApcMatch {
                observation: apc.clone(),
                events: Vec::new(),
            };
        }

        let keys = TimeBucketKey::widened(
            &apc.vehicle_id,
            apc.arrival_epoch_ms,
            self.config.bucket_width,
            self.config.widening_buckets,
        );

        let mut seen = AHashSet::new();
        let mut events = Vec::new();
        for key in &keys {
            if let Some(positions) = index.get(key) {
                for &position in positions {
                    if seen.insert(position) {
                        events.push(self.events[position].clone());
                    }
                }
            }
        }

        if events.is_empty() && tracing::enabled!(tracing::Level::DEBUG) {
            let mut actual_keys: Vec<i64> = index
                .keys()
                .filter(|k| k.owner_id == apc.vehicle_id)
                .map(|k| k.bucket_start_ms)
                .collect();
            actual_keys.sort_unstable();
            debug!(
                vehicle = %apc.vehicle_id,
                searched = ?keys.iter().map(|k| k.bucket_start_ms).collect::<Vec<_>>(),
                actual = ?actual_keys,
                "no apc match"
            );
        }

        ApcMatch {
            observation: apc.clone(),
            events,
        }
    }

    #[cfg(test)]
    fn index_builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}
