// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::apc::{ApcHistory, ApcMatch, ApcMatcher};
use crate::clock::Clock;
use crate::config::{ConfigError, DwellConfig};
use crate::dwell::{
    ApcKalmanStrategy, DwellContextCache, DwellPredictor, DwellRequest, DwellStrategy,
    KalmanErrorCache, ScheduledDwell,
};
use crate::lookups::VehicleDoorCounts;
use crate::metrics::MetricsSink;
use crate::models::{ApcObservation, ArrivalDepartureEvent, Prediction};
use crate::stop_arrival_departure_cache::{StopArrivalDepartureCache, StopDayKey};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EvictionReport {
    pub events: usize,
    pub apc_days: usize,
    pub filter_errors: usize,
    pub contexts: usize,
}

impl EvictionReport {
    pub fn total(&self) -> usize {
        self.events + self.apc_days + self.filter_errors + self.contexts
    }
}

/// Owns every cache and index the dwell pipeline reads, and the predictor
/// built on top of them. Construct once and share behind an `Arc`.
pub struct DwellService {
    config: Arc<DwellConfig>,
    stop_cache: Arc<StopArrivalDepartureCache>,
    history: Arc<ApcHistory>,
    door_counts: Arc<VehicleDoorCounts>,
    filter_errors: Arc<KalmanErrorCache>,
    contexts: Arc<DwellContextCache>,
    predictor: DwellPredictor,
}

impl DwellService {
    pub fn new(
        config: Arc<DwellConfig>,
        clock: Arc<dyn Clock>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let retention_ms = config.retention_ms();
        let stop_cache = Arc::new(StopArrivalDepartureCache::new(
            retention_ms,
            config.timezone,
            clock.clone(),
        ));
        let history = Arc::new(ApcHistory::new(
            stop_cache.clone(),
            clock.clone(),
            config.max_headway_secs,
            config.max_kalman_days as u32,
            retention_ms,
        ));
        let door_counts = Arc::new(VehicleDoorCounts::new());
        let filter_errors = Arc::new(KalmanErrorCache::new(retention_ms, clock.clone()));
        let contexts = Arc::new(DwellContextCache::new(retention_ms, clock));

        let apc = ApcKalmanStrategy::new(
            config.clone(),
            history.clone(),
            door_counts.clone(),
            history.clone(),
            filter_errors.clone(),
            contexts.clone(),
            metrics,
        );
        let strategies: Vec<Arc<dyn DwellStrategy>> = vec![
            Arc::new(apc),
            Arc::new(ScheduledDwell::new(config.baseline_dwell_ms)),
        ];
        let predictor = DwellPredictor::new(strategies, config.baseline_dwell_ms);

        Ok(Self {
            config,
            stop_cache,
            history,
            door_counts,
            filter_errors,
            contexts,
            predictor,
        })
    }

    pub fn config(&self) -> &DwellConfig {
        &self.config
    }

    pub fn stop_cache(&self) -> &Arc<StopArrivalDepartureCache> {
        &self.stop_cache
    }

    pub fn history(&self) -> &Arc<ApcHistory> {
        &self.history
    }

    pub fn set_apc_enabled(&self, enabled: bool) {
        self.history.set_enabled(enabled);
    }

    pub fn ingest_arrival_departure(&self, event: &ArrivalDepartureEvent) -> Option<StopDayKey> {
        if let Err(e) = event.validate() {
            warn!(%event, "dropping arrival/departure: {}", e);
            return None;
        }
        self.stop_cache.put(event)
    }

    /// Correlates one batch of passenger counts against the cached
    /// arrivals/departures around it and folds the matches into the
    /// history. Returns one match per input observation.
    pub fn ingest_apc(&self, batch: &[ApcObservation]) -> Vec<ApcMatch> {
        for observation in batch {
            if let Some(doors) = observation.door_count {
                self.door_counts.record(&observation.vehicle_id, doors);
            }
        }

        let times = batch.iter().map(|o| o.arrival_epoch_ms);
        let (Some(earliest), Some(latest)) = (times.clone().min(), times.max()) else {
            return Vec::new();
        };

        let matcher_config = self.config.matcher_config();
        let pad = matcher_config.bucket_width.as_ms()
            * (1 + i64::from(matcher_config.widening_buckets));
        let events = self.stop_cache.events_between(earliest - pad, latest + pad + 1);
        debug!(
            events = events.len(),
            observations = batch.len(),
            "correlating apc batch"
        );

        let matcher = ApcMatcher::new(events, matcher_config);
        let matches = matcher.match_records(batch);
        let matched = matches.iter().filter(|m| m.is_matched()).count();
        let recorded = self.history.record_matches(&matches);

        info!(
            observations = batch.len(),
            matched, recorded, "processed apc batch"
        );
        matches
    }

    pub fn predict(&self, request: &DwellRequest) -> Prediction {
        self.predictor.predict(request)
    }

    pub fn evict_all(&self) -> EvictionReport {
        EvictionReport {
            events: self.stop_cache.evict(),
            apc_days: self.history.evict(),
            filter_errors: self.filter_errors.evict(),
            contexts: self.contexts.evict(),
        }
    }

    /// Runs [`DwellService::evict_all`] every `period` until the handle is
    /// aborted.
    pub fn spawn_eviction_task(self: Arc<Self>, period: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            loop {
                ticker.tick().await;
                let report = self.evict_all();
                if report.total() > 0 {
                    info!(?report, "evicted expired dwell state");
                }
            }
        })
    }
}
