// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::MS_PER_DAY;
use crate::clock::ManualClock;
use crate::config::DwellConfig;
use crate::dwell::boarding::{boarding_time_secs, raw_dwell_ms};
use crate::dwell::filter_state::{FilterKey, FilterStateStore, KalmanErrorCache};
use crate::dwell::kalman;
use crate::dwell::{
    ApcKalmanStrategy, DwellContextCache, DwellPredictor, DwellRequest, DwellStrategy,
    ScheduledDwell,
};
use crate::lookups::{ApcFeedStatus, HistoricalIndex, LookupError, VehicleDoorCounts};
use crate::metrics::InMemoryMetrics;
use crate::models::Prediction;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

const ARRIVAL: i64 = 1_619_016_000_000;

struct StubIndex {
    headway_ms: Result<Option<i64>, LookupError>,
    rate: Result<Option<f64>, LookupError>,
    /// index 0 is the day before the arrival
    dwells: Vec<Option<i64>>,
    dwell_calls: AtomicUsize,
}

impl StubIndex {
    fn healthy(dwells: Vec<Option<i64>>) -> Self {
        Self {
            headway_ms: Ok(Some(600_000)),
            rate: Ok(Some(0.01)),
            dwells,
            dwell_calls: AtomicUsize::new(0),
        }
    }
}

impl HistoricalIndex for StubIndex {
    fn last_headway_ms(&self, _: &str, _: &str, _: i64) -> Result<Option<i64>, LookupError> {
        self.headway_ms.clone()
    }

    fn boardings_per_second(
        &self,
        _: &str,
        _: &str,
        _: &str,
        _: i64,
    ) -> Result<Option<f64>, LookupError> {
        self.rate.clone()
    }

    fn historical_dwell_ms(&self, _: &str, _: &str, at_ms: i64) -> Result<Option<i64>, LookupError> {
        self.dwell_calls.fetch_add(1, Ordering::SeqCst);
        let days_back = (ARRIVAL - at_ms + MS_PER_DAY / 2).div_euclid(MS_PER_DAY) as usize;
        Ok(days_back
            .checked_sub(1)
            .and_then(|i| self.dwells.get(i).copied().flatten()))
    }
}

struct StubFeed(bool);

impl ApcFeedStatus for StubFeed {
    fn has_apc_data(&self) -> bool {
        self.0
    }
}

struct BrokenStore;

impl FilterStateStore for BrokenStore {
    fn last_error(&self, _: &FilterKey) -> Result<Option<f64>, LookupError> {
        Err(LookupError::Backend("connection reset".to_string()))
    }

    fn put_error(&self, _: FilterKey, _: f64) -> Result<(), LookupError> {
        Err(LookupError::Backend("connection reset".to_string()))
    }
}

struct Harness {
    index: Arc<StubIndex>,
    filters: Arc<KalmanErrorCache>,
    contexts: Arc<DwellContextCache>,
    metrics: Arc<InMemoryMetrics>,
    predictor: DwellPredictor,
}

fn build(config: DwellConfig, index: StubIndex, feed: bool, broken_store: bool) -> Harness {
    let config = Arc::new(config);
    let clock = Arc::new(ManualClock::new(ARRIVAL));
    let index = Arc::new(index);
    let filters = Arc::new(KalmanErrorCache::new(config.retention_ms(), clock.clone()));
    let contexts = Arc::new(DwellContextCache::new(config.retention_ms(), clock));
    let metrics = Arc::new(InMemoryMetrics::new());

    let store: Arc<dyn FilterStateStore> = if broken_store {
        Arc::new(BrokenStore)
    } else {
        filters.clone()
    };

    let apc = ApcKalmanStrategy::new(
        config.clone(),
        index.clone(),
        Arc::new(VehicleDoorCounts::new()),
        Arc::new(StubFeed(feed)),
        store,
        contexts.clone(),
        metrics.clone(),
    );
    let strategies: Vec<Arc<dyn DwellStrategy>> = vec![
        Arc::new(apc),
        Arc::new(ScheduledDwell::new(config.baseline_dwell_ms)),
    ];
    let predictor = DwellPredictor::new(strategies, config.baseline_dwell_ms);

    Harness {
        index,
        filters,
        contexts,
        metrics,
        predictor,
    }
}

fn request(stop_position: u32) -> DwellRequest {
    DwellRequest {
        trip_id: "trip-1".to_string(),
        route_id: "42".to_string(),
        stop_id: "stop-9".to_string(),
        stop_position,
        vehicle_id: "8101".to_string(),
        scheduled_arrival_ms: Some(ARRIVAL),
        schedule_deviation_ms: 0,
        boarding_type: None,
        scheduled_dwell_ms: None,
    }
}

/// 0.01 boardings/s over a 600 s headway with default boarding settings.
fn expected_raw_dwell() -> f64 {
    let config = DwellConfig::default();
    raw_dwell_ms(0.01, 600.0, boarding_time_secs(&config, 0.01, 600.0, None, None))
}

#[test]
fn first_stop_uses_baseline_without_touching_caches() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![Some(20_000); 5]),
        true,
        false,
    );

    assert_eq!(h.predictor.predict(&request(0)), Prediction::baseline(10_000));
    assert!(h.contexts.is_empty());
    assert!(h.filters.is_empty());
    assert!(h.metrics.summary().is_empty());
    assert_eq!(h.index.dwell_calls.load(Ordering::SeqCst), 0);
}

#[test]
fn disabled_feed_uses_baseline() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![Some(20_000); 5]),
        false,
        false,
    );

    assert_eq!(h.predictor.predict(&request(3)), Prediction::baseline(10_000));
    assert_eq!(h.metrics.misses("PredictionDwellHit"), 1);
}

#[test]
fn scheduled_dwell_is_the_baseline_when_present() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![]),
        false,
        false,
    );
    let mut req = request(3);
    req.scheduled_dwell_ms = Some(4_000);

    assert_eq!(h.predictor.predict(&req), Prediction::baseline(4_000));
}

#[test]
fn long_headway_uses_baseline() {
    let mut index = StubIndex::healthy(vec![Some(20_000); 5]);
    index.headway_ms = Ok(Some(7_201_000));
    let h = build(DwellConfig::default(), index, true, false);

    assert_eq!(h.predictor.predict(&request(3)), Prediction::baseline(10_000));
    assert_eq!(h.metrics.misses("PredictionDwellHeadwayHit"), 1);
    assert!(h.contexts.is_empty());
}

#[test]
fn headway_at_the_limit_is_still_real() {
    let mut index = StubIndex::healthy(vec![Some(20_000); 5]);
    index.headway_ms = Ok(Some(7_200_000));
    let h = build(DwellConfig::default(), index, true, false);

    assert_eq!(h.predictor.predict(&request(3)).method, Prediction::apc(0).method);
}

#[test]
fn sparse_history_is_empty_dwell_when_allowed() {
    let history = vec![Some(20_000), None, Some(25_000)];

    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(history.clone()),
        true,
        false,
    );
    assert_eq!(h.predictor.predict(&request(3)), Prediction::apc(0));
    assert_eq!(h.metrics.misses("PredictionDwellHistoryHit"), 1);
    assert!(h.filters.is_empty());

    let config = DwellConfig {
        allow_empty_dwell: false,
        ..DwellConfig::default()
    };
    let h = build(config, StubIndex::healthy(history), true, false);
    assert_eq!(h.predictor.predict(&request(3)), Prediction::baseline(10_000));
}

#[test]
fn identical_history_returns_its_average() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![Some(20_000); 3]),
        true,
        false,
    );

    assert_eq!(h.predictor.predict(&request(3)), Prediction::apc(20_000));
    assert_eq!(
        h.filters.last_error(&FilterKey::new("trip-1", 3)),
        Ok(Some(0.0))
    );
    assert_eq!(h.metrics.hits("PredictionDwellHit"), 1);
    assert_eq!(h.metrics.duration_samples("PredictionApcProcessingTime"), 1);
}

#[test]
fn filter_error_carries_into_the_next_prediction() {
    let samples = [10_000, 20_000, 30_000];
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(samples.iter().copied().map(Some).collect()),
        true,
        false,
    );
    let raw = expected_raw_dwell();

    let first = kalman::update(raw, &samples, 50.0).unwrap();
    assert_eq!(
        h.predictor.predict(&request(3)),
        Prediction::apc(first.prediction as i64)
    );
    let stored = h
        .filters
        .last_error(&FilterKey::new("trip-1", 3))
        .unwrap()
        .unwrap();
    assert!((stored - first.filter_error).abs() < 1e-6);

    // a later scheduled time misses the context cache and runs the filter again
    let mut later = request(3);
    later.scheduled_arrival_ms = Some(ARRIVAL + 10 * 60 * 1000);
    let second = kalman::update(raw, &samples, stored).unwrap();
    let predicted = h.predictor.predict(&later);
    assert_eq!(predicted, Prediction::apc(second.prediction as i64));
}

#[test]
fn repeat_request_is_served_from_context_cache() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![Some(10_000), Some(20_000), Some(30_000)]),
        true,
        false,
    );

    let first = h.predictor.predict(&request(3));
    let calls = h.index.dwell_calls.load(Ordering::SeqCst);
    let second = h.predictor.predict(&request(3));

    assert_eq!(first, second);
    assert_eq!(h.index.dwell_calls.load(Ordering::SeqCst), calls);
    assert_eq!(h.metrics.hits("PredictionDwellApcProcessingHit"), 1);
    assert_eq!(h.metrics.misses("PredictionDwellApcProcessingHit"), 1);
    assert_eq!(h.contexts.len(), 1);
}

#[test]
fn history_search_stops_at_max_days() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![Some(20_000); 21]),
        true,
        false,
    );

    assert_eq!(h.predictor.predict(&request(3)), Prediction::apc(20_000));
    assert_eq!(h.index.dwell_calls.load(Ordering::SeqCst), 5);
}

#[test]
fn history_search_gives_up_after_search_window() {
    let mut history = vec![None; 30];
    history[0] = Some(20_000);
    history[25] = Some(20_000);
    history[26] = Some(20_000);
    let h = build(DwellConfig::default(), StubIndex::healthy(history), true, false);

    assert_eq!(h.predictor.predict(&request(3)), Prediction::apc(0));
    assert_eq!(h.index.dwell_calls.load(Ordering::SeqCst), 21);
}

#[test]
fn unreadable_filter_state_starts_from_initial_error() {
    let samples = [10_000, 20_000, 30_000];
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(samples.iter().copied().map(Some).collect()),
        true,
        true,
    );

    let expected = kalman::update(expected_raw_dwell(), &samples, 50.0).unwrap();
    assert_eq!(
        h.predictor.predict(&request(3)),
        Prediction::apc(expected.prediction as i64)
    );
}

#[test]
fn failed_rate_lookup_uses_configured_default() {
    let failing_rate = || StubIndex {
        rate: Err(LookupError::Unavailable("rate index".to_string())),
        ..StubIndex::healthy(vec![Some(20_000); 5])
    };

    let h = build(DwellConfig::default(), failing_rate(), true, false);
    assert_eq!(h.predictor.predict(&request(3)), Prediction::baseline(10_000));
    assert_eq!(h.metrics.misses("PredictionDwellApcHit"), 1);

    let config = DwellConfig {
        default_boardings_per_second: Some(0.01),
        ..DwellConfig::default()
    };
    let h = build(config, failing_rate(), true, false);
    assert_eq!(h.predictor.predict(&request(3)), Prediction::apc(20_000));
}

#[test]
fn failed_headway_lookup_uses_baseline() {
    let mut index = StubIndex::healthy(vec![Some(20_000); 5]);
    index.headway_ms = Err(LookupError::Backend("timeout".to_string()));
    let h = build(DwellConfig::default(), index, true, false);

    assert_eq!(h.predictor.predict(&request(3)), Prediction::baseline(10_000));
}

#[test]
fn missing_scheduled_arrival_uses_baseline() {
    let h = build(
        DwellConfig::default(),
        StubIndex::healthy(vec![Some(20_000); 5]),
        true,
        false,
    );
    let mut req = request(3);
    req.scheduled_arrival_ms = None;

    assert_eq!(h.predictor.predict(&req), Prediction::baseline(10_000));
}
