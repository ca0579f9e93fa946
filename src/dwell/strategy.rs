// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::MS_PER_DAY;
use crate::MS_PER_SEC;
use crate::config::DwellConfig;
use crate::dwell::boarding::{boarding_time_secs, raw_dwell_ms};
use crate::dwell::context_cache::{DwellContextCache, PredictionContext};
use crate::dwell::filter_state::{FilterKey, FilterStateStore};
use crate::dwell::kalman;
use crate::dwell::request::DwellRequest;
use crate::lookups::{ApcFeedStatus, HistoricalIndex, VehicleConfigLookup};
use crate::metrics::MetricsSink;
use crate::models::Prediction;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

#[derive(Clone, Copy, Debug, PartialEq)]
pub enum StrategyOutcome {
    Predicted(Prediction),
    /// the strategy had nothing to say; the next one in the chain runs
    Declined(&'static str),
}

pub trait DwellStrategy: Send + Sync {
    fn name(&self) -> &'static str;
    fn attempt(&self, request: &DwellRequest) -> StrategyOutcome;
}

/// The non-APC dwell: whatever the schedule allows at the stop.
pub struct ScheduledDwell {
    default_dwell_ms: i64,
}

impl ScheduledDwell {
    pub fn new(default_dwell_ms: i64) -> Self {
        Self { default_dwell_ms }
    }
}

impl DwellStrategy for ScheduledDwell {
    fn name(&self) -> &'static str {
        "scheduled"
    }

    fn attempt(&self, request: &DwellRequest) -> StrategyOutcome {
        StrategyOutcome::Predicted(Prediction::baseline(
            request.scheduled_dwell_ms.unwrap_or(self.default_dwell_ms),
        ))
    }
}

/// Kalman dwell time after
/// <https://scholarcommons.usf.edu/cgi/viewcontent.cgi?article=1342&context=jpt>:
/// a real-time estimate from boarding rate and headway, blended with the
/// recent history of observed dwells at the stop.
pub struct ApcKalmanStrategy {
    config: Arc<DwellConfig>,
    index: Arc<dyn HistoricalIndex>,
    vehicles: Arc<dyn VehicleConfigLookup>,
    feed: Arc<dyn ApcFeedStatus>,
    filter_state: Arc<dyn FilterStateStore>,
    context_cache: Arc<DwellContextCache>,
    metrics: Arc<dyn MetricsSink>,
}

impl ApcKalmanStrategy {
    pub fn new(
        config: Arc<DwellConfig>,
        index: Arc<dyn HistoricalIndex>,
        vehicles: Arc<dyn VehicleConfigLookup>,
        feed: Arc<dyn ApcFeedStatus>,
        filter_state: Arc<dyn FilterStateStore>,
        context_cache: Arc<DwellContextCache>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            index,
            vehicles,
            feed,
            filter_state,
            context_cache,
            metrics,
        }
    }

    fn log_hit(&self) {
        self.metrics.record_outcome("PredictionDwellHit", true);
    }

    fn log_miss(&self) {
        self.metrics.record_outcome("PredictionDwellHit", false);
    }

    fn boardings_per_second(&self, request: &DwellRequest, arrival_ms: i64) -> Option<f64> {
        let rate = match self.index.boardings_per_second(
            &request.route_id,
            &request.trip_id,
            &request.stop_id,
            arrival_ms,
        ) {
            Ok(rate) => rate,
            Err(e) => {
                warn!(stop = %request.stop_id, "boarding rate lookup failed: {}", e);
                None
            }
        };

        rate.or(self.config.default_boardings_per_second)
    }

    fn headway_secs(&self, request: &DwellRequest, arrival_ms: i64) -> Option<i64> {
        let headway_ms =
            match self
                .index
                .last_headway_ms(&request.stop_id, &request.route_id, arrival_ms)
            {
                Ok(headway) => headway?,
                Err(e) => {
                    error!(stop = %request.stop_id, "headway lookup failed: {}", e);
                    return None;
                }
            };

        let headway_secs = headway_ms / MS_PER_SEC;
        if headway_secs > self.config.max_headway_secs {
            debug!(
                headway_secs,
                max = self.config.max_headway_secs,
                "headway too long to be a real headway"
            );
            return None;
        }
        Some(headway_secs)
    }

    fn door_count(&self, vehicle_id: &str) -> Option<u32> {
        match self.vehicles.door_count(vehicle_id) {
            Ok(Some(doors)) => Some(doors),
            Ok(None) => {
                error!(vehicle = vehicle_id, "vehicle has no configuration data");
                None
            }
            Err(e) => {
                error!(vehicle = vehicle_id, "vehicle configuration lookup failed: {}", e);
                None
            }
        }
    }

    /// Walks back a day at a time from the arrival, collecting at most
    /// `max_kalman_days` observed dwells.
    fn historical_dwells(&self, request: &DwellRequest, arrival_ms: i64) -> Vec<i64> {
        let mut dwells = Vec::with_capacity(self.config.max_kalman_days);

        for days_back in 1..=i64::from(self.config.max_kalman_days_to_search) {
            if dwells.len() >= self.config.max_kalman_days {
                break;
            }

            match self.index.historical_dwell_ms(
                &request.route_id,
                &request.stop_id,
                arrival_ms - days_back * MS_PER_DAY,
            ) {
                Ok(Some(dwell)) => {
                    debug!(dwell, days_back, stop = %request.stop_id, "historical dwell");
                    dwells.push(dwell);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(days_back, stop = %request.stop_id, "historical dwell lookup failed: {}", e);
                }
            }
        }

        dwells
    }

    fn last_prediction_error(&self, key: &FilterKey) -> f64 {
        match self.filter_state.last_error(key) {
            Ok(Some(error)) => error,
            Ok(None) => self.config.initial_error_value,
            Err(e) => {
                warn!(trip = %key.trip_id, "filter state unreadable: {}", e);
                self.config.initial_error_value
            }
        }
    }

    fn empty_dwell_or_decline(&self) -> StrategyOutcome {
        if self.config.allow_empty_dwell {
            StrategyOutcome::Predicted(Prediction::apc(0))
        } else {
            StrategyOutcome::Declined("not enough historical dwells")
        }
    }
}

impl DwellStrategy for ApcKalmanStrategy {
    fn name(&self) -> &'static str {
        "apc_kalman"
    }

    fn attempt(&self, request: &DwellRequest) -> StrategyOutcome {
        if request.is_start_of_trip() {
            debug!(trip = %request.trip_id, "start of trip, no apc dwell");
            return StrategyOutcome::Declined("start of trip");
        }

        let apc_timer = Instant::now();
        if !self.feed.has_apc_data() {
            debug!("exiting apc dwell time, no apc data");
            self.log_miss();
            return StrategyOutcome::Declined("no apc data");
        }

        let (Some(context), Some(arrival_ms)) = (
            PredictionContext::for_request(request, self.config.bucket_width()),
            request.adjusted_arrival_ms(),
        ) else {
            self.log_miss();
            return StrategyOutcome::Declined("no scheduled arrival");
        };

        if let Some(cached) = self.context_cache.get(&context) {
            self.metrics
                .record_outcome("PredictionDwellApcProcessingHit", true);
            return StrategyOutcome::Predicted(Prediction::apc(cached));
        }
        self.metrics
            .record_outcome("PredictionDwellApcProcessingHit", false);

        let par_timer = Instant::now();
        let Some(rate) = self.boardings_per_second(request, arrival_ms) else {
            debug!("exiting apc dwell time, no passenger arrival rate");
            self.metrics.record_outcome("PredictionDwellApcHit", false);
            self.log_miss();
            return StrategyOutcome::Declined("no boarding rate");
        };
        self.metrics.record_outcome("PredictionDwellApcHit", true);
        self.metrics
            .record_duration("PredictionApcPARProcessingTime", par_timer.elapsed());

        let headway_timer = Instant::now();
        let Some(headway_secs) = self.headway_secs(request, arrival_ms) else {
            self.metrics
                .record_outcome("PredictionDwellHeadwayHit", false);
            self.log_miss();
            return StrategyOutcome::Declined("no usable headway");
        };
        self.metrics.record_outcome("PredictionDwellHeadwayHit", true);
        self.metrics
            .record_duration("PredictionApcHeadwayProcessingTime", headway_timer.elapsed());

        let boarding_timer = Instant::now();
        let door_count = self.door_count(&request.vehicle_id);
        let headway = headway_secs as f64;
        let boarding_secs = boarding_time_secs(
            &self.config,
            rate,
            headway,
            request.boarding_type,
            door_count,
        );
        let raw_dwell = raw_dwell_ms(rate, headway, boarding_secs);
        debug!(
            "dwellTime={} = passengerArrivalRate={} * headway={} * boardingTime={}",
            raw_dwell, rate, headway_secs, boarding_secs
        );
        self.metrics.record_duration(
            "PredictionApcBoardingProcessingTime",
            boarding_timer.elapsed(),
        );

        let history_timer = Instant::now();
        let dwells = self.historical_dwells(request, arrival_ms);
        if dwells.len() < self.config.min_kalman_days {
            debug!(
                samples = dwells.len(),
                "exiting apc dwell time, not enough historical data"
            );
            self.metrics
                .record_outcome("PredictionDwellHistoryHit", false);
            self.log_miss();
            // either the stop is new or nobody boards there
            return self.empty_dwell_or_decline();
        }
        self.metrics.record_outcome("PredictionDwellHistoryHit", true);
        self.metrics
            .record_duration("PredictionApcHistoryProcessingTime", history_timer.elapsed());

        let predict_timer = Instant::now();
        let filter_key = FilterKey::new(&request.trip_id, request.stop_position);
        let prior_error = self.last_prediction_error(&filter_key);
        let Some(outcome) = kalman::update(raw_dwell, &dwells, prior_error) else {
            self.log_miss();
            return StrategyOutcome::Declined("filter had no samples");
        };

        if let Err(e) = self.filter_state.put_error(filter_key, outcome.filter_error) {
            warn!(trip = %request.trip_id, "could not store filter error: {}", e);
        }

        let value_ms = outcome.prediction as i64;
        self.context_cache.put(context, value_ms);

        self.log_hit();
        self.metrics
            .record_duration("PredictionApcProcessingTime", apc_timer.elapsed());
        self.metrics
            .record_duration("PredictionApcPredictProcessingTime", predict_timer.elapsed());

        StrategyOutcome::Predicted(Prediction::apc(value_ms))
    }
}
