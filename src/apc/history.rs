// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Boarding rates, headways and dwell times per (route, stop, service day),
//! built from matched passenger counts and the stop arrival/departure cache.

use crate::MS_PER_DAY;
use crate::MS_PER_SEC;
use crate::apc::matcher::ApcMatch;
use crate::clock::Clock;
use crate::lookups::{ApcFeedStatus, HistoricalIndex, LookupError};
use crate::models::ArrivalDepartureEvent;
use crate::stop_arrival_departure_cache::{StopArrivalDepartureCache, service_date_for};
use chrono::NaiveDate;
use scc::HashMap as SccHashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing::{debug, trace};

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct RouteStopDay {
    route_id: String,
    stop_id: String,
    service_date: NaiveDate,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct DailyApcTotals {
    pub boardings: u64,
    pub alightings: u64,
    pub observations: u32,
    /// boardings of observations that had a usable headway
    pub rated_boardings: u64,
    pub headway_secs: f64,
}

impl DailyApcTotals {
    pub fn boardings_per_second(&self) -> Option<f64> {
        if self.headway_secs > 0.0 {
            Some(self.rated_boardings as f64 / self.headway_secs)
        } else {
            None
        }
    }
}

pub struct ApcHistory {
    totals: SccHashMap<RouteStopDay, DailyApcTotals>,
    stop_cache: Arc<StopArrivalDepartureCache>,
    clock: Arc<dyn Clock>,
    enabled: AtomicBool,
    max_headway_ms: i64,
    rate_lookback_days: u32,
    retention_ms: i64,
}

impl ApcHistory {
    pub fn new(
        stop_cache: Arc<StopArrivalDepartureCache>,
        clock: Arc<dyn Clock>,
        max_headway_secs: i64,
        rate_lookback_days: u32,
        retention_ms: i64,
    ) -> Self {
        Self {
            totals: SccHashMap::new(),
            stop_cache,
            clock,
            enabled: AtomicBool::new(true),
            max_headway_ms: max_headway_secs * MS_PER_SEC,
            rate_lookback_days,
            retention_ms,
        }
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.enabled.store(enabled, Ordering::SeqCst);
    }

    fn key(&self, route_id: &str, stop_id: &str, at_ms: i64) -> Option<RouteStopDay> {
        service_date_for(at_ms, self.stop_cache.timezone()).map(|service_date| RouteStopDay {
            route_id: route_id.to_string(),
            stop_id: stop_id.to_string(),
            service_date,
        })
    }

    /// Gap to the previous arrival of another vehicle on the same route at
    /// the same stop, if it is short enough to be a real headway.
    fn headway_before(&self, event: &ArrivalDepartureEvent) -> Option<i64> {
        let history = self.stop_cache.get_for_time(&event.stop_id, event.time_ms);

        history
            .iter()
            .rev()
            .filter(|e| e.is_arrival && e.time_ms < event.time_ms)
            .find(|e| e.route_id == event.route_id && e.vehicle_id != event.vehicle_id)
            .map(|previous| event.time_ms - previous.time_ms)
            .filter(|headway| *headway <= self.max_headway_ms)
    }

    /// Folds matched observations into the daily totals. Returns how many
    /// observations were recorded.
    pub fn record_matches(&self, matches: &[ApcMatch]) -> usize {
        let mut recorded = 0;

        for apc_match in matches {
            let Some(event) = apc_match.nearest_event() else {
                continue;
            };
            let Some(key) = self.key(&event.route_id, &event.stop_id, event.time_ms) else {
                continue;
            };

            let observation = &apc_match.observation;
            let headway_secs = self
                .headway_before(event)
                .map(|ms| ms as f64 / MS_PER_SEC as f64);

            trace!(
                vehicle = %observation.vehicle_id,
                stop = %event.stop_id,
                boardings = observation.boardings,
                headway_secs,
                "recording apc observation"
            );

            let boardings = u64::from(observation.boardings);
            let alightings = u64::from(observation.alightings);
            let (rated_boardings, headway_secs) = match headway_secs {
                Some(secs) => (boardings, secs),
                None => (0, 0.0),
            };

            self.totals
                .entry(key)
                .and_modify(|totals| {
                    totals.boardings += boardings;
                    totals.alightings += alightings;
                    totals.observations += 1;
                    totals.rated_boardings += rated_boardings;
                    totals.headway_secs += headway_secs;
                })
                .or_insert(DailyApcTotals {
                    boardings,
                    alightings,
                    observations: 1,
                    rated_boardings,
                    headway_secs,
                });

            recorded += 1;
        }

        debug!(recorded, of = matches.len(), "recorded apc matches");
        recorded
    }

    pub fn totals_for(&self, route_id: &str, stop_id: &str, at_ms: i64) -> Option<DailyApcTotals> {
        let key = self.key(route_id, stop_id, at_ms)?;
        self.totals.read(&key, |_, totals| *totals)
    }

    pub fn len_days(&self) -> usize {
        self.totals.len()
    }

    /// Drops daily totals whose whole service day is past retention.
    pub fn evict(&self) -> usize {
        let Some(oldest_kept) =
            service_date_for(self.clock.now_ms() - self.retention_ms, self.stop_cache.timezone())
        else {
            return 0;
        };

        let mut removed = 0;
        self.totals.retain(|key, _| {
            let keep = key.service_date >= oldest_kept;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }
}

impl HistoricalIndex for ApcHistory {
    fn last_headway_ms(
        &self,
        stop_id: &str,
        route_id: &str,
        at_ms: i64,
    ) -> Result<Option<i64>, LookupError> {
        let history = self.stop_cache.get_for_time(stop_id, at_ms);

        Ok(history
            .iter()
            .rev()
            .filter(|e| e.is_arrival && e.time_ms < at_ms)
            .find(|e| e.route_id == route_id)
            .map(|previous| at_ms - previous.time_ms))
    }

    /// Rate of the most recent earlier service day with data; today is
    /// still filling in.
    fn boardings_per_second(
        &self,
        route_id: &str,
        _trip_id: &str,
        stop_id: &str,
        at_ms: i64,
    ) -> Result<Option<f64>, LookupError> {
        for days_back in 1..=i64::from(self.rate_lookback_days) {
            let rate = self
                .totals_for(route_id, stop_id, at_ms - days_back * MS_PER_DAY)
                .and_then(|totals| totals.boardings_per_second());
            if rate.is_some() {
                return Ok(rate);
            }
        }
        Ok(None)
    }

    /// Mean arrival-to-departure gap of vehicles that stopped there that day.
    fn historical_dwell_ms(
        &self,
        route_id: &str,
        stop_id: &str,
        at_ms: i64,
    ) -> Result<Option<i64>, LookupError> {
        let history = self.stop_cache.get_for_time(stop_id, at_ms);

        let dwells: Vec<i64> = history
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_arrival && e.route_id == route_id)
            .filter_map(|(i, arrival)| {
                history[i + 1..]
                    .iter()
                    .find(|d| {
                        !d.is_arrival
                            && d.vehicle_id == arrival.vehicle_id
                            && d.trip_id == arrival.trip_id
                    })
                    .map(|departure| departure.time_ms - arrival.time_ms)
            })
            .collect();

        if dwells.is_empty() {
            return Ok(None);
        }

        Ok(Some(dwells.iter().sum::<i64>() / dwells.len() as i64))
    }
}

impl ApcFeedStatus for ApcHistory {
    fn has_apc_data(&self) -> bool {
        self.enabled.load(Ordering::SeqCst) && !self.totals.is_empty()
    }
}
