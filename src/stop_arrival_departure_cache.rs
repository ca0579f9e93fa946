// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Sorted arrival/departure history for every stop, one partition per
//! (stop, service date). Partitions are trimmed by age so that nothing past
//! the retention window is ever handed to a reader.

use crate::clock::Clock;
use crate::models::ArrivalDepartureEvent;
use chrono::{NaiveDate, NaiveDateTime, NaiveTime, TimeZone};
use chrono_tz::Tz;
use scc::HashMap as SccHashMap;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, trace, warn};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StopDayKey {
    pub stop_id: String,
    pub service_date: NaiveDate,
}

impl fmt::Display for StopDayKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.stop_id, self.service_date)
    }
}

/// The calendar date of `ts_ms` in `tz`.
pub fn service_date_for(ts_ms: i64, tz: Tz) -> Option<NaiveDate> {
    tz.timestamp_millis_opt(ts_ms)
        .single()
        .map(|dt| dt.date_naive())
}

/// Start of `date` in `tz`, in epoch ms.
///
/// Computed as noon minus twelve hours so DST transitions land on the same
/// reference the schedule uses.
pub fn midnight_ms(date: NaiveDate, tz: Tz) -> i64 {
    let noon = NaiveDateTime::new(
        date,
        NaiveTime::from_hms_opt(12, 0, 0).unwrap_or(NaiveTime::MIN),
    );

    match tz.from_local_datetime(&noon).single() {
        Some(noon_in_tz) => (noon_in_tz - chrono::Duration::hours(12)).timestamp_millis(),
        None => date.and_time(NaiveTime::MIN).and_utc().timestamp_millis(),
    }
}

// arrivals sort ahead of departures at the same instant
fn event_order(event: &ArrivalDepartureEvent) -> (i64, bool) {
    (event.time_ms, !event.is_arrival)
}

fn insert_sorted(events: &mut Vec<ArrivalDepartureEvent>, event: &ArrivalDepartureEvent) {
    let order = event_order(event);
    let pos = events.partition_point(|e| event_order(e) <= order);

    let duplicate = events[..pos]
        .iter()
        .rev()
        .take_while(|e| event_order(e) == order)
        .any(|e| e == event);

    if !duplicate {
        events.insert(pos, event.clone());
    }
}

pub struct StopArrivalDepartureCache {
    partitions: SccHashMap<StopDayKey, Vec<ArrivalDepartureEvent>>,
    retention_ms: i64,
    timezone: Tz,
    clock: Arc<dyn Clock>,
}

impl StopArrivalDepartureCache {
    pub fn new(retention_ms: i64, timezone: Tz, clock: Arc<dyn Clock>) -> Self {
        Self {
            partitions: SccHashMap::new(),
            retention_ms,
            timezone,
            clock,
        }
    }

    pub fn timezone(&self) -> Tz {
        self.timezone
    }

    fn cutoff_ms(&self) -> i64 {
        self.clock.now_ms() - self.retention_ms
    }

    pub fn key_for(&self, stop_id: &str, ts_ms: i64) -> Option<StopDayKey> {
        service_date_for(ts_ms, self.timezone).map(|service_date| StopDayKey {
            stop_id: stop_id.to_string(),
            service_date,
        })
    }

    /// Adds `event` to its stop-day partition and returns that partition's key.
    ///
    /// The whole read-modify-write runs under the partition's entry lock, so
    /// concurrent writers to one stop-day never lose each other's events.
    pub fn put(&self, event: &ArrivalDepartureEvent) -> Option<StopDayKey> {
        if event.stop_id.is_empty() {
            warn!(%event, "arrival/departure without a stop, not caching");
            return None;
        }

        if event.time_ms < self.cutoff_ms() {
            debug!(%event, "arrival/departure already past retention, not caching");
            return None;
        }

        let key = self.key_for(&event.stop_id, event.time_ms)?;

        trace!(%event, %key, "putting arrival/departure in stop cache");

        self.partitions
            .entry(key.clone())
            .and_modify(|events| insert_sorted(events, event))
            .or_insert_with(|| vec![event.clone()]);

        Some(key)
    }

    /// Time-sorted history of `stop_id` on `date`; empty when nothing is held.
    pub fn get(&self, stop_id: &str, date: NaiveDate) -> Vec<ArrivalDepartureEvent> {
        let key = StopDayKey {
            stop_id: stop_id.to_string(),
            service_date: date,
        };
        let cutoff = self.cutoff_ms();

        self.partitions
            .read(&key, |_, events| {
                events
                    .iter()
                    .filter(|e| e.time_ms >= cutoff)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// History of the stop-day that contains `ts_ms`.
    pub fn get_for_time(&self, stop_id: &str, ts_ms: i64) -> Vec<ArrivalDepartureEvent> {
        match service_date_for(ts_ms, self.timezone) {
            Some(date) => self.get(stop_id, date),
            None => Vec::new(),
        }
    }

    /// Drops events older than the retention age and any partition left
    /// empty. Returns the number of events removed.
    pub fn evict(&self) -> usize {
        let cutoff = self.cutoff_ms();
        let mut removed = 0;

        self.partitions.retain(|_, events| {
            let before = events.len();
            events.retain(|e| e.time_ms >= cutoff);
            removed += before - events.len();
            !events.is_empty()
        });

        removed
    }

    pub fn keys(&self) -> Vec<StopDayKey> {
        let mut keys = Vec::with_capacity(self.partitions.len());
        self.partitions.scan(|key, _| keys.push(key.clone()));
        keys.sort();
        keys
    }

    pub fn len_partitions(&self) -> usize {
        self.partitions.len()
    }

    /// Bulk warm-up. Returns how many events were accepted.
    pub fn populate<'a, I>(&self, events: I) -> usize
    where
        I: IntoIterator<Item = &'a ArrivalDepartureEvent>,
    {
        let mut accepted = 0;
        let mut seen = 0;

        for event in events {
            seen += 1;
            if self.put(event).is_some() {
                accepted += 1;
            }
            if seen % 1000 == 0 {
                info!("populated stop cache with {} of {} seen", accepted, seen);
            }
        }

        accepted
    }

    /// Every retained event with `start_ms <= time < end_ms`, across all stops.
    pub fn events_between(&self, start_ms: i64, end_ms: i64) -> Vec<ArrivalDepartureEvent> {
        let lower = start_ms.max(self.cutoff_ms());
        let mut result = Vec::new();

        self.partitions.scan(|_, events| {
            result.extend(
                events
                    .iter()
                    .filter(|e| e.time_ms >= lower && e.time_ms < end_ms)
                    .cloned(),
            );
        });

        result.sort_by_key(event_order);
        result
    }

    pub fn log_contents(&self) {
        self.partitions.scan(|key, events| {
            trace!(
                %key,
                midnight_ms = midnight_ms(key.service_date, self.timezone),
                count = events.len(),
                "stop cache partition"
            );
            for event in events {
                trace!(%event);
            }
        });
    }
}
