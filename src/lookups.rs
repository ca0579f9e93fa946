// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Seams to the collaborators the predictor reads from. Implementations must
//! answer from memory; an error from any of them is treated as "no data".

use scc::HashMap as SccHashMap;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LookupError {
    #[error("lookup source unavailable: {0}")]
    Unavailable(String),
    #[error("lookup backend failed: {0}")]
    Backend(String),
}

/// Per (route, stop, day) aggregates derived from passenger counts and the
/// arrival/departure history.
pub trait HistoricalIndex: Send + Sync {
    /// Gap between `at_ms` and the previous vehicle of `route_id` at `stop_id`.
    fn last_headway_ms(
        &self,
        stop_id: &str,
        route_id: &str,
        at_ms: i64,
    ) -> Result<Option<i64>, LookupError>;

    /// Boardings per second observed for the trip's route at the stop.
    fn boardings_per_second(
        &self,
        route_id: &str,
        trip_id: &str,
        stop_id: &str,
        at_ms: i64,
    ) -> Result<Option<f64>, LookupError>;

    /// Observed dwell at the stop on the service day containing `at_ms`.
    fn historical_dwell_ms(
        &self,
        route_id: &str,
        stop_id: &str,
        at_ms: i64,
    ) -> Result<Option<i64>, LookupError>;
}

pub trait VehicleConfigLookup: Send + Sync {
    fn door_count(&self, vehicle_id: &str) -> Result<Option<u32>, LookupError>;
}

pub trait ApcFeedStatus: Send + Sync {
    /// False when the passenger counter feed is switched off or has produced nothing.
    fn has_apc_data(&self) -> bool;
}

/// Door counts learned from passenger counter pings.
#[derive(Default)]
pub struct VehicleDoorCounts {
    doors: SccHashMap<String, u32>,
}

impl VehicleDoorCounts {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&self, vehicle_id: &str, door_count: u32) {
        self.doors
            .entry(vehicle_id.to_string())
            .and_modify(|doors| *doors = door_count)
            .or_insert(door_count);
    }

    pub fn len(&self) -> usize {
        self.doors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doors.is_empty()
    }
}

impl VehicleConfigLookup for VehicleDoorCounts {
    fn door_count(&self, vehicle_id: &str) -> Result<Option<u32>, LookupError> {
        Ok(self.doors.read(vehicle_id, |_, doors| *doors))
    }
}
