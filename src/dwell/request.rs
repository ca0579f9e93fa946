// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use serde::{Deserialize, Serialize};

/// A vehicle approaching a stop on a trip, as the schedule and the vehicle's
/// current adherence describe it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DwellRequest {
    pub trip_id: String,
    pub route_id: String,
    pub stop_id: String,
    /// 0 is the first stop of the trip
    pub stop_position: u32,
    pub vehicle_id: String,
    #[serde(default)]
    pub scheduled_arrival_ms: Option<i64>,
    /// positive means late
    #[serde(default)]
    pub schedule_deviation_ms: i64,
    #[serde(default)]
    pub boarding_type: Option<u32>,
    /// dwell the schedule itself allows, used by the baseline
    #[serde(default)]
    pub scheduled_dwell_ms: Option<i64>,
}

impl DwellRequest {
    pub fn is_start_of_trip(&self) -> bool {
        self.stop_position == 0
    }

    /// Scheduled arrival shifted by the vehicle's current deviation.
    pub fn adjusted_arrival_ms(&self) -> Option<i64> {
        self.scheduled_arrival_ms
            .map(|scheduled| scheduled + self.schedule_deviation_ms)
    }
}
