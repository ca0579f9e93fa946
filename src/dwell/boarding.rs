// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! Real-time dwell heuristics.
//!
//! ```text
//! ons          = boardings_per_second * headway_secs
//! boarding_sec = boarding_constant + ons * door_factor * seconds_per_boarding
//! raw_dwell    = ons * boarding_sec
//! ```

use crate::MS_PER_SEC;
use crate::config::DwellConfig;

/// Ratio from the door factor matrix; 1.0 whenever the type, the door count
/// or the matrix entry is missing.
pub fn boarding_factor(
    config: &DwellConfig,
    boarding_type: Option<u32>,
    door_count: Option<u32>,
) -> f64 {
    match (boarding_type, door_count, &config.door_factors) {
        (Some(boarding_type), Some(door_count), Some(matrix)) => {
            matrix.factor(boarding_type, door_count).unwrap_or(1.0)
        }
        _ => 1.0,
    }
}

pub fn seconds_per_boarding(config: &DwellConfig, boarding_type: Option<u32>) -> f64 {
    boarding_type
        .and_then(|t| config.seconds_per_boarding.get(t as usize))
        .copied()
        .unwrap_or(config.default_seconds_per_boarding)
}

pub fn boarding_time_secs(
    config: &DwellConfig,
    boardings_per_second: f64,
    headway_secs: f64,
    boarding_type: Option<u32>,
    door_count: Option<u32>,
) -> f64 {
    let ons = boardings_per_second * headway_secs;
    config.boarding_constant_secs
        + ons
            * boarding_factor(config, boarding_type, door_count)
            * seconds_per_boarding(config, boarding_type)
}

pub fn raw_dwell_ms(boardings_per_second: f64, headway_secs: f64, boarding_time_secs: f64) -> f64 {
    boardings_per_second * headway_secs * boarding_time_secs * MS_PER_SEC as f64
}
