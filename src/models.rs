// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// One vehicle arriving at or departing from one stop, as derived from AVL.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ArrivalDepartureEvent {
    pub vehicle_id: String,
    pub stop_id: String,
    pub trip_id: String,
    pub route_id: String,
    /// epoch milliseconds
    pub time_ms: i64,
    pub is_arrival: bool,
    /// positive means late
    #[serde(default)]
    pub schedule_deviation_ms: i64,
}

/// One passenger counter ping. Its clock is independent of the AVL clock.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ApcObservation {
    pub vehicle_id: String,
    pub arrival_epoch_ms: i64,
    pub boardings: u32,
    pub alightings: u32,
    #[serde(default)]
    pub door_count: Option<u32>,
    #[serde(default)]
    pub boarding_type: Option<u32>,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RecordError {
    #[error("record is missing required field `{0}`")]
    MissingField(&'static str),
}

impl ArrivalDepartureEvent {
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.vehicle_id.is_empty() {
            return Err(RecordError::MissingField("vehicle_id"));
        }
        if self.stop_id.is_empty() {
            return Err(RecordError::MissingField("stop_id"));
        }
        if self.route_id.is_empty() {
            return Err(RecordError::MissingField("route_id"));
        }
        if self.trip_id.is_empty() {
            return Err(RecordError::MissingField("trip_id"));
        }
        Ok(())
    }
}

impl ApcObservation {
    pub fn validate(&self) -> Result<(), RecordError> {
        if self.vehicle_id.is_empty() {
            return Err(RecordError::MissingField("vehicle_id"));
        }
        Ok(())
    }
}

impl fmt::Display for ArrivalDepartureEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} vehicle={} stop={} trip={} route={} at {}",
            if self.is_arrival { "arrival" } else { "departure" },
            self.vehicle_id,
            self.stop_id,
            self.trip_id,
            self.route_id,
            self.time_ms
        )
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PredictionMethod {
    ApcDwell,
    Baseline,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Prediction {
    pub value_ms: i64,
    pub method: PredictionMethod,
}

impl Prediction {
    pub fn apc(value_ms: i64) -> Self {
        Self {
            value_ms,
            method: PredictionMethod::ApcDwell,
        }
    }

    pub fn baseline(value_ms: i64) -> Self {
        Self {
            value_ms,
            method: PredictionMethod::Baseline,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_vehicle_is_rejected() {
        let event = ArrivalDepartureEvent {
            vehicle_id: String::new(),
            stop_id: "17978".to_string(),
            trip_id: "t".to_string(),
            route_id: "r".to_string(),
            time_ms: 0,
            is_arrival: true,
            schedule_deviation_ms: 0,
        };
        assert_eq!(
            event.validate(),
            Err(RecordError::MissingField("vehicle_id"))
        );
    }

    #[test]
    fn prediction_method_serializes_screaming() {
        let json = serde_json::to_string(&Prediction::apc(2767)).unwrap();
        assert_eq!(json, r#"{"value_ms":2767,"method":"APC_DWELL"}"#);
    }
}
