// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::MS_PER_SEC;
use crate::time_bucket::BucketWidth;
use chrono_tz::Tz;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("I/O error reading config '{path}': {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("could not parse config: {0}")]
    Parse(#[from] ron::error::SpannedError),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Ratio of ons/offs keyed by boarding type (row) and door count (column).
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(transparent)]
pub struct DoorFactorMatrix(pub Vec<Vec<f64>>);

impl DoorFactorMatrix {
    pub fn factor(&self, boarding_type: u32, door_count: u32) -> Option<f64> {
        self.0
            .get(boarding_type as usize)
            .and_then(|row| row.get(door_count as usize))
            .copied()
    }
}

/// Everything the correlator, caches and predictor read. Built once at
/// startup and shared behind an `Arc`; nothing mutates it afterwards.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct DwellConfig {
    pub bucket_width_minutes: u32,
    /// only arrivals are indexed for APC matching when set
    pub record_is_arrival: bool,
    /// 0 keeps the exact-bucket join
    pub match_widening_buckets: u32,
    pub min_kalman_days: usize,
    pub max_kalman_days: usize,
    pub max_kalman_days_to_search: u32,
    pub initial_error_value: f64,
    pub boarding_constant_secs: f64,
    pub max_headway_secs: i64,
    /// a stop without enough history is assumed to see no passenger activity
    pub allow_empty_dwell: bool,
    pub seconds_per_boarding: Vec<f64>,
    pub default_seconds_per_boarding: f64,
    pub door_factors: Option<DoorFactorMatrix>,
    pub default_boardings_per_second: Option<f64>,
    pub retention_secs: i64,
    pub timezone: Tz,
    pub baseline_dwell_ms: i64,
}

impl Default for DwellConfig {
    fn default() -> Self {
        Self {
            bucket_width_minutes: 5,
            record_is_arrival: false,
            match_widening_buckets: 0,
            min_kalman_days: 3,
            max_kalman_days: 5,
            max_kalman_days_to_search: 21,
            initial_error_value: 50.0,
            boarding_constant_secs: 2.6,
            max_headway_secs: 7200,
            allow_empty_dwell: true,
            seconds_per_boarding: vec![4.3, 2.5, 3.4],
            default_seconds_per_boarding: 2.5,
            door_factors: None,
            default_boardings_per_second: None,
            retention_secs: 4 * 24 * 60 * 60,
            timezone: chrono_tz::America::Los_Angeles,
            baseline_dwell_ms: 10 * MS_PER_SEC,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MatcherConfig {
    pub bucket_width: BucketWidth,
    pub record_is_arrival: bool,
    pub widening_buckets: u32,
}

impl DwellConfig {
    pub fn from_ron_str(input: &str) -> Result<Self, ConfigError> {
        let config: DwellConfig = ron::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_ron_file(path: &Path) -> Result<Self, ConfigError> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_ron_str(&input)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.min_kalman_days == 0 {
            return Err(ConfigError::Invalid(
                "min_kalman_days must be at least 1".to_string(),
            ));
        }
        if self.max_kalman_days < self.min_kalman_days {
            return Err(ConfigError::Invalid(format!(
                "max_kalman_days ({}) is below min_kalman_days ({})",
                self.max_kalman_days, self.min_kalman_days
            )));
        }
        if (self.max_kalman_days_to_search as usize) < self.min_kalman_days {
            return Err(ConfigError::Invalid(format!(
                "max_kalman_days_to_search ({}) can never collect min_kalman_days ({}) samples",
                self.max_kalman_days_to_search, self.min_kalman_days
            )));
        }
        if !self.initial_error_value.is_finite() || self.initial_error_value < 0.0 {
            return Err(ConfigError::Invalid(
                "initial_error_value must be a finite, non-negative number".to_string(),
            ));
        }
        if self.retention_secs <= 0 {
            return Err(ConfigError::Invalid(
                "retention_secs must be positive".to_string(),
            ));
        }
        if self.max_headway_secs <= 0 {
            return Err(ConfigError::Invalid(
                "max_headway_secs must be positive".to_string(),
            ));
        }
        if self
            .seconds_per_boarding
            .iter()
            .chain(std::iter::once(&self.default_seconds_per_boarding))
            .any(|s| !s.is_finite() || *s < 0.0)
        {
            return Err(ConfigError::Invalid(
                "seconds per boarding values must be finite and non-negative".to_string(),
            ));
        }
        Ok(())
    }

    pub fn bucket_width(&self) -> BucketWidth {
        BucketWidth::from_minutes(self.bucket_width_minutes)
    }

    pub fn retention_ms(&self) -> i64 {
        self.retention_secs * MS_PER_SEC
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        MatcherConfig {
            bucket_width: self.bucket_width(),
            record_is_arrival: self.record_is_arrival,
            widening_buckets: self.match_widening_buckets,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_ron_gives_defaults() {
        let config = DwellConfig::from_ron_str("()").unwrap();
        assert_eq!(config, DwellConfig::default());
        assert_eq!(config.bucket_width().as_ms(), 5 * 60 * 1000);
        assert_eq!(config.retention_ms(), 4 * 24 * 60 * 60 * 1000);
    }

    #[test]
    fn overrides_are_read() {
        let config = DwellConfig::from_ron_str(
            r#"(
                bucket_width_minutes: 2,
                allow_empty_dwell: false,
                door_factors: Some([[1.0, 1.0], [1.0, 0.5, 0.4]]),
                default_boardings_per_second: Some(0.01),
                timezone: "America/Chicago",
            )"#,
        )
        .unwrap();

        assert_eq!(config.bucket_width_minutes, 2);
        assert!(!config.allow_empty_dwell);
        assert_eq!(config.timezone, chrono_tz::America::Chicago);
        assert_eq!(config.default_boardings_per_second, Some(0.01));
        assert_eq!(config.door_factors.unwrap().factor(1, 2), Some(0.4));
    }

    #[test]
    fn inverted_kalman_days_are_rejected() {
        let result = DwellConfig::from_ron_str("(min_kalman_days: 6, max_kalman_days: 5)");
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn malformed_ron_is_a_parse_error() {
        let result = DwellConfig::from_ron_str("(bucket_width_minutes: \"five\")");
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    #[test]
    fn door_factor_out_of_range_is_none() {
        let matrix = DoorFactorMatrix(vec![vec![1.0, 0.8]]);
        assert_eq!(matrix.factor(0, 1), Some(0.8));
        assert_eq!(matrix.factor(0, 2), None);
        assert_eq!(matrix.factor(3, 0), None);
    }
}
