// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

//! One-state recursive filter blending a real-time dwell estimate with the
//! average of recent historical dwells.
//!
//! ```text
//! gain       = (prior_error + var) / (prior_error + 2 * var)
//! loop_gain  = 1 - gain
//! prediction = loop_gain * raw_dwell + gain * avg
//! new_error  = var * loop_gain
//! ```

use tracing::debug;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct KalmanOutcome {
    pub prediction: f64,
    pub filter_error: f64,
    pub gain: f64,
    pub loop_gain: f64,
    pub average: f64,
    pub variance: f64,
}

pub fn mean(samples: &[i64]) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().map(|s| *s as f64).sum::<f64>() / samples.len() as f64)
}

/// Population variance (divides by n).
pub fn population_variance(samples: &[i64], average: f64) -> Option<f64> {
    if samples.is_empty() {
        return None;
    }
    let total: f64 = samples
        .iter()
        .map(|s| {
            let diff = *s as f64 - average;
            diff * diff
        })
        .sum();
    Some(total / samples.len() as f64)
}

pub fn gain(prior_error: f64, variance: f64) -> f64 {
    let denominator = prior_error + 2.0 * variance;
    if denominator == 0.0 {
        // no prior error and identical samples: trust history outright
        return 1.0;
    }
    (prior_error + variance) / denominator
}

/// Runs one filter step. `None` when there are no samples.
pub fn update(raw_dwell: f64, samples: &[i64], prior_error: f64) -> Option<KalmanOutcome> {
    let average = mean(samples)?;
    let variance = population_variance(samples, average)?;
    let gain = gain(prior_error, variance);
    let loop_gain = 1.0 - gain;

    let prediction = loop_gain * raw_dwell + gain * average;
    let filter_error = variance * loop_gain;

    debug!(
        "(loop_gain={} * raw_dwell={}) + (gain={} * average={}{:?}) = {}; error {} -> {}",
        loop_gain, raw_dwell, gain, average, samples, prediction, prior_error, filter_error
    );

    Some(KalmanOutcome {
        prediction,
        filter_error,
        gain,
        loop_gain,
        average,
        variance,
    })
}
