// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

pub mod boarding;
pub mod context_cache;
pub mod filter_state;
pub mod kalman;
pub mod predictor;
pub mod request;
pub mod strategy;

#[cfg(test)]
mod test_fallback_chain;

pub use context_cache::{DwellContextCache, PredictionContext};
pub use filter_state::{FilterKey, FilterStateStore, KalmanErrorCache};
pub use predictor::DwellPredictor;
pub use request::DwellRequest;
pub use strategy::{ApcKalmanStrategy, DwellStrategy, ScheduledDwell, StrategyOutcome};
