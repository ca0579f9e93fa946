// Copyright Kyler Chin <kyler@catenarymaps.org>
// Catenary Transit Initiatives
// Attribution cannot be removed

use crate::dwell::request::DwellRequest;
use crate::dwell::strategy::{DwellStrategy, StrategyOutcome};
use crate::models::Prediction;
use std::sync::Arc;
use tracing::{debug, warn};

/// Tries each strategy in order and returns the first prediction. Always
/// answers: if every strategy declines, `fallback_dwell_ms` is returned as a
/// baseline prediction.
pub struct DwellPredictor {
    strategies: Vec<Arc<dyn DwellStrategy>>,
    fallback_dwell_ms: i64,
}

impl DwellPredictor {
    pub fn new(strategies: Vec<Arc<dyn DwellStrategy>>, fallback_dwell_ms: i64) -> Self {
        Self {
            strategies,
            fallback_dwell_ms,
        }
    }

    pub fn predict(&self, request: &DwellRequest) -> Prediction {
        for strategy in &self.strategies {
            match strategy.attempt(request) {
                StrategyOutcome::Predicted(prediction) => {
                    debug!(
                        strategy = strategy.name(),
                        trip = %request.trip_id,
                        stop = %request.stop_id,
                        value_ms = prediction.value_ms,
                        "dwell predicted"
                    );
                    return prediction;
                }
                StrategyOutcome::Declined(reason) => {
                    debug!(strategy = strategy.name(), reason, "dwell strategy declined");
                }
            }
        }

        warn!(
            trip = %request.trip_id,
            stop = %request.stop_id,
            "every dwell strategy declined"
        );
        Prediction::baseline(self.fallback_dwell_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dwell::strategy::ScheduledDwell;

    struct Declines;

    impl DwellStrategy for Declines {
        fn name(&self) -> &'static str {
            "declines"
        }

        fn attempt(&self, _: &DwellRequest) -> StrategyOutcome {
            StrategyOutcome::Declined("always")
        }
    }

    fn request() -> DwellRequest {
        DwellRequest {
            trip_id: "t".to_string(),
            route_id: "r".to_string(),
            stop_id: "s".to_string(),
            stop_position: 1,
            vehicle_id: "v".to_string(),
            scheduled_arrival_ms: Some(0),
            schedule_deviation_ms: 0,
            boarding_type: None,
            scheduled_dwell_ms: Some(7_000),
        }
    }

    #[test]
    fn first_success_wins() {
        let strategies: Vec<Arc<dyn DwellStrategy>> =
            vec![Arc::new(Declines), Arc::new(ScheduledDwell::new(10_000))];
        let predictor = DwellPredictor::new(strategies, 1);
        assert_eq!(predictor.predict(&request()), Prediction::baseline(7_000));
    }

    #[test]
    fn empty_chain_still_answers() {
        let predictor = DwellPredictor::new(vec![Arc::new(Declines)], 10_000);
        assert_eq!(predictor.predict(&request()), Prediction::baseline(10_000));
    }
}
