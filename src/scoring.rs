//! Pure health-score computation.
//!
//! A score is a number in `[0, 100]` derived from an endpoint's recent
//! success rate and p95 latency. An open circuit forces the score to 0
//! regardless of history; an empty window scores neutral so fresh
//! endpoints stay eligible without outranking proven ones.

use std::time::Duration;

use crate::circuit_breaker::CircuitState;

/// Weight of the success-rate component.
pub const SUCCESS_WEIGHT: f64 = 0.6;
/// Weight of the latency component.
pub const LATENCY_WEIGHT: f64 = 0.4;
/// Score reported when no samples exist yet.
pub const NEUTRAL_SCORE: f64 = 50.0;

const LATENCY_FACTOR_FLOOR: f64 = 0.1;
const LATENCY_LOG_SCALE: f64 = 14.0;

/// Latency factor in `[0.1, 1.0]`, decreasing in p95. Log-scaled so the
/// difference between 20ms and 200ms matters much more than between
/// 2s and 4s; ~16s and beyond sit at the floor.
pub fn latency_factor(p95: Duration) -> f64 {
    let ms = p95.as_millis() as f64;
    if ms <= 1.0 {
        return 1.0;
    }
    (1.0 - ms.log2() / LATENCY_LOG_SCALE).clamp(LATENCY_FACTOR_FLOOR, 1.0)
}

/// Composite health score.
///
/// Monotonic: non-decreasing in `success_rate`, non-increasing in `p95`.
pub fn health_score(
    success_rate: Option<f64>,
    p95: Option<Duration>,
    state: CircuitState,
) -> f64 {
    if state == CircuitState::Open {
        return 0.0;
    }
    match (success_rate, p95) {
        (Some(rate), Some(p95)) => {
            let rate = rate.clamp(0.0, 1.0);
            100.0 * (SUCCESS_WEIGHT * rate + LATENCY_WEIGHT * latency_factor(p95))
        }
        _ => NEUTRAL_SCORE,
    }
}
