//! Exit-policy hooks and bounded stop adjustment
//!
//! Trailing-stop and emergency-exit policies live outside this crate;
//! each monitor tick invokes them with the reconciled position and the
//! latest market snapshot. The core applies only bounds-checked deltas:
//! a maximum movement per update, monotone movement in the favorable
//! direction only, and a minimum-confidence gate.

use async_trait::async_trait;

use crate::domain::entities::observation::Observation;
use crate::domain::entities::position::{Direction, Position};

/// Stop/target mutation proposed by an exit policy.
#[derive(Debug, Clone, PartialEq)]
pub struct StopProposal {
    pub stop: Option<f64>,
    pub target: Option<f64>,
    /// Policy's confidence in the proposal, 0..1.
    pub confidence: f64,
}

#[async_trait]
pub trait ExitPolicy: Send + Sync {
    fn name(&self) -> &str;

    /// Review the open position against the market; `None` proposes no
    /// change.
    async fn review(&self, position: &Position, observation: &Observation)
        -> Option<StopProposal>;
}

#[derive(Debug, Clone)]
pub struct StopBounds {
    /// Maximum absolute stop/target movement per monitor tick.
    pub max_move_per_update: f64,
    /// Proposals below this confidence are ignored.
    pub min_confidence: f64,
}

impl Default for StopBounds {
    fn default() -> Self {
        Self {
            max_move_per_update: 50.0,
            min_confidence: 0.5,
        }
    }
}

impl StopBounds {
    /// Apply a proposed stop, clamped to the per-update bound and only
    /// in the favorable direction (up for longs, down for shorts).
    /// Returns the new stop, or `current` when the proposal is rejected.
    pub fn apply_stop(
        &self,
        current: f64,
        proposed: f64,
        direction: Direction,
        confidence: f64,
    ) -> f64 {
        if confidence < self.min_confidence || !proposed.is_finite() {
            return current;
        }

        let favorable = match direction {
            Direction::Long => proposed > current,
            Direction::Short => proposed < current,
            Direction::Flat => false,
        };
        if !favorable {
            return current;
        }

        let delta = (proposed - current).clamp(-self.max_move_per_update, self.max_move_per_update);
        current + delta
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bounds() -> StopBounds {
        StopBounds {
            max_move_per_update: 10.0,
            min_confidence: 0.5,
        }
    }

    #[test]
    fn test_favorable_long_move_applied() {
        let stop = bounds().apply_stop(95.0, 98.0, Direction::Long, 0.9);
        assert_eq!(stop, 98.0);
    }

    #[test]
    fn test_unfavorable_long_move_rejected() {
        let stop = bounds().apply_stop(95.0, 90.0, Direction::Long, 0.9);
        assert_eq!(stop, 95.0);
    }

    #[test]
    fn test_favorable_short_move_applied() {
        let stop = bounds().apply_stop(105.0, 102.0, Direction::Short, 0.9);
        assert_eq!(stop, 102.0);
    }

    #[test]
    fn test_move_clamped_to_max_per_update() {
        let stop = bounds().apply_stop(95.0, 130.0, Direction::Long, 0.9);
        assert_eq!(stop, 105.0);
    }

    #[test]
    fn test_low_confidence_proposal_ignored() {
        let stop = bounds().apply_stop(95.0, 98.0, Direction::Long, 0.3);
        assert_eq!(stop, 95.0);
    }

    #[test]
    fn test_flat_direction_never_moves() {
        let stop = bounds().apply_stop(95.0, 98.0, Direction::Flat, 0.9);
        assert_eq!(stop, 95.0);
    }

    #[test]
    fn test_nan_proposal_ignored() {
        let stop = bounds().apply_stop(95.0, f64::NAN, Direction::Long, 0.9);
        assert_eq!(stop, 95.0);
    }
}
