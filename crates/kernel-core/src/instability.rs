//! Event- and time-driven mutations of the universe instability value.

use contracts::{EngineConfig, UniformRange};
use rand::Rng;

use crate::universe::UniverseState;

/// Result of one accumulator step: the signed change that was requested and
/// the clamped instability that resulted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Adjustment {
    pub requested: f64,
    pub instability: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InstabilityAccumulator {
    message_increment: f64,
    pull_increment: UniformRange,
    stabilize_reduction: UniformRange,
    passive_increment: UniformRange,
}

impl InstabilityAccumulator {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            message_increment: config.message_increment,
            pull_increment: config.pull_increment,
            stabilize_reduction: config.stabilize_reduction,
            passive_increment: config.passive_increment,
        }
    }

    /// Counts the message and adds the fixed per-message increment.
    pub fn on_message(&self, state: &mut UniverseState) -> Adjustment {
        state.record_message();
        apply(state, self.message_increment)
    }

    pub fn on_pull<R: Rng>(&self, state: &mut UniverseState, rng: &mut R) -> Adjustment {
        let increment = sample(self.pull_increment, rng);
        apply(state, increment)
    }

    /// Callers must have debited the stabilization cost first.
    pub fn on_stabilize<R: Rng>(&self, state: &mut UniverseState, rng: &mut R) -> Adjustment {
        let reduction = sample(self.stabilize_reduction, rng);
        apply(state, -reduction)
    }

    pub fn on_passive_tick<R: Rng>(&self, state: &mut UniverseState, rng: &mut R) -> Adjustment {
        let increment = sample(self.passive_increment, rng);
        apply(state, increment)
    }
}

pub fn sample<R: Rng>(range: UniformRange, rng: &mut R) -> f64 {
    rng.random_range(range.min..=range.max)
}

fn apply(state: &mut UniverseState, delta: f64) -> Adjustment {
    Adjustment {
        requested: delta,
        instability: state.shift_instability(delta),
    }
}

#[cfg(test)]
mod tests {
    use contracts::UniverseRecord;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn state_at(instability: f64) -> UniverseState {
        UniverseState::from_record(&UniverseRecord {
            instability,
            collapse_threshold: 97.0,
            last_collapse_at: None,
            total_messages: 0,
            collapse_count: 0,
        })
    }

    #[test]
    fn message_adds_fixed_increment_and_counts() {
        let accumulator = InstabilityAccumulator::from_config(&EngineConfig::default());
        let mut state = state_at(10.0);
        let adjustment = accumulator.on_message(&mut state);
        assert!((adjustment.instability - 10.3).abs() < 1e-12);
        assert_eq!(state.total_messages(), 1);
    }

    #[test]
    fn pull_increment_stays_in_configured_range() {
        let accumulator = InstabilityAccumulator::from_config(&EngineConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(3);
        for _ in 0..1_000 {
            let mut state = state_at(20.0);
            let adjustment = accumulator.on_pull(&mut state, &mut rng);
            assert!((1.5..=3.5).contains(&adjustment.requested));
            assert!((adjustment.instability - (20.0 + adjustment.requested)).abs() < 1e-12);
        }
    }

    #[test]
    fn stabilize_clamps_at_zero() {
        let accumulator = InstabilityAccumulator::from_config(&EngineConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut state = state_at(2.0);
        let adjustment = accumulator.on_stabilize(&mut state, &mut rng);
        assert!((-15.0..=-5.0).contains(&adjustment.requested));
        assert_eq!(adjustment.instability, 0.0);
    }

    #[test]
    fn repeated_pulls_from_near_ceiling_clamp_at_hundred() {
        let accumulator = InstabilityAccumulator::from_config(&EngineConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(5);
        let mut state = state_at(99.9);
        for _ in 0..50 {
            assert!(accumulator.on_pull(&mut state, &mut rng).instability <= 100.0);
        }
        assert_eq!(state.instability(), 100.0);
    }

    #[test]
    fn passive_tick_draws_from_passive_range() {
        let accumulator = InstabilityAccumulator::from_config(&EngineConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(8);
        let mut state = state_at(0.0);
        let adjustment = accumulator.on_passive_tick(&mut state, &mut rng);
        assert!((0.5..=2.0).contains(&adjustment.requested));
    }

    #[test]
    fn degenerate_range_samples_its_single_value() {
        let mut rng = ChaCha8Rng::seed_from_u64(0);
        assert_eq!(sample(UniformRange::new(4.0, 4.0), &mut rng), 4.0);
    }
}
