//! Collapse state machine: threshold check, wipe sweep, and post-collapse reset.
//!
//! A collapse is planned against a copy of the universe and only becomes
//! real once the caller has committed the removals and the reset state to
//! the store in a single call.

use chrono::{DateTime, Utc};
use contracts::{CollapseReport, EngineConfig, LootId, UniformRange};
use rand::Rng;

use crate::instability::sample;
use crate::universe::UniverseState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollapsePhase {
    Stable,
    /// Instability is above the threshold; the next check fires a collapse.
    Collapsing,
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollapsePlan {
    pub wipe_fraction: f64,
    pub removed: Vec<LootId>,
    pub total_items_before: u64,
    pub next_state: UniverseState,
}

impl CollapsePlan {
    pub fn report(&self) -> CollapseReport {
        CollapseReport {
            removed_items: self.removed.len() as u64,
            total_items_before: self.total_items_before,
            wipe_fraction: self.wipe_fraction,
            new_threshold: self.next_state.collapse_threshold(),
            collapse_count: self.next_state.collapse_count(),
            collapsed_at: self
                .next_state
                .last_collapse_at()
                .unwrap_or(DateTime::<Utc>::UNIX_EPOCH),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CollapseMachine {
    threshold_range: UniformRange,
    wipe_fraction: UniformRange,
}

impl CollapseMachine {
    pub fn from_config(config: &EngineConfig) -> Self {
        Self {
            threshold_range: config.collapse_threshold,
            wipe_fraction: config.wipe_fraction,
        }
    }

    /// Fresh universe with its first threshold drawn.
    pub fn genesis<R: Rng>(&self, rng: &mut R) -> UniverseState {
        UniverseState::genesis(sample(self.threshold_range, rng))
    }

    pub fn threshold(&self, state: &UniverseState) -> f64 {
        state.collapse_threshold()
    }

    pub fn phase(&self, state: &UniverseState) -> CollapsePhase {
        if state.instability() > state.collapse_threshold() {
            CollapsePhase::Collapsing
        } else {
            CollapsePhase::Stable
        }
    }

    pub fn should_collapse(&self, state: &UniverseState) -> bool {
        self.phase(state) == CollapsePhase::Collapsing
    }

    /// Draws one wipe fraction, flips an independent coin with that
    /// probability for every item, and prepares the reset universe.
    pub fn plan<R: Rng>(
        &self,
        state: &UniverseState,
        loot_ids: &[LootId],
        rng: &mut R,
        now: DateTime<Utc>,
    ) -> CollapsePlan {
        let wipe_fraction = sample(self.wipe_fraction, rng);
        let removed = sweep(loot_ids, wipe_fraction, rng);
        let new_threshold = sample(self.threshold_range, rng);

        let mut next_state = state.clone();
        next_state.reset_after_collapse(new_threshold, now);

        CollapsePlan {
            wipe_fraction,
            removed,
            total_items_before: loot_ids.len() as u64,
            next_state,
        }
    }
}

/// Bernoulli(`probability`) filter over `loot_ids`, preserving order.
pub fn sweep<R: Rng>(loot_ids: &[LootId], probability: f64, rng: &mut R) -> Vec<LootId> {
    let probability = probability.clamp(0.0, 1.0);
    loot_ids
        .iter()
        .copied()
        .filter(|_| rng.random_bool(probability))
        .collect()
}

#[cfg(test)]
mod tests {
    use contracts::UniverseRecord;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    fn state(instability: f64, threshold: f64) -> UniverseState {
        UniverseState::from_record(&UniverseRecord {
            instability,
            collapse_threshold: threshold,
            last_collapse_at: None,
            total_messages: 12,
            collapse_count: 2,
        })
    }

    #[test]
    fn fires_only_strictly_above_threshold() {
        let machine = CollapseMachine::from_config(&EngineConfig::default());
        assert_eq!(machine.phase(&state(95.0, 95.0)), CollapsePhase::Stable);
        assert_eq!(machine.phase(&state(95.01, 95.0)), CollapsePhase::Collapsing);
    }

    #[test]
    fn plan_resets_and_redraws_threshold() {
        let machine = CollapseMachine::from_config(&EngineConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(21);
        let now = DateTime::<Utc>::UNIX_EPOCH;
        let ids = (1..=200).collect::<Vec<LootId>>();

        let plan = machine.plan(&state(96.0, 95.0), &ids, &mut rng, now);

        assert!((0.5..=0.8).contains(&plan.wipe_fraction));
        assert_eq!(plan.next_state.instability(), 0.0);
        assert!((95.0..=99.0).contains(&machine.threshold(&plan.next_state)));
        assert_eq!(plan.next_state.last_collapse_at(), Some(now));
        assert_eq!(plan.next_state.collapse_count(), 3);
        assert_eq!(plan.next_state.total_messages(), 12);
        assert_eq!(plan.total_items_before, 200);
        assert!(plan.removed.iter().all(|id| ids.contains(id)));

        let report = plan.report();
        assert_eq!(report.removed_items, plan.removed.len() as u64);
        assert_eq!(report.collapse_count, 3);
    }

    #[test]
    fn sweep_fraction_concentrates_near_probability() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let ids = (0..20_000).collect::<Vec<LootId>>();
        let removed = sweep(&ids, 0.65, &mut rng);
        let fraction = removed.len() as f64 / ids.len() as f64;
        assert!((0.63..=0.67).contains(&fraction), "fraction={fraction}");
    }

    #[test]
    fn sweep_extremes_are_exact() {
        let mut rng = ChaCha8Rng::seed_from_u64(4);
        let ids = (0..100).collect::<Vec<LootId>>();
        assert!(sweep(&ids, 0.0, &mut rng).is_empty());
        assert_eq!(sweep(&ids, 1.0, &mut rng), ids);
    }

    #[test]
    fn empty_universe_still_collapses() {
        let machine = CollapseMachine::from_config(&EngineConfig::default());
        let mut rng = ChaCha8Rng::seed_from_u64(9);
        let plan = machine.plan(&state(99.5, 96.0), &[], &mut rng, DateTime::<Utc>::UNIX_EPOCH);
        assert!(plan.removed.is_empty());
        assert_eq!(plan.total_items_before, 0);
        assert_eq!(plan.next_state.instability(), 0.0);
    }
}
