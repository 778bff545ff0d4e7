//! Deterministic tick ordering for offline runs and replays.
//!
//! The live host drives the two periodic hooks from its own timers. For
//! simulations, `TickScheduler` keeps a millisecond clock and a priority
//! queue of due work. Periodic ticks re-arm themselves when popped; ad-hoc
//! events fire once.
//!
//! Ordering: `(due_ms ASC, kind priority ASC, sequence ASC)`, so at equal
//! times the collapse check runs before passive growth, which runs before
//! user traffic.

use std::cmp::Reverse;
use std::collections::BinaryHeap;

use contracts::{EngineConfig, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TickKind {
    CollapseCheck,
    PassiveGrowth,
    Message,
    Pull(UserId),
    Stabilize(UserId),
}

impl TickKind {
    fn priority(self) -> u8 {
        match self {
            Self::CollapseCheck => 0,
            Self::PassiveGrowth => 1,
            Self::Message | Self::Pull(_) | Self::Stabilize(_) => 2,
        }
    }

    pub fn is_periodic(self) -> bool {
        matches!(self, Self::CollapseCheck | Self::PassiveGrowth)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledTick {
    pub due_ms: u64,
    pub kind: TickKind,
    sequence: u64,
}

impl PartialOrd for ScheduledTick {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledTick {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.due_ms
            .cmp(&other.due_ms)
            .then_with(|| self.kind.priority().cmp(&other.kind.priority()))
            .then_with(|| self.sequence.cmp(&other.sequence))
    }
}

#[derive(Debug, Clone)]
pub struct TickScheduler {
    queue: BinaryHeap<Reverse<ScheduledTick>>,
    current_ms: u64,
    next_sequence: u64,
    passive_period_ms: u64,
    collapse_period_ms: u64,
}

impl TickScheduler {
    /// Both periodic ticks first fire one full period after time zero.
    pub fn new(passive_period_ms: u64, collapse_period_ms: u64) -> Self {
        let mut scheduler = Self {
            queue: BinaryHeap::new(),
            current_ms: 0,
            next_sequence: 0,
            passive_period_ms: passive_period_ms.max(1),
            collapse_period_ms: collapse_period_ms.max(1),
        };
        scheduler.push(scheduler.passive_period_ms, TickKind::PassiveGrowth);
        scheduler.push(scheduler.collapse_period_ms, TickKind::CollapseCheck);
        scheduler
    }

    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.passive_tick_secs.saturating_mul(1_000),
            config.collapse_check_secs.saturating_mul(1_000),
        )
    }

    pub fn current_ms(&self) -> u64 {
        self.current_ms
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    /// Queues a one-off event. Events in the past fire at the current time.
    pub fn schedule(&mut self, due_ms: u64, kind: TickKind) {
        self.push(due_ms.max(self.current_ms), kind);
    }

    /// Pops the next tick due at or before `until_ms`, advancing the clock.
    pub fn pop_due(&mut self, until_ms: u64) -> Option<ScheduledTick> {
        let Reverse(next) = self.queue.peek()?;
        if next.due_ms > until_ms {
            return None;
        }
        let Reverse(tick) = self.queue.pop()?;
        self.current_ms = tick.due_ms;

        let period = match tick.kind {
            TickKind::PassiveGrowth => Some(self.passive_period_ms),
            TickKind::CollapseCheck => Some(self.collapse_period_ms),
            _ => None,
        };
        // A re-arm past the end of the clock would never fire.
        if let Some(next_due) = period.and_then(|period| tick.due_ms.checked_add(period)) {
            self.push(next_due, tick.kind);
        }
        Some(tick)
    }

    fn push(&mut self, due_ms: u64, kind: TickKind) {
        let tick = ScheduledTick {
            due_ms,
            kind,
            sequence: self.next_sequence,
        };
        self.next_sequence += 1;
        self.queue.push(Reverse(tick));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn drain(scheduler: &mut TickScheduler, until_ms: u64) -> Vec<(u64, TickKind)> {
        let mut fired = Vec::new();
        while let Some(tick) = scheduler.pop_due(until_ms) {
            fired.push((tick.due_ms, tick.kind));
        }
        fired
    }

    #[test]
    fn periodic_ticks_rearm() {
        let mut scheduler = TickScheduler::new(300_000, 30_000);
        let fired = drain(&mut scheduler, 600_000);
        let passive = fired
            .iter()
            .filter(|(_, kind)| *kind == TickKind::PassiveGrowth)
            .count();
        let checks = fired
            .iter()
            .filter(|(_, kind)| *kind == TickKind::CollapseCheck)
            .count();
        assert_eq!(passive, 2);
        assert_eq!(checks, 20);
        assert_eq!(scheduler.current_ms(), 600_000);
    }

    #[test]
    fn equal_times_run_collapse_check_first() {
        let mut scheduler = TickScheduler::new(30_000, 30_000);
        scheduler.schedule(30_000, TickKind::Pull(4));
        let fired = drain(&mut scheduler, 30_000);
        assert_eq!(
            fired,
            vec![
                (30_000, TickKind::CollapseCheck),
                (30_000, TickKind::PassiveGrowth),
                (30_000, TickKind::Pull(4)),
            ]
        );
    }

    #[test]
    fn ad_hoc_events_keep_insertion_order() {
        let mut scheduler = TickScheduler::new(1_000_000, 1_000_000);
        scheduler.schedule(10, TickKind::Message);
        scheduler.schedule(10, TickKind::Stabilize(2));
        scheduler.schedule(5, TickKind::Pull(1));
        let fired = drain(&mut scheduler, 100);
        assert_eq!(
            fired,
            vec![
                (5, TickKind::Pull(1)),
                (10, TickKind::Message),
                (10, TickKind::Stabilize(2)),
            ]
        );
        assert_eq!(scheduler.pending(), 2);
    }

    #[test]
    fn saturated_periods_fire_once_without_overflow() {
        let config = EngineConfig {
            passive_tick_secs: u64::MAX,
            collapse_check_secs: u64::MAX,
            ..EngineConfig::default()
        };
        let mut scheduler = TickScheduler::from_config(&config);
        scheduler.schedule(u64::MAX, TickKind::Message);

        let fired = drain(&mut scheduler, u64::MAX);
        assert_eq!(
            fired,
            vec![
                (u64::MAX, TickKind::CollapseCheck),
                (u64::MAX, TickKind::PassiveGrowth),
                (u64::MAX, TickKind::Message),
            ]
        );
        assert_eq!(scheduler.current_ms(), u64::MAX);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn past_events_fire_at_current_time() {
        let mut scheduler = TickScheduler::new(50, 1_000_000);
        drain(&mut scheduler, 120);
        scheduler.schedule(0, TickKind::Message);
        let tick = scheduler.pop_due(120).expect("due");
        assert_eq!(tick.kind, TickKind::Message);
        assert_eq!(tick.due_ms, 100);
    }
}
