use chrono::{DateTime, Utc};
use contracts::{UniverseRecord, INSTABILITY_MAX, INSTABILITY_MIN};

/// Clamp into the instability scale. NaN collapses to the floor.
pub fn clamp_instability(value: f64) -> f64 {
    if value.is_nan() {
        INSTABILITY_MIN
    } else {
        value.clamp(INSTABILITY_MIN, INSTABILITY_MAX)
    }
}

/// The global universe singleton.
///
/// Fields are private: instability moves only through
/// [`crate::instability::InstabilityAccumulator`], and the threshold and
/// collapse bookkeeping only through [`crate::collapse::CollapseMachine`].
#[derive(Debug, Clone, PartialEq)]
pub struct UniverseState {
    instability: f64,
    collapse_threshold: f64,
    last_collapse_at: Option<DateTime<Utc>>,
    total_messages: u64,
    collapse_count: u64,
}

impl UniverseState {
    pub(crate) fn genesis(collapse_threshold: f64) -> Self {
        Self {
            instability: INSTABILITY_MIN,
            collapse_threshold,
            last_collapse_at: None,
            total_messages: 0,
            collapse_count: 0,
        }
    }

    /// Rebuild from a persisted record, clamping a stored instability that
    /// drifted out of range.
    pub fn from_record(record: &UniverseRecord) -> Self {
        Self {
            instability: clamp_instability(record.instability),
            collapse_threshold: record.collapse_threshold,
            last_collapse_at: record.last_collapse_at,
            total_messages: record.total_messages,
            collapse_count: record.collapse_count,
        }
    }

    pub fn to_record(&self) -> UniverseRecord {
        UniverseRecord {
            instability: self.instability,
            collapse_threshold: self.collapse_threshold,
            last_collapse_at: self.last_collapse_at,
            total_messages: self.total_messages,
            collapse_count: self.collapse_count,
        }
    }

    pub fn instability(&self) -> f64 {
        self.instability
    }

    pub fn last_collapse_at(&self) -> Option<DateTime<Utc>> {
        self.last_collapse_at
    }

    pub fn total_messages(&self) -> u64 {
        self.total_messages
    }

    pub fn collapse_count(&self) -> u64 {
        self.collapse_count
    }

    pub(crate) fn collapse_threshold(&self) -> f64 {
        self.collapse_threshold
    }

    /// Applies `delta` and clamps. Returns the new instability.
    pub(crate) fn shift_instability(&mut self, delta: f64) -> f64 {
        self.instability = clamp_instability(self.instability + delta);
        self.instability
    }

    pub(crate) fn record_message(&mut self) {
        self.total_messages = self.total_messages.saturating_add(1);
    }

    pub(crate) fn reset_after_collapse(&mut self, new_threshold: f64, at: DateTime<Utc>) {
        self.instability = INSTABILITY_MIN;
        self.collapse_threshold = new_threshold;
        self.last_collapse_at = Some(at);
        self.collapse_count = self.collapse_count.saturating_add(1);
    }
}
