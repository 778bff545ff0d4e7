//! Maps an instability value to a normalized distribution over rarity tiers.

use std::fmt;

use contracts::{TierName, TierRate, INSTABILITY_MAX, INSTABILITY_MIN};

use crate::rarity::{self, RarityTier};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DropRateError {
    InvalidInstabilityInput(f64),
}

impl fmt::Display for DropRateError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidInstabilityInput(value) => write!(
                f,
                "instability {value} is outside [{INSTABILITY_MIN}, {INSTABILITY_MAX}]"
            ),
        }
    }
}

impl std::error::Error for DropRateError {}

/// Probabilities indexed by tier rank. Always sums to 1.0.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DropRates {
    instability: f64,
    rates: [f64; 6],
}

impl DropRates {
    pub fn at(instability: f64) -> Result<Self, DropRateError> {
        if !(INSTABILITY_MIN..=INSTABILITY_MAX).contains(&instability) {
            return Err(DropRateError::InvalidInstabilityInput(instability));
        }

        let mut rates = [0.0; 6];
        for (slot, tier) in rates.iter_mut().zip(rarity::tiers()) {
            *slot = tier.base_weight * sensitivity(tier, instability);
        }

        let total = rates.iter().sum::<f64>();
        for slot in &mut rates {
            *slot /= total;
        }

        Ok(Self { instability, rates })
    }

    pub fn instability(&self) -> f64 {
        self.instability
    }

    pub fn probability(&self, tier: TierName) -> f64 {
        self.rates[tier.rank()]
    }

    pub fn iter(&self) -> impl Iterator<Item = (TierName, f64)> + '_ {
        TierName::ALL.into_iter().zip(self.rates.iter().copied())
    }

    /// Running totals in table order; the last entry is 1.0 up to rounding.
    pub fn cumulative(&self) -> [f64; 6] {
        let mut edges = [0.0; 6];
        let mut running = 0.0;
        for (edge, rate) in edges.iter_mut().zip(self.rates) {
            running += rate;
            *edge = running;
        }
        edges
    }

    pub fn tier_rates(&self) -> Vec<TierRate> {
        self.iter()
            .map(|(tier, probability)| TierRate { tier, probability })
            .collect()
    }
}

/// Linear interpolation between 1.0 at instability 0 and the tier's ceiling at 100.
pub fn sensitivity(tier: &RarityTier, instability: f64) -> f64 {
    let chaos = instability / INSTABILITY_MAX;
    1.0 + (tier.ceiling_multiplier - 1.0) * chaos
}
