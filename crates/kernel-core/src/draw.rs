//! Weighted tier sampling followed by a uniform pick from the tier's reward pool.

use contracts::TierName;
use rand::Rng;

use crate::drop_rate::{DropRateError, DropRates};
use crate::rarity;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Draw {
    pub tier: TierName,
    pub item_name: &'static str,
}

/// Deterministic for a seeded `rng`; touches nothing outside its arguments.
pub fn draw<R: Rng>(instability: f64, rng: &mut R) -> Result<Draw, DropRateError> {
    let rates = DropRates::at(instability)?;
    Ok(draw_from(&rates, rng))
}

pub fn draw_from<R: Rng>(rates: &DropRates, rng: &mut R) -> Draw {
    let tier = sample_tier(rates, rng.random::<f64>());
    let pool = rarity::reward_pool(tier);
    let item_name = pool[rng.random_range(0..pool.len())];
    Draw { tier, item_name }
}

/// Maps a uniform `roll` in `[0, 1)` onto the cumulative table by binary search.
pub fn sample_tier(rates: &DropRates, roll: f64) -> TierName {
    let edges = rates.cumulative();
    let index = edges
        .partition_point(|&edge| edge <= roll)
        .min(edges.len() - 1);
    TierName::ALL[index]
}

#[cfg(test)]
mod tests {
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;

    use super::*;

    #[test]
    fn roll_boundaries_select_expected_tiers() {
        let rates = DropRates::at(0.0).expect("valid");
        assert_eq!(sample_tier(&rates, 0.0), TierName::Common);
        assert_eq!(sample_tier(&rates, 0.5999), TierName::Common);
        assert_eq!(sample_tier(&rates, 0.6001), TierName::Rare);
        assert_eq!(sample_tier(&rates, 0.9999), TierName::RealityBreaker);
        assert_eq!(sample_tier(&rates, 1.0), TierName::RealityBreaker);
    }

    #[test]
    fn seeded_draws_are_reproducible() {
        let mut first = ChaCha8Rng::seed_from_u64(99);
        let mut second = ChaCha8Rng::seed_from_u64(99);
        for step in 0..200 {
            let instability = f64::from(step % 101);
            assert_eq!(
                draw(instability, &mut first).expect("valid"),
                draw(instability, &mut second).expect("valid")
            );
        }
    }

    #[test]
    fn drawn_item_belongs_to_drawn_tier() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        for _ in 0..500 {
            let result = draw(100.0, &mut rng).expect("valid");
            assert_eq!(rarity::tier_of_item(result.item_name), Some(result.tier));
        }
    }

    #[test]
    fn invalid_instability_is_reported() {
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(draw(150.0, &mut rng).is_err());
    }
}
