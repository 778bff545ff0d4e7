//! Static rarity table: tiers, base weights, instability sensitivity, and reward pools.
//!
//! Base weights sum to 1.0 so that instability 0 is the neutral point of the
//! drop-rate curve. Each tier scales linearly from a multiplier of 1.0 at
//! instability 0 to `ceiling_multiplier` at instability 100.

use contracts::TierName;

#[derive(Debug, Clone, PartialEq)]
pub struct RarityTier {
    pub name: TierName,
    pub base_weight: f64,
    pub ceiling_multiplier: f64,
    pub reward_pool: &'static [&'static str],
    pub symbol: &'static str,
    pub color: u32,
}

impl RarityTier {
    pub fn rank(&self) -> usize {
        self.name.rank()
    }
}

const COMMON_POOL: &[&str] = &[
    "Quantum Dust",
    "Broken Clock",
    "Rusty Coin",
    "Faded Photograph",
    "Mundane Stone",
    "Worn Button",
    "Ordinary Paperclip",
    "Plain Marble",
    "Standard Penny",
    "Simple Thread",
];

const RARE_POOL: &[&str] = &[
    "Glowing Crystal",
    "Mysterious Key",
    "Ancient Scroll",
    "Enchanted Ring",
    "Silver Dagger",
    "Ethereal Feather",
    "Mystic Orb",
    "Rune Stone",
    "Arcane Symbol",
    "Blessed Charm",
];

const EPIC_POOL: &[&str] = &[
    "Void Fragment",
    "Temporal Shard",
    "Dimensional Gate Key",
    "Chaos Essence",
    "Stellar Crown",
    "Infinity Loop",
    "Quantum Entangler",
    "Nebula Core",
    "Warp Catalyst",
    "Astral Compass",
];

const LEGENDARY_POOL: &[&str] = &[
    "Singularity Heart",
    "Time Fracture",
    "Reality Anchor",
    "Cosmic Thread",
    "Eternal Flame",
    "Universe Seed",
    "Dimensional Rift",
    "Probability Manipulator",
    "Fate Weaver",
    "Spacetime Fabric",
];

const MYTHIC_POOL: &[&str] = &[
    "Primordial Spark",
    "Omega Point",
    "Genesis Code",
    "Entropy Reversal",
    "Absolute Zero",
    "Infinite Horizon",
    "Quantum Godhood",
    "Big Bang Remnant",
    "Existential Key",
    "Multiverse Core",
];

const REALITY_BREAKER_POOL: &[&str] = &[
    "The Impossible Thing",
    "Paradox Incarnate",
    "Laws of Physics (Broken)",
    "End of Everything",
    "Beginning After End",
    "Schrödinger's Answer",
    "Divide by Zero",
    "Fourth Wall Fragment",
    "Meta Singularity",
    "Conceptual Nullifier",
];

/// Ordered most common first; index equals `TierName::rank`.
pub const RARITY_TABLE: [RarityTier; 6] = [
    RarityTier {
        name: TierName::Common,
        base_weight: 0.60,
        ceiling_multiplier: 0.45,
        reward_pool: COMMON_POOL,
        symbol: "⚪",
        color: 0x95a5a6,
    },
    RarityTier {
        name: TierName::Rare,
        base_weight: 0.25,
        ceiling_multiplier: 0.60,
        reward_pool: RARE_POOL,
        symbol: "🔵",
        color: 0x3498db,
    },
    RarityTier {
        name: TierName::Epic,
        base_weight: 0.10,
        ceiling_multiplier: 0.75,
        reward_pool: EPIC_POOL,
        symbol: "🟣",
        color: 0x9b59b6,
    },
    RarityTier {
        name: TierName::Legendary,
        base_weight: 0.04,
        ceiling_multiplier: 3.0,
        reward_pool: LEGENDARY_POOL,
        symbol: "🟡",
        color: 0xf1c40f,
    },
    RarityTier {
        name: TierName::Mythic,
        base_weight: 0.008,
        ceiling_multiplier: 6.0,
        reward_pool: MYTHIC_POOL,
        symbol: "🔴",
        color: 0xe74c3c,
    },
    RarityTier {
        name: TierName::RealityBreaker,
        base_weight: 0.002,
        ceiling_multiplier: 15.0,
        reward_pool: REALITY_BREAKER_POOL,
        symbol: "💠",
        color: 0x00ffff,
    },
];

pub fn tiers() -> &'static [RarityTier] {
    &RARITY_TABLE
}

pub fn tier(name: TierName) -> &'static RarityTier {
    &RARITY_TABLE[name.rank()]
}

pub fn base_weight(name: TierName) -> f64 {
    tier(name).base_weight
}

pub fn reward_pool(name: TierName) -> &'static [&'static str] {
    tier(name).reward_pool
}

/// Tier that owns `item_name`, if any pool lists it.
pub fn tier_of_item(item_name: &str) -> Option<TierName> {
    RARITY_TABLE
        .iter()
        .find(|tier| tier.reward_pool.contains(&item_name))
        .map(|tier| tier.name)
}
