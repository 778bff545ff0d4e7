//! Probability and state engine for the quantum lotto: rarity table, instability-weighted
//! draws, universe collapse, and the credit ledger.

pub mod collapse;
pub mod draw;
pub mod drop_rate;
pub mod economy;
pub mod engine;
pub mod instability;
pub mod rarity;
pub mod scheduler;
pub mod store;
pub mod universe;

pub use collapse::{CollapseMachine, CollapsePhase, CollapsePlan};
pub use draw::Draw;
pub use drop_rate::{DropRateError, DropRates};
pub use economy::{EconomyError, Purchase, Tariff};
pub use engine::{Clock, DispatchOutcome, EngineError, LottoEngine};
pub use instability::{Adjustment, InstabilityAccumulator};
pub use rarity::{RarityTier, RARITY_TABLE};
pub use scheduler::{ScheduledTick, TickKind, TickScheduler};
pub use store::{InMemoryStore, StoreError, UniverseStore};
pub use universe::{clamp_instability, UniverseState};
