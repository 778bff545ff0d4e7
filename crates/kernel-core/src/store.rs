//! Persistence seam for the engine, plus an in-memory implementation.

use std::collections::BTreeMap;
use std::fmt;

use contracts::{
    Account, HolderStanding, LootDraft, LootId, LootItem, TierCount, TierName, UniverseRecord,
    UserId,
};

#[derive(Debug)]
pub enum StoreError {
    /// The backend refused or could not reach storage.
    Unavailable(String),
    Backend(Box<dyn std::error::Error + Send + Sync>),
}

impl fmt::Display for StoreError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unavailable(reason) => write!(f, "store unavailable: {reason}"),
            Self::Backend(err) => write!(f, "store backend error: {err}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Unavailable(_) => None,
            Self::Backend(err) => Some(err.as_ref()),
        }
    }
}

/// Record-level persistence for accounts, loot, and the universe singleton.
///
/// Each `commit_*` call must apply all of its writes or none of them.
pub trait UniverseStore {
    fn load_universe(&self) -> Result<Option<UniverseRecord>, StoreError>;

    fn save_universe(&mut self, universe: &UniverseRecord) -> Result<(), StoreError>;

    fn load_account(&self, user_id: UserId) -> Result<Option<Account>, StoreError>;

    fn save_account(&mut self, account: &Account) -> Result<(), StoreError>;

    /// Persists the debited account, appends the drawn item, and stores the
    /// post-pull universe.
    fn commit_pull(
        &mut self,
        account: &Account,
        draft: &LootDraft,
        universe: &UniverseRecord,
    ) -> Result<LootItem, StoreError>;

    fn commit_stabilize(
        &mut self,
        account: &Account,
        universe: &UniverseRecord,
    ) -> Result<(), StoreError>;

    fn loot_ids(&self) -> Result<Vec<LootId>, StoreError>;

    /// Removes `removed` and stores the reset universe.
    fn commit_collapse(
        &mut self,
        removed: &[LootId],
        universe: &UniverseRecord,
    ) -> Result<(), StoreError>;

    /// Rarest tier first, newest first within a tier.
    fn inventory(&self, user_id: UserId) -> Result<Vec<LootItem>, StoreError>;

    fn tier_counts(&self, user_id: UserId) -> Result<Vec<TierCount>, StoreError> {
        Ok(count_by_tier(&self.inventory(user_id)?))
    }

    /// Owners with at least one item, by item count desc then user id asc.
    fn top_holders(&self, limit: usize) -> Result<Vec<HolderStanding>, StoreError>;
}

/// Per-tier counts in table order, tiers with no items omitted.
pub fn count_by_tier(items: &[LootItem]) -> Vec<TierCount> {
    let mut counts = [0_u64; 6];
    for item in items {
        counts[item.tier.rank()] += 1;
    }
    TierName::ALL
        .into_iter()
        .zip(counts)
        .filter(|(_, count)| *count > 0)
        .map(|(tier, count)| TierCount { tier, count })
        .collect()
}

pub fn sort_inventory(items: &mut [LootItem]) {
    items.sort_by(|left, right| {
        right
            .tier
            .rank()
            .cmp(&left.tier.rank())
            .then_with(|| right.acquired_at.cmp(&left.acquired_at))
            .then_with(|| right.loot_id.cmp(&left.loot_id))
    });
}

#[derive(Debug, Default)]
pub struct InMemoryStore {
    universe: Option<UniverseRecord>,
    accounts: BTreeMap<UserId, Account>,
    loot: BTreeMap<LootId, LootItem>,
    next_loot_id: LootId,
    unavailable: bool,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_universe(universe: UniverseRecord) -> Self {
        Self {
            universe: Some(universe),
            ..Self::default()
        }
    }

    /// While set, every write fails with [`StoreError::Unavailable`].
    pub fn set_unavailable(&mut self, unavailable: bool) {
        self.unavailable = unavailable;
    }

    pub fn loot_count(&self) -> usize {
        self.loot.len()
    }

    pub fn insert_loot(&mut self, draft: LootDraft) -> LootItem {
        self.next_loot_id += 1;
        let item = LootItem::from_draft(self.next_loot_id, draft);
        self.loot.insert(item.loot_id, item.clone());
        item
    }

    fn ensure_writable(&self) -> Result<(), StoreError> {
        if self.unavailable {
            return Err(StoreError::Unavailable(
                "in-memory store marked unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

impl UniverseStore for InMemoryStore {
    fn load_universe(&self) -> Result<Option<UniverseRecord>, StoreError> {
        Ok(self.universe.clone())
    }

    fn save_universe(&mut self, universe: &UniverseRecord) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.universe = Some(universe.clone());
        Ok(())
    }

    fn load_account(&self, user_id: UserId) -> Result<Option<Account>, StoreError> {
        Ok(self.accounts.get(&user_id).cloned())
    }

    fn save_account(&mut self, account: &Account) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.accounts.insert(account.user_id, account.clone());
        Ok(())
    }

    fn commit_pull(
        &mut self,
        account: &Account,
        draft: &LootDraft,
        universe: &UniverseRecord,
    ) -> Result<LootItem, StoreError> {
        self.ensure_writable()?;
        self.accounts.insert(account.user_id, account.clone());
        self.universe = Some(universe.clone());
        Ok(self.insert_loot(draft.clone()))
    }

    fn commit_stabilize(
        &mut self,
        account: &Account,
        universe: &UniverseRecord,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        self.accounts.insert(account.user_id, account.clone());
        self.universe = Some(universe.clone());
        Ok(())
    }

    fn loot_ids(&self) -> Result<Vec<LootId>, StoreError> {
        Ok(self.loot.keys().copied().collect())
    }

    fn commit_collapse(
        &mut self,
        removed: &[LootId],
        universe: &UniverseRecord,
    ) -> Result<(), StoreError> {
        self.ensure_writable()?;
        for loot_id in removed {
            self.loot.remove(loot_id);
        }
        self.universe = Some(universe.clone());
        Ok(())
    }

    fn inventory(&self, user_id: UserId) -> Result<Vec<LootItem>, StoreError> {
        let mut items = self
            .loot
            .values()
            .filter(|item| item.owner_id == user_id)
            .cloned()
            .collect::<Vec<_>>();
        sort_inventory(&mut items);
        Ok(items)
    }

    fn top_holders(&self, limit: usize) -> Result<Vec<HolderStanding>, StoreError> {
        let mut counts = BTreeMap::<UserId, u64>::new();
        for item in self.loot.values() {
            *counts.entry(item.owner_id).or_insert(0) += 1;
        }
        let mut standings = counts
            .into_iter()
            .map(|(user_id, item_count)| HolderStanding {
                user_id,
                item_count,
            })
            .collect::<Vec<_>>();
        standings.sort_by(|left, right| {
            right
                .item_count
                .cmp(&left.item_count)
                .then_with(|| left.user_id.cmp(&right.user_id))
        });
        standings.truncate(limit);
        Ok(standings)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{DateTime, Duration, Utc};

    use super::*;

    fn draft(owner_id: UserId, tier: TierName, minutes: i64) -> LootDraft {
        LootDraft {
            owner_id,
            tier,
            item_name: format!("{tier} item"),
            acquired_at: DateTime::<Utc>::UNIX_EPOCH + Duration::minutes(minutes),
        }
    }

    #[test]
    fn inventory_orders_rarest_then_newest() {
        let mut store = InMemoryStore::new();
        store.insert_loot(draft(1, TierName::Common, 5));
        store.insert_loot(draft(1, TierName::Mythic, 1));
        store.insert_loot(draft(1, TierName::Common, 9));
        store.insert_loot(draft(2, TierName::RealityBreaker, 2));

        let items = store.inventory(1).expect("inventory");
        let order = items
            .iter()
            .map(|item| (item.tier, item.acquired_at))
            .collect::<Vec<_>>();
        assert_eq!(order.len(), 3);
        assert_eq!(order[0].0, TierName::Mythic);
        assert_eq!(order[1].0, TierName::Common);
        assert!(order[1].1 > order[2].1);
    }

    #[test]
    fn tier_counts_skip_empty_tiers() {
        let mut store = InMemoryStore::new();
        store.insert_loot(draft(1, TierName::Epic, 0));
        store.insert_loot(draft(1, TierName::Epic, 1));
        store.insert_loot(draft(1, TierName::Common, 2));
        assert_eq!(
            store.tier_counts(1).expect("counts"),
            vec![
                TierCount {
                    tier: TierName::Common,
                    count: 1
                },
                TierCount {
                    tier: TierName::Epic,
                    count: 2
                },
            ]
        );
    }

    #[test]
    fn top_holders_break_ties_by_user_id() {
        let mut store = InMemoryStore::new();
        for owner in [5, 3, 3, 5, 9] {
            store.insert_loot(draft(owner, TierName::Rare, 0));
        }
        let holders = store.top_holders(2).expect("holders");
        assert_eq!(
            holders,
            vec![
                HolderStanding {
                    user_id: 3,
                    item_count: 2
                },
                HolderStanding {
                    user_id: 5,
                    item_count: 2
                },
            ]
        );
    }

    #[test]
    fn unavailable_store_rejects_writes_and_keeps_state() {
        let mut store = InMemoryStore::new();
        store.insert_loot(draft(1, TierName::Rare, 0));
        store.set_unavailable(true);
        let universe = UniverseRecord {
            instability: 0.0,
            collapse_threshold: 96.0,
            last_collapse_at: None,
            total_messages: 0,
            collapse_count: 1,
        };
        assert!(matches!(
            store.commit_collapse(&[1], &universe),
            Err(StoreError::Unavailable(_))
        ));
        assert_eq!(store.loot_count(), 1);
        assert_eq!(store.load_universe().expect("load"), None);
    }
}
