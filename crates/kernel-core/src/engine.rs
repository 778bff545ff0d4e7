//! Single-writer engine tying the accumulator, collapse machine, draw engine,
//! and ledger to a [`UniverseStore`].
//!
//! Every mutating handler takes `&mut self`, so a host that owns the engine
//! behind one lock (or one task) serializes all universe and ledger writes.
//! Handlers compute the next universe and account on copies, commit them to
//! the store in one call, and only then swap them into memory.

use std::fmt;

use chrono::{DateTime, Utc};
use contracts::{
    Account, ApiError, CollapseReport, ConfigError, EngineConfig, ErrorCode, InstabilityLevel,
    LootDraft, LootItem, MessageOutcome, PullOutcome, StabilizeOutcome, StatusView, TierCount,
    UserId, PULL_WARNING_FLOOR, SCHEMA_VERSION_V1,
};
use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use tracing::{debug, info, warn};

use crate::collapse::CollapseMachine;
use crate::draw;
use crate::drop_rate::{DropRateError, DropRates};
use crate::economy::{self, EconomyError, Purchase, Tariff};
use crate::instability::InstabilityAccumulator;
use crate::scheduler::TickKind;
use crate::store::{StoreError, UniverseStore};
use crate::universe::UniverseState;

pub type Clock = fn() -> DateTime<Utc>;

#[derive(Debug)]
pub enum EngineError {
    InvalidConfig(ConfigError),
    InvalidInstability(DropRateError),
    Economy(EconomyError),
    Persistence(StoreError),
}

impl EngineError {
    pub fn error_code(&self) -> ErrorCode {
        match self {
            Self::InvalidConfig(_) => ErrorCode::InvalidConfig,
            Self::InvalidInstability(_) => ErrorCode::InvalidInstability,
            Self::Economy(_) => ErrorCode::InternalError,
            Self::Persistence(_) => ErrorCode::PersistenceUnavailable,
        }
    }

    pub fn to_api_error(&self) -> ApiError {
        ApiError::new(self.error_code(), self.to_string(), None)
    }
}

impl fmt::Display for EngineError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidConfig(err) => write!(f, "invalid engine config: {err}"),
            Self::InvalidInstability(err) => write!(f, "drop-rate input defect: {err}"),
            Self::Economy(err) => write!(f, "ledger error: {err}"),
            Self::Persistence(err) => write!(f, "persistence unavailable: {err}"),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::InvalidConfig(err) => Some(err),
            Self::InvalidInstability(err) => Some(err),
            Self::Economy(err) => Some(err),
            Self::Persistence(err) => Some(err),
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(value: StoreError) -> Self {
        Self::Persistence(value)
    }
}

impl From<ConfigError> for EngineError {
    fn from(value: ConfigError) -> Self {
        Self::InvalidConfig(value)
    }
}

impl From<DropRateError> for EngineError {
    fn from(value: DropRateError) -> Self {
        Self::InvalidInstability(value)
    }
}

impl From<EconomyError> for EngineError {
    fn from(value: EconomyError) -> Self {
        Self::Economy(value)
    }
}

/// Outcome of [`LottoEngine::dispatch`], one variant per [`TickKind`].
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    CollapseCheck(Option<CollapseReport>),
    PassiveGrowth(f64),
    Message(MessageOutcome),
    Pull(PullOutcome),
    Stabilize(StabilizeOutcome),
}

#[derive(Debug)]
pub struct LottoEngine<S> {
    config: EngineConfig,
    store: S,
    universe: UniverseState,
    accumulator: InstabilityAccumulator,
    collapse: CollapseMachine,
    tariff: Tariff,
    rng: ChaCha8Rng,
    clock: Clock,
}

impl<S: UniverseStore> LottoEngine<S> {
    /// Validates `config`, then loads the universe from `store` or creates
    /// and persists a fresh one.
    pub fn open(config: EngineConfig, mut store: S) -> Result<Self, EngineError> {
        config.validate()?;

        let mut rng = match config.seed {
            Some(seed) => ChaCha8Rng::seed_from_u64(seed),
            None => ChaCha8Rng::from_rng(&mut rand::rng()),
        };
        let collapse = CollapseMachine::from_config(&config);

        let universe = match store.load_universe()? {
            Some(record) => UniverseState::from_record(&record),
            None => {
                let universe = collapse.genesis(&mut rng);
                store.save_universe(&universe.to_record())?;
                info!(
                    threshold = collapse.threshold(&universe),
                    "created fresh universe"
                );
                universe
            }
        };

        Ok(Self {
            accumulator: InstabilityAccumulator::from_config(&config),
            tariff: Tariff::from_config(&config),
            collapse,
            config,
            store,
            universe,
            rng,
            clock: Utc::now,
        })
    }

    pub fn with_clock(mut self, clock: Clock) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn universe(&self) -> &UniverseState {
        &self.universe
    }

    pub fn instability(&self) -> f64 {
        self.universe.instability()
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }

    pub fn into_store(self) -> S {
        self.store
    }

    pub fn handle_message(&mut self) -> Result<MessageOutcome, EngineError> {
        let mut next = self.universe.clone();
        let adjustment = self.accumulator.on_message(&mut next);
        let tremor = adjustment.instability > self.config.tremor_floor
            && self.rng.random_bool(self.config.tremor_chance);

        self.store.save_universe(&next.to_record())?;
        self.universe = next;

        Ok(MessageOutcome {
            instability: adjustment.instability,
            total_messages: self.universe.total_messages(),
            tremor,
        })
    }

    /// Debits the pull cost, draws at the current instability, then raises
    /// instability by the pull increment.
    pub fn handle_pull(&mut self, user_id: UserId) -> Result<PullOutcome, EngineError> {
        let mut account = self.load_or_create_account(user_id)?;
        let instability = self.universe.instability();

        if let Err(reason) = self.tariff.charge(&mut account, Purchase::Pull) {
            debug!(user_id, %reason, "pull rejected");
            return Ok(PullOutcome::rejected(reason, instability, account.credits));
        }

        let drawn = draw::draw(instability, &mut self.rng)?;
        let mut next = self.universe.clone();
        let adjustment = self.accumulator.on_pull(&mut next, &mut self.rng);
        let draft = LootDraft {
            owner_id: user_id,
            tier: drawn.tier,
            item_name: drawn.item_name.to_string(),
            acquired_at: (self.clock)(),
        };

        let loot = self
            .store
            .commit_pull(&account, &draft, &next.to_record())
            .inspect_err(|err| warn!(user_id, error = %err, "pull commit failed"))?;
        self.universe = next;

        debug!(
            user_id,
            tier = %loot.tier,
            item = %loot.item_name,
            instability = adjustment.instability,
            "pull committed"
        );
        Ok(PullOutcome {
            success: true,
            loot: Some(loot),
            reason: None,
            instability: adjustment.instability,
            credits_remaining: account.credits,
            warning: adjustment.instability > PULL_WARNING_FLOOR,
        })
    }

    pub fn handle_stabilize(&mut self, user_id: UserId) -> Result<StabilizeOutcome, EngineError> {
        let mut account = self.load_or_create_account(user_id)?;
        let before = self.universe.instability();

        if let Err(reason) = self.tariff.charge(&mut account, Purchase::Stabilize) {
            debug!(user_id, %reason, "stabilize rejected");
            return Ok(StabilizeOutcome::rejected(reason, before, account.credits));
        }

        let mut next = self.universe.clone();
        let adjustment = self.accumulator.on_stabilize(&mut next, &mut self.rng);
        self.store
            .commit_stabilize(&account, &next.to_record())
            .inspect_err(|err| warn!(user_id, error = %err, "stabilize commit failed"))?;
        self.universe = next;

        debug!(user_id, before, after = adjustment.instability, "stabilize committed");
        Ok(StabilizeOutcome {
            success: true,
            delta: Some(-adjustment.requested),
            reason: None,
            instability_before: before,
            instability: adjustment.instability,
            credits_remaining: account.credits,
        })
    }

    pub fn grant_credits(&mut self, user_id: UserId, amount: i64) -> Result<Account, EngineError> {
        let mut account = self.load_or_create_account(user_id)?;
        economy::credit(&mut account, amount)?;
        self.store.save_account(&account)?;
        Ok(account)
    }

    /// Loads the account, creating it with the starting balance on first use.
    pub fn account(&mut self, user_id: UserId) -> Result<Account, EngineError> {
        self.load_or_create_account(user_id)
    }

    pub fn get_status(&self) -> Result<StatusView, EngineError> {
        let instability = self.universe.instability();
        let rates = DropRates::at(instability)?;
        Ok(StatusView {
            schema_version: SCHEMA_VERSION_V1.to_string(),
            instability,
            threshold: self.collapse.threshold(&self.universe),
            level: InstabilityLevel::from_instability(instability),
            top_holders: self.store.top_holders(self.config.top_holders_limit)?,
            drop_rates: rates.tier_rates(),
            collapse_count: self.universe.collapse_count(),
            last_collapse_at: self.universe.last_collapse_at(),
            total_messages: self.universe.total_messages(),
        })
    }

    pub fn get_inventory(&self, user_id: UserId) -> Result<Vec<LootItem>, EngineError> {
        Ok(self.store.inventory(user_id)?)
    }

    pub fn inventory_summary(&self, user_id: UserId) -> Result<Vec<TierCount>, EngineError> {
        Ok(self.store.tier_counts(user_id)?)
    }

    pub fn on_passive_tick(&mut self) -> Result<f64, EngineError> {
        let mut next = self.universe.clone();
        let adjustment = self.accumulator.on_passive_tick(&mut next, &mut self.rng);
        self.store.save_universe(&next.to_record())?;
        self.universe = next;
        debug!(instability = adjustment.instability, "passive growth");
        Ok(adjustment.instability)
    }

    /// Fires a collapse when instability is above the threshold. The reset
    /// only takes effect if the store accepts the removals.
    pub fn on_collapse_check_tick(&mut self) -> Result<Option<CollapseReport>, EngineError> {
        if !self.collapse.should_collapse(&self.universe) {
            return Ok(None);
        }

        let loot_ids = self.store.loot_ids()?;
        let plan = self
            .collapse
            .plan(&self.universe, &loot_ids, &mut self.rng, (self.clock)());
        self.store
            .commit_collapse(&plan.removed, &plan.next_state.to_record())
            .inspect_err(|err| warn!(error = %err, "collapse commit failed; universe unchanged"))?;

        let report = plan.report();
        self.universe = plan.next_state;
        info!(
            removed = report.removed_items,
            total = report.total_items_before,
            wipe_fraction = report.wipe_fraction,
            new_threshold = report.new_threshold,
            collapse_count = report.collapse_count,
            "universe collapsed"
        );
        Ok(Some(report))
    }

    pub fn dispatch(&mut self, kind: TickKind) -> Result<DispatchOutcome, EngineError> {
        Ok(match kind {
            TickKind::CollapseCheck => {
                DispatchOutcome::CollapseCheck(self.on_collapse_check_tick()?)
            }
            TickKind::PassiveGrowth => DispatchOutcome::PassiveGrowth(self.on_passive_tick()?),
            TickKind::Message => DispatchOutcome::Message(self.handle_message()?),
            TickKind::Pull(user_id) => DispatchOutcome::Pull(self.handle_pull(user_id)?),
            TickKind::Stabilize(user_id) => {
                DispatchOutcome::Stabilize(self.handle_stabilize(user_id)?)
            }
        })
    }

    fn load_or_create_account(&mut self, user_id: UserId) -> Result<Account, EngineError> {
        if let Some(account) = self.store.load_account(user_id)? {
            return Ok(account);
        }
        let account = Account::new(user_id, self.config.starting_credits);
        self.store.save_account(&account)?;
        debug!(user_id, credits = account.credits, "account created");
        Ok(account)
    }
}
