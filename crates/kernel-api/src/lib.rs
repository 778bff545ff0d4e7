//! Async host facade: one engine behind a tokio mutex, SQLite persistence, and
//! the periodic passive-growth and collapse-check tickers.

mod persistence;
pub mod ticker;

use std::path::Path;
use std::sync::Arc;

use contracts::{
    Account, ApiError, CollapseReport, EngineConfig, ErrorCode, LootItem, MessageOutcome,
    PullOutcome, StabilizeOutcome, StatusView, TierCount, UserId,
};
use kernel_core::{EngineError, LottoEngine, UniverseStore};
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

pub use persistence::{PersistenceError, SqliteUniverseStore};
pub use ticker::{spawn_tickers, TickerHandle};

const COLLAPSE_CHANNEL_CAPACITY: usize = 64;

/// Cloneable handle to the single engine instance. All calls serialize on
/// one lock, so universe and ledger writes never interleave.
pub struct LottoApi<S = SqliteUniverseStore> {
    engine: Arc<Mutex<LottoEngine<S>>>,
    collapse_tx: broadcast::Sender<CollapseReport>,
}

impl<S> Clone for LottoApi<S> {
    fn clone(&self) -> Self {
        Self {
            engine: Arc::clone(&self.engine),
            collapse_tx: self.collapse_tx.clone(),
        }
    }
}

impl LottoApi<SqliteUniverseStore> {
    pub fn open_sqlite(config: EngineConfig, path: impl AsRef<Path>) -> Result<Self, ApiError> {
        let path = path.as_ref();
        let store = SqliteUniverseStore::open(path).map_err(|err| {
            ApiError::new(
                ErrorCode::PersistenceUnavailable,
                "failed to open sqlite store",
                Some(format!("{}: {err}", path.display())),
            )
        })?;
        let api = Self::open(config, store)?;
        info!(path = %path.display(), "sqlite universe store attached");
        Ok(api)
    }
}

impl<S: UniverseStore + Send + 'static> LottoApi<S> {
    pub fn open(config: EngineConfig, store: S) -> Result<Self, ApiError> {
        let engine = LottoEngine::open(config, store).map_err(|err| api_error(&err))?;
        Ok(Self::from_engine(engine))
    }

    pub fn from_engine(engine: LottoEngine<S>) -> Self {
        let (collapse_tx, _) = broadcast::channel(COLLAPSE_CHANNEL_CAPACITY);
        Self {
            engine: Arc::new(Mutex::new(engine)),
            collapse_tx,
        }
    }

    /// Receives every committed collapse, in order.
    pub fn subscribe_collapses(&self) -> broadcast::Receiver<CollapseReport> {
        self.collapse_tx.subscribe()
    }

    pub async fn config(&self) -> EngineConfig {
        self.engine.lock().await.config().clone()
    }

    pub async fn instability(&self) -> f64 {
        self.engine.lock().await.instability()
    }

    pub async fn handle_message(&self) -> Result<MessageOutcome, ApiError> {
        let mut engine = self.engine.lock().await;
        engine.handle_message().map_err(|err| api_error(&err))
    }

    pub async fn handle_pull(&self, user_id: UserId) -> Result<PullOutcome, ApiError> {
        let mut engine = self.engine.lock().await;
        engine.handle_pull(user_id).map_err(|err| api_error(&err))
    }

    pub async fn handle_stabilize(&self, user_id: UserId) -> Result<StabilizeOutcome, ApiError> {
        let mut engine = self.engine.lock().await;
        engine.handle_stabilize(user_id).map_err(|err| api_error(&err))
    }

    pub async fn get_status(&self) -> Result<StatusView, ApiError> {
        let engine = self.engine.lock().await;
        engine.get_status().map_err(|err| api_error(&err))
    }

    pub async fn get_inventory(&self, user_id: UserId) -> Result<Vec<LootItem>, ApiError> {
        let engine = self.engine.lock().await;
        engine.get_inventory(user_id).map_err(|err| api_error(&err))
    }

    pub async fn inventory_summary(&self, user_id: UserId) -> Result<Vec<TierCount>, ApiError> {
        let engine = self.engine.lock().await;
        engine
            .inventory_summary(user_id)
            .map_err(|err| api_error(&err))
    }

    pub async fn account(&self, user_id: UserId) -> Result<Account, ApiError> {
        let mut engine = self.engine.lock().await;
        engine.account(user_id).map_err(|err| api_error(&err))
    }

    pub async fn grant_credits(&self, user_id: UserId, amount: i64) -> Result<Account, ApiError> {
        let mut engine = self.engine.lock().await;
        engine
            .grant_credits(user_id, amount)
            .map_err(|err| api_error(&err))
    }

    pub async fn on_passive_tick(&self) -> Result<f64, ApiError> {
        let mut engine = self.engine.lock().await;
        engine.on_passive_tick().map_err(|err| api_error(&err))
    }

    /// Runs one collapse check and broadcasts the report if a collapse fired.
    pub async fn on_collapse_check_tick(&self) -> Result<Option<CollapseReport>, ApiError> {
        let report = {
            let mut engine = self.engine.lock().await;
            engine.on_collapse_check_tick().map_err(|err| api_error(&err))?
        };
        if let Some(report) = &report {
            // No subscribers is fine.
            let _ = self.collapse_tx.send(report.clone());
        }
        Ok(report)
    }

    /// Runs `f` with exclusive access to the engine.
    pub async fn with_engine<T>(&self, f: impl FnOnce(&mut LottoEngine<S>) -> T) -> T {
        let mut engine = self.engine.lock().await;
        f(&mut engine)
    }
}

fn api_error(err: &EngineError) -> ApiError {
    warn!(error = %err, "engine call failed");
    err.to_api_error()
}
