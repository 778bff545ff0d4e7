//! Periodic drivers for passive growth and the collapse check.
//!
//! Each hook runs on its own interval. A tick that would overlap a slow
//! predecessor is skipped rather than queued, and a failed tick is logged and
//! retried on the next period.

use std::time::Duration;

use contracts::{CollapseReport, MAX_TICK_SECS};
use kernel_core::UniverseStore;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::LottoApi;

#[derive(Debug)]
pub struct TickerHandle {
    shutdown_tx: watch::Sender<bool>,
    collapse_tx: broadcast::Sender<CollapseReport>,
    tasks: Vec<JoinHandle<()>>,
}

impl TickerHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<CollapseReport> {
        self.collapse_tx.subscribe()
    }

    /// Signals both tickers and waits for them to finish their current tick.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            if let Err(err) = task.await {
                warn!(error = %err, "ticker task ended abnormally");
            }
        }
        info!("tickers stopped");
    }
}

/// Spawns both tickers on the current runtime, using the periods from the
/// engine config. The first tick of each fires one full period after spawn.
pub async fn spawn_tickers<S>(api: LottoApi<S>) -> TickerHandle
where
    S: UniverseStore + Send + 'static,
{
    let config = api.config().await;
    let passive_period = Duration::from_secs(config.passive_tick_secs.clamp(1, MAX_TICK_SECS));
    let collapse_period = Duration::from_secs(config.collapse_check_secs.clamp(1, MAX_TICK_SECS));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let collapse_tx = api.collapse_tx.clone();

    let passive = tokio::spawn(run_ticker(
        api.clone(),
        passive_period,
        shutdown_rx.clone(),
        Hook::PassiveGrowth,
    ));
    let collapse = tokio::spawn(run_ticker(
        api,
        collapse_period,
        shutdown_rx,
        Hook::CollapseCheck,
    ));
    info!(
        passive_secs = passive_period.as_secs(),
        collapse_secs = collapse_period.as_secs(),
        "tickers started"
    );

    TickerHandle {
        shutdown_tx,
        collapse_tx,
        tasks: vec![passive, collapse],
    }
}

#[derive(Debug, Clone, Copy)]
enum Hook {
    PassiveGrowth,
    CollapseCheck,
}

async fn run_ticker<S>(
    api: LottoApi<S>,
    period: Duration,
    mut shutdown_rx: watch::Receiver<bool>,
    hook: Hook,
) where
    S: UniverseStore + Send + 'static,
{
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => fire(&api, hook).await,
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    break;
                }
            }
        }
    }
}

async fn fire<S>(api: &LottoApi<S>, hook: Hook)
where
    S: UniverseStore + Send + 'static,
{
    match hook {
        Hook::PassiveGrowth => match api.on_passive_tick().await {
            Ok(instability) => debug!(instability, "passive tick"),
            Err(err) => warn!(error = %err, "passive tick failed"),
        },
        Hook::CollapseCheck => match api.on_collapse_check_tick().await {
            Ok(Some(report)) => {
                info!(removed = report.removed_items, "collapse tick fired")
            }
            Ok(None) => {}
            Err(err) => warn!(error = %err, "collapse check failed"),
        },
    }
}
