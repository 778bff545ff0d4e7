use std::env;
use std::fs;

use contracts::{EngineConfig, UserId};
use kernel_api::{spawn_tickers, LottoApi};
use kernel_core::{DispatchOutcome, DropRates, InMemoryStore, LottoEngine, TickKind, TickScheduler};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;

fn print_usage() {
    println!("quantum-lotto [--config <path>] <command>");
    println!("commands:");
    println!("  status");
    println!("  pull <user_id>");
    println!("  stabilize <user_id>");
    println!("  message [count]");
    println!("  inventory <user_id>");
    println!("  account <user_id>");
    println!("  grant <user_id> <amount>");
    println!("  rates [instability]");
    println!("  tick-passive");
    println!("  check-collapse");
    println!("  run");
    println!("    drives passive growth and collapse checks until Ctrl-C");
    println!("  simulate <seed> [minutes] [users]");
    println!("    deterministic offline run against an in-memory store");
    println!("env: LOTTO_CONFIG, LOTTO_SQLITE_PATH, RUST_LOG");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn parse_u64(value: Option<&String>, label: &str) -> Result<u64, String> {
    let raw = value.ok_or_else(|| format!("missing {label}"))?;
    raw.parse::<u64>()
        .map_err(|_| format!("invalid {label}: {raw}"))
}

fn parse_user_id(value: Option<&String>) -> Result<UserId, String> {
    parse_u64(value, "user_id")
}

fn parse_optional_u64(value: Option<&String>, label: &str, default: u64) -> Result<u64, String> {
    value
        .map(|raw| {
            raw.parse::<u64>()
                .map_err(|_| format!("invalid {label}: {raw}"))
        })
        .transpose()
        .map(|parsed| parsed.unwrap_or(default))
}

fn default_sqlite_path() -> String {
    env::var("LOTTO_SQLITE_PATH")
        .ok()
        .filter(|value| !value.trim().is_empty())
        .unwrap_or_else(|| "quantum_lotto.sqlite".to_string())
}

/// Removes `--config <path>` from `args` and returns the path, falling back
/// to `LOTTO_CONFIG`.
fn take_config_path(args: &mut Vec<String>) -> Result<Option<String>, String> {
    if let Some(index) = args.iter().position(|arg| arg == "--config") {
        if index + 1 >= args.len() {
            return Err("missing value for --config".to_string());
        }
        let path = args.remove(index + 1);
        args.remove(index);
        return Ok(Some(path));
    }
    Ok(env::var("LOTTO_CONFIG")
        .ok()
        .filter(|value| !value.trim().is_empty()))
}

fn load_config(path: Option<&str>) -> Result<EngineConfig, String> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    let raw = fs::read_to_string(path).map_err(|err| format!("failed to read {path}: {err}"))?;
    let config = serde_json::from_str::<EngineConfig>(&raw)
        .map_err(|err| format!("invalid config {path}: {err}"))?;
    config
        .validate()
        .map_err(|err| format!("invalid config {path}: {err}"))?;
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<(), String> {
    let rendered =
        serde_json::to_string_pretty(value).map_err(|err| format!("failed to render: {err}"))?;
    println!("{rendered}");
    Ok(())
}

fn open_api(config: EngineConfig) -> Result<LottoApi, String> {
    let path = default_sqlite_path();
    LottoApi::open_sqlite(config, &path).map_err(|err| format!("{err}"))
}

fn rates(args: &[String]) -> Result<(), String> {
    let instability = args
        .get(2)
        .map(|raw| {
            raw.parse::<f64>()
                .map_err(|_| format!("invalid instability: {raw}"))
        })
        .transpose()?
        .unwrap_or(0.0);
    let rates = DropRates::at(instability).map_err(|err| err.to_string())?;
    print_json(&rates.tier_rates())
}

const STORE_COMMANDS: [&str; 10] = [
    "status",
    "pull",
    "stabilize",
    "message",
    "inventory",
    "account",
    "grant",
    "tick-passive",
    "check-collapse",
    "run",
];

fn simulation_end_ms(minutes: u64) -> Result<u64, String> {
    minutes
        .checked_mul(60_000)
        .ok_or_else(|| format!("invalid minutes: {minutes} is too large"))
}

async fn run_command(command: &str, args: &[String], config: EngineConfig) -> Result<(), String> {
    if !STORE_COMMANDS.contains(&command) {
        return Err(format!("unknown command: {command}"));
    }
    let api = open_api(config)?;
    match command {
        "status" => print_json(&api.get_status().await.map_err(|err| err.to_string())?),
        "pull" => {
            let user_id = parse_user_id(args.get(2))?;
            print_json(&api.handle_pull(user_id).await.map_err(|err| err.to_string())?)
        }
        "stabilize" => {
            let user_id = parse_user_id(args.get(2))?;
            print_json(
                &api.handle_stabilize(user_id)
                    .await
                    .map_err(|err| err.to_string())?,
            )
        }
        "message" => {
            let count = parse_optional_u64(args.get(2), "count", 1)?;
            let mut last = None;
            for _ in 0..count {
                last = Some(api.handle_message().await.map_err(|err| err.to_string())?);
            }
            print_json(&last)
        }
        "inventory" => {
            let user_id = parse_user_id(args.get(2))?;
            let items = api
                .get_inventory(user_id)
                .await
                .map_err(|err| err.to_string())?;
            let summary = api
                .inventory_summary(user_id)
                .await
                .map_err(|err| err.to_string())?;
            print_json(&json!({ "summary": summary, "items": items }))
        }
        "account" => {
            let user_id = parse_user_id(args.get(2))?;
            print_json(&api.account(user_id).await.map_err(|err| err.to_string())?)
        }
        "grant" => {
            let user_id = parse_user_id(args.get(2))?;
            let amount = args
                .get(3)
                .ok_or_else(|| "missing amount".to_string())?
                .parse::<i64>()
                .map_err(|_| "invalid amount".to_string())?;
            print_json(
                &api.grant_credits(user_id, amount)
                    .await
                    .map_err(|err| err.to_string())?,
            )
        }
        "tick-passive" => {
            let instability = api.on_passive_tick().await.map_err(|err| err.to_string())?;
            print_json(&json!({ "instability": instability }))
        }
        "check-collapse" => print_json(
            &api.on_collapse_check_tick()
                .await
                .map_err(|err| err.to_string())?,
        ),
        "run" => run_tickers(api).await,
        other => Err(format!("unknown command: {other}")),
    }
}

async fn run_tickers(api: LottoApi) -> Result<(), String> {
    let tickers = spawn_tickers(api).await;
    let mut collapses = tickers.subscribe();
    info!("press Ctrl-C to stop");

    loop {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal.map_err(|err| format!("failed to listen for Ctrl-C: {err}"))?;
                break;
            }
            report = collapses.recv() => match report {
                Ok(report) => print_json(&report)?,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    info!(skipped, "collapse stream lagged");
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
        }
    }

    tickers.shutdown().await;
    Ok(())
}

/// Replays synthetic traffic through the scheduler: one message per minute,
/// a pull every third minute, a stabilization every twentieth.
fn simulate(args: &[String], mut config: EngineConfig) -> Result<(), String> {
    let seed = parse_u64(args.get(2), "seed")?;
    let minutes = parse_optional_u64(args.get(3), "minutes", 24 * 60)?;
    let users = parse_optional_u64(args.get(4), "users", 5)?.max(1);
    let until_ms = simulation_end_ms(minutes)?;
    config.seed = Some(seed);

    let mut engine =
        LottoEngine::open(config.clone(), InMemoryStore::new()).map_err(|err| err.to_string())?;
    for user_id in 0..users {
        engine
            .grant_credits(user_id, 1_000)
            .map_err(|err| err.to_string())?;
    }

    let mut scheduler = TickScheduler::from_config(&config);
    for minute in 0..minutes {
        // minute < minutes, so this stays below until_ms.
        let at = minute * 60_000 + 1;
        let user_id = minute % users;
        scheduler.schedule(at, TickKind::Message);
        if minute % 3 == 0 {
            scheduler.schedule(at, TickKind::Pull(user_id));
        }
        if minute % 20 == 0 {
            scheduler.schedule(at, TickKind::Stabilize(user_id));
        }
    }

    let mut pulls = 0_u64;
    let mut collapses = Vec::new();
    let mut peak_instability = 0.0_f64;
    while let Some(tick) = scheduler.pop_due(until_ms) {
        match engine.dispatch(tick.kind).map_err(|err| err.to_string())? {
            DispatchOutcome::Pull(outcome) if outcome.success => pulls += 1,
            DispatchOutcome::CollapseCheck(Some(report)) => collapses.push(report),
            _ => {}
        }
        peak_instability = peak_instability.max(engine.instability());
    }

    let status = engine.get_status().map_err(|err| err.to_string())?;
    print_json(&json!({
        "seed": seed.to_string(),
        "minutes": minutes,
        "successful_pulls": pulls,
        "peak_instability": peak_instability,
        "collapses": collapses,
        "final_status": status,
    }))
}

#[tokio::main]
async fn main() {
    init_tracing();

    let mut args: Vec<String> = env::args().collect();
    let config = match take_config_path(&mut args).and_then(|path| load_config(path.as_deref())) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("error: {err}");
            std::process::exit(2);
        }
    };

    let result = match args.get(1).map(String::as_str) {
        Some("rates") => rates(&args),
        Some("simulate") => simulate(&args, config),
        Some(command) => run_command(command, &args, config).await,
        None => {
            print_usage();
            return;
        }
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        print_usage();
        std::process::exit(2);
    }
}
