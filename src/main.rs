use anyhow::Context;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::BufReader;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use pairs_engine::commands::{self, Command};
use pairs_engine::gateway::ChannelGateway;
use pairs_engine::persistence;
use pairs_engine::strategy::PairwiseController;
use pairs_engine::AppConfig;

const STATUS_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// First CLI argument, then `PAIRS_CONFIG`, then `config.toml`.
fn config_path() -> PathBuf {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var("PAIRS_CONFIG").ok())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    // 1. Logger
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,pairs_engine=debug"));
    fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_level(true)
        .init();

    info!("🦀 Pairs Engine starting...");

    // 2. Config and prior state. Never trade on unknown positions.
    let path = config_path();
    let config = AppConfig::load(&path).with_context(|| format!("loading {}", path.display()))?;
    let init_path = config.daily_init_path();
    let record = persistence::load(&init_path, config.strategy.id)
        .with_context(|| format!("daily init {} is required at startup", init_path.display()))?;

    // 3. Controller behind the outbound channel
    let (gateway, outbound) = ChannelGateway::unbounded("broker");
    let controller = Arc::new(PairwiseController::new(&config, &record, Arc::new(gateway))?);
    let (tx, rx) = commands::channel();

    spawn_signal_handlers(tx.clone(), path.clone())?;

    // Market data, indicators and broker acks arrive on stdin as JSON lines.
    let stdin_tx = tx.clone();
    tokio::spawn(async move {
        if let Err(e) = commands::bridge_lines(BufReader::new(tokio::io::stdin()), stdin_tx).await {
            error!(error = %e, "stdin bridge failed");
        }
        info!("stdin closed");
    });

    // Outbound requests go to the broker adapter; here they are logged.
    tokio::spawn(async move {
        while let Ok(request) = outbound.recv_async().await {
            match serde_json::to_string(&request) {
                Ok(json) => info!(target: "outbound", "{}", json),
                Err(e) => warn!(error = %e, "outbound request not serializable"),
            }
        }
    });

    let status_controller = controller.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(STATUS_LOG_INTERVAL);
        loop {
            interval.tick().await;
            let s = status_controller.status();
            info!(
                state = %s.state,
                pos1 = s.positions[0],
                pos2 = s.positions[1],
                working = s.working_orders,
                origin = s.spread_origin,
                pnl = format!("{:.2}", s.net_pnl),
                forwarded = s.filter.forwarded,
                intermediate = s.filter.intermediate,
                anomalies = s.filter.anomalies,
                "📊 status"
            );
        }
    });
    drop(tx);

    info!(config = %path.display(), "⏳ controller Inactive, waiting for activation (SIGUSR1)");

    // 4. Single consumer loop until Shutdown
    match commands::run(controller, rx).await {
        Ok(()) => {
            info!("👋 shutdown complete");
            Ok(())
        }
        Err(e) => {
            error!(error = %e, "shutdown finished without a saved state");
            Err(e.into())
        }
    }
}

/// SIGUSR1 activate, SIGUSR2 deactivate, SIGHUP reload thresholds,
/// SIGTERM / Ctrl-C shutdown. Handlers only enqueue.
fn spawn_signal_handlers(tx: flume::Sender<Command>, config_path: PathBuf) -> anyhow::Result<()> {
    let mut usr1 = signal(SignalKind::user_defined1())?;
    let mut usr2 = signal(SignalKind::user_defined2())?;
    let mut hup = signal(SignalKind::hangup())?;
    let mut term = signal(SignalKind::terminate())?;

    tokio::spawn(async move {
        loop {
            let command = tokio::select! {
                Some(()) = usr1.recv() => Some(Command::Activate),
                Some(()) = usr2.recv() => Some(Command::Deactivate),
                Some(()) = hup.recv() => match AppConfig::load(&config_path) {
                    Ok(cfg) => Some(Command::ReloadThresholds(cfg.thresholds)),
                    Err(e) => {
                        warn!(error = %e, "SIGHUP: config reload failed, thresholds unchanged");
                        None
                    }
                },
                Some(()) = term.recv() => Some(Command::Shutdown),
                Ok(()) = tokio::signal::ctrl_c() => Some(Command::Shutdown),
            };
            let Some(command) = command else {
                continue;
            };
            info!(?command, "📡 signal received");
            if tx.send_async(command).await.is_err() {
                break;
            }
        }
    });
    Ok(())
}
