//! SWINGWATCH - 4H/1H swing signal scanner and position supervisor
//!
//! Entry point. Loads configuration, initialises structured logging,
//! restores the ledger from disk (or cold-starts), then runs the scan,
//! supervisor, command and dashboard tasks until Ctrl+C or a fatal
//! persistence error.

use anyhow::{Context, Result};
use chrono::Utc;
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, warn};

use swingwatch::alerts::telegram::TelegramClient;
use swingwatch::alerts::{self, LogNotifier, Notifier};
use swingwatch::config::AppConfig;
use swingwatch::dashboard::{self, DashboardState};
use swingwatch::engine::commands::{run_command_loop, CommandHandler};
use swingwatch::engine::ledger::{Ledger, LedgerConfig};
use swingwatch::engine::scanner::ScanOrchestrator;
use swingwatch::engine::supervisor::PositionSupervisor;
use swingwatch::market::binance::BinanceClient;
use swingwatch::market::CandleSource;

const BANNER: &str = r#"
 ____          _                __        __    _       _
/ ___|_      _(_)_ __   __ _    \ \      / /_ _| |_ ___| |__
\___ \ \ /\ / / | '_ \ / _` |____\ \ /\ / / _` | __/ __| '_ \
 ___) \ V  V /| | | | | (_| |_____\ V  V / (_| | || (__| | | |
|____/ \_/\_/ |_|_| |_|\__, |      \_/\_/ \__,_|\__\___|_| |_|
                       |___/
  4H regime / 1H trigger swing scanner
  v0.1.0
"#;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let cfg = Arc::new(AppConfig::load("config.toml")?);
    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        symbols = cfg.universe.symbols.len(),
        scan_interval_secs = cfg.agent.scan_interval_secs,
        supervisor_interval_secs = cfg.agent.supervisor_interval_secs,
        initial_capital = cfg.agent.initial_capital,
        "SWINGWATCH starting up"
    );

    // -- Messaging --------------------------------------------------------

    let telegram = match cfg.telegram_token() {
        Some(token) => Some(Arc::new(TelegramClient::new(
            token,
            cfg.telegram_chat_id(),
            cfg.alerts.poll_timeout_secs,
        )?)),
        None => {
            warn!("No Telegram token configured, alerts go to the log only");
            None
        }
    };
    let notifier: Arc<dyn Notifier> = match &telegram {
        Some(t) => t.clone(),
        None => Arc::new(LogNotifier),
    };

    // -- Restore ledger (before any task is spawned) ------------------------

    let initial_capital = Decimal::from_f64(cfg.agent.initial_capital)
        .context("agent.initial_capital is not representable")?
        .round_dp(2);
    let ledger = match Ledger::restore(initial_capital, LedgerConfig::from_app(&cfg)) {
        Ok(ledger) => Arc::new(ledger),
        Err(e) => {
            error!(error = %e, "Cannot restore state, refusing to start");
            let _ = notifier
                .send(&format!("🛑 SWINGWATCH halted: {e}\nInspect {} before restarting.", cfg.persistence.state_file))
                .await;
            return Err(e.into());
        }
    };

    let snapshot = ledger.snapshot().await;
    info!(
        equity = %snapshot.portfolio.equity,
        positions = snapshot.portfolio.positions.len(),
        scan_cycles = snapshot.counters.scan_cycles,
        mode = ?snapshot.mode,
        "Ledger ready"
    );
    // A configured chat claims the bot before anyone can message it
    let chat_id = match (snapshot.chat_id, cfg.telegram_chat_id()) {
        (Some(id), _) => Some(id),
        (None, Some(id)) => Some(ledger.seed_chat(id).await?),
        (None, None) => None,
    };
    if let (Some(t), Some(chat_id)) = (&telegram, chat_id) {
        t.set_chat_id(chat_id);
    }
    ledger.flush().await?;

    // -- Components ---------------------------------------------------------

    let source: Arc<dyn CandleSource> = Arc::new(BinanceClient::new(
        &cfg.market_data.base_url,
        cfg.market_data.timeout_secs,
    )?);
    info!(source = source.name(), "Market data source ready");

    let scanner = Arc::new(ScanOrchestrator::new(
        source.clone(),
        ledger.clone(),
        notifier.clone(),
        cfg.clone(),
    ));
    let supervisor = Arc::new(PositionSupervisor::new(
        source,
        ledger.clone(),
        notifier.clone(),
        cfg.clone(),
    ));

    // -- Tasks ----------------------------------------------------------------

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut tasks: JoinSet<Result<()>> = JoinSet::new();

    tasks.spawn(scan_loop(
        scanner.clone(),
        notifier.clone(),
        Duration::from_secs(cfg.agent.scan_interval_secs),
        shutdown_rx.clone(),
    ));
    tasks.spawn(supervisor_loop(
        supervisor,
        notifier.clone(),
        Duration::from_secs(cfg.agent.supervisor_interval_secs),
        shutdown_rx.clone(),
    ));

    if let Some(t) = &telegram {
        let handler = Arc::new(CommandHandler::new(ledger.clone(), scanner, cfg.clone()));
        let (t, rx, timeout) = (t.clone(), shutdown_rx.clone(), cfg.alerts.poll_timeout_secs);
        tasks.spawn(async move { Ok(run_command_loop(t, handler, timeout, rx).await?) });
    }

    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(ledger.clone(), cfg.risk.max_positions));
        tasks.spawn(dashboard::serve(state, cfg.dashboard.port, shutdown_rx.clone()));
    }

    let _ = notifier
        .send(&format!("✅ {} online. Mode: {}. Send /help for commands.", cfg.agent.name, snapshot.mode))
        .await;
    info!("Tasks running. Press Ctrl+C to stop.");

    let outcome = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received.");
            Ok(())
        }
        Some(joined) = tasks.join_next() => match joined {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(e),
            Err(e) => Err(anyhow::anyhow!("task panicked: {e}")),
        },
    };

    if let Err(e) = &outcome {
        error!(error = %e, "Fatal error, shutting down");
        let _ = notifier.send(&format!("🛑 SWINGWATCH halted: {e}")).await;
    }

    let _ = shutdown_tx.send(true);
    while tasks.join_next().await.is_some() {}

    if outcome.is_ok() {
        ledger.flush().await?;
    }
    let snapshot = ledger.snapshot().await;
    info!(
        equity = %snapshot.portfolio.equity,
        positions = snapshot.portfolio.positions.len(),
        closed = snapshot.portfolio.closed_trades.len(),
        pnl = %snapshot.portfolio.total_realized_pnl(),
        "SWINGWATCH shut down."
    );
    outcome
}

/// Hourly scan; the first tick fires immediately.
async fn scan_loop(
    scanner: Arc<ScanOrchestrator>,
    notifier: Arc<dyn Notifier>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => return Ok(()),
        }
        match scanner.run_cycle(Utc::now()).await {
            Ok(report) => {
                if let Err(e) = notifier.send(&alerts::format_scan_summary(&report)).await {
                    warn!(error = %e, "Scan summary alert failed");
                }
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => error!(error = %e, "Scan cycle failed, continuing to next"),
        }
    }
}

/// Position supervision every few minutes.
async fn supervisor_loop(
    supervisor: Arc<PositionSupervisor>,
    notifier: Arc<dyn Notifier>,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = interval.tick() => {}
            _ = shutdown.changed() => return Ok(()),
        }
        match supervisor.run_cycle(Utc::now()).await {
            Ok(report) => {
                if let Some(msg) = alerts::format_supervisor_failures(&report) {
                    let _ = notifier.send(&msg).await;
                }
            }
            Err(e) if e.is_fatal() => return Err(e.into()),
            Err(e) => error!(error = %e, "Supervisor cycle failed, continuing to next"),
        }
    }
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("swingwatch=info"));

    let json_logging = std::env::var("SWINGWATCH_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
