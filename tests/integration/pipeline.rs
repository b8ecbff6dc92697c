//! Scan and supervisor cycles driven end to end.

use anyhow::Result;
use async_trait::async_trait;
use rust_decimal_macros::dec;
use std::sync::Arc;

use swingwatch::alerts::Notifier;
use swingwatch::engine::ledger::{Ledger, LedgerConfig};
use swingwatch::engine::scanner::ScanOrchestrator;
use swingwatch::types::{BotMode, Direction, EntryPath, PositionState, RejectReason, Timeframe};

use crate::mock_market::{harness, now, temp_state_path, test_config, MockMarket};

/// Goes AFK the moment the first signal alert is delivered, i.e. between
/// two admissions of the same scan.
struct AfkOnFirstSignal {
    ledger: Arc<Ledger>,
}

#[async_trait]
impl Notifier for AfkOnFirstSignal {
    async fn send(&self, text: &str) -> Result<()> {
        if text.contains("Signal") {
            self.ledger.set_mode(BotMode::Paused).await?;
        }
        Ok(())
    }
}

#[tokio::test]
async fn scan_opens_trend_aligned_long_and_alerts() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");

    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.candidates.len(), 1);
    assert_eq!(report.opened.len(), 1);

    let c = &report.candidates[0];
    assert_eq!(c.direction, Direction::Long);
    assert_eq!(c.path, EntryPath::TrendAligned);
    assert!((0.0..=100.0).contains(&c.score));

    let p = &report.opened[0];
    assert!(p.stop_loss < p.entry_price);
    let r = p.entry_price - p.stop_loss;
    assert!((p.take_profit1 - (p.entry_price + 1.5 * r)).abs() < 1e-9);
    assert_eq!(p.state, PositionState::Open);

    assert_eq!(h.notifier.count_containing("ACTION REQUIRED: LONG Signal"), 1);
    assert!(h.state_path.exists());
}

#[tokio::test]
async fn repeated_scans_alert_once() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");

    h.scanner.run_cycle(now()).await.unwrap();
    let second = h.scanner.run_cycle(now()).await.unwrap();
    let third = h.scanner.run_cycle(now()).await.unwrap();

    assert!(second.opened.is_empty() && third.opened.is_empty());
    assert_eq!(second.reject_counts().get(&RejectReason::Duplicate), Some(&1));
    assert_eq!(h.notifier.count_containing("Signal"), 1);

    let snap = h.ledger.snapshot().await;
    assert_eq!(snap.counters.signals_alerted, 1);
    assert_eq!(snap.counters.scan_cycles, 3);
    assert_eq!(snap.portfolio.positions.len(), 1);
}

#[tokio::test]
async fn unavailable_symbol_is_skipped_not_fatal() {
    let h = harness(&["ETH/USDT", "SOL/USDT"]);
    h.market.with_long_setup("ETH/USDT");

    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.evaluated, 1);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].0, "SOL/USDT");
    assert_eq!(report.opened.len(), 1);
}

#[tokio::test]
async fn short_history_is_skipped() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");
    let bars = crate::mock_market::fresh_long_trigger();
    h.market.set("ETH/USDT", Timeframe::H1, bars[bars.len() - 150..].to_vec());

    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.evaluated, 0);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.opened.is_empty());
}

#[tokio::test]
async fn capacity_caps_at_ten_positions() {
    let symbols = [
        "ETH/USDT", "SOL/USDT", "BNB/USDT", "XRP/USDT", "ADA/USDT", "DOGE/USDT",
        "AVAX/USDT", "LINK/USDT", "DOT/USDT", "LTC/USDT", "ATOM/USDT", "NEAR/USDT",
    ];
    let h = harness(&symbols);
    for s in symbols {
        h.market.with_long_setup(s);
    }

    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.candidates.len(), 12);
    assert_eq!(report.opened.len(), 10);
    assert_eq!(report.reject_counts().get(&RejectReason::AtCapacity), Some(&2));

    // Equal strength: universe order decides who gets in
    let opened: Vec<&str> = report.opened.iter().map(|p| p.symbol.as_str()).collect();
    assert_eq!(opened, symbols[..10].to_vec());

    let snap = h.ledger.snapshot().await;
    assert_eq!(snap.portfolio.positions.len(), 10);
    assert!(snap.portfolio.check_invariants(10).is_ok());
}

#[tokio::test]
async fn paused_scan_opens_nothing_and_reports_safety_levels() {
    let h = harness(&["ETH/USDT", "SOL/USDT"]);
    h.market.with_long_setup("ETH/USDT");
    h.scanner.run_cycle(now()).await.unwrap();

    h.ledger.set_mode(BotMode::Paused).await.unwrap();
    h.market.with_long_setup("SOL/USDT");

    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.mode, BotMode::Paused);
    assert!(report.opened.is_empty());
    assert_eq!(report.candidates.len(), 2);
    assert_eq!(report.reject_counts().get(&RejectReason::Paused), Some(&2));

    assert_eq!(report.safety_levels.len(), 1);
    let levels = &report.safety_levels[0];
    assert_eq!(levels.symbol, "ETH/USDT");
    assert!((levels.stop - levels.price * 0.96).abs() < 1e-9);
    assert!((levels.target - levels.price * 1.10).abs() < 1e-9);

    let snap = h.ledger.snapshot().await;
    assert_eq!(snap.portfolio.positions.len(), 1);
    assert_eq!(snap.counters.signals_alerted, 1);

    // Back to READY: SOL is admitted on the next scan
    h.ledger.set_mode(BotMode::Active).await.unwrap();
    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.opened[0].symbol, "SOL/USDT");
}

#[tokio::test]
async fn supervisor_arms_breakeven_then_stops_out() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");
    let opened = h.scanner.run_cycle(now()).await.unwrap().opened;
    let p = opened[0].clone();

    // Quiet tick: nothing touched
    h.market.set_quote("ETH/USDT", p.entry_price * 0.999, p.entry_price * 1.001, p.entry_price);
    let quiet = h.supervisor.run_cycle(now()).await.unwrap();
    assert_eq!(quiet.checked, 1);
    assert!(quiet.actions.is_empty());

    // Wick through TP1
    h.market.set_quote("ETH/USDT", p.entry_price, p.take_profit1 + 0.01, p.entry_price * 1.001);
    let report = h.supervisor.run_cycle(now()).await.unwrap();
    assert_eq!(report.actions.len(), 1);

    let armed = h.ledger.positions().await;
    assert_eq!(armed[0].state, PositionState::BreakevenArmed);
    assert_eq!(armed[0].stop_loss, p.entry_price);
    assert!(armed[0].size < p.size);
    assert_eq!(h.notifier.count_containing("TP1 Hit"), 1);

    // Back to entry: closed at the break-even stop
    h.market.set_quote("ETH/USDT", p.entry_price * 0.995, p.entry_price * 1.001, p.entry_price * 0.997);
    h.supervisor.run_cycle(now()).await.unwrap();

    let snap = h.ledger.snapshot().await;
    assert!(snap.portfolio.positions.is_empty());
    assert_eq!(snap.counters.positions_closed, 1);
    assert_eq!(snap.counters.wins, 1);
    assert_eq!(snap.counters.supervisor_cycles, 3);
    assert_eq!(h.notifier.count_containing("Break-even Stop"), 1);
}

#[tokio::test]
async fn supervisor_skips_symbol_without_price() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");
    h.scanner.run_cycle(now()).await.unwrap();

    // No 5m data at all for ETH
    let report = h.supervisor.run_cycle(now()).await.unwrap();
    assert_eq!(report.checked, 0);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(h.ledger.positions().await.len(), 1);
}

#[tokio::test]
async fn stop_loss_closes_and_frees_symbol() {
    let h = harness(&["ETH/USDT"]);
    h.market.with_long_setup("ETH/USDT");
    let p = h.scanner.run_cycle(now()).await.unwrap().opened[0].clone();

    h.market.set_quote("ETH/USDT", p.stop_loss - 0.5, p.entry_price, p.stop_loss + 0.1);
    h.supervisor.run_cycle(now()).await.unwrap();

    let snap = h.ledger.snapshot().await;
    assert!(snap.portfolio.positions.is_empty());
    assert_eq!(snap.counters.losses, 1);
    assert!(snap.portfolio.equity < rust_decimal_macros::dec!(10000));
    assert_eq!(h.notifier.count_containing("SL Breach"), 1);

    // Closing resets the symbol's dedup record: the same trigger re-alerts
    let report = h.scanner.run_cycle(now()).await.unwrap();
    assert_eq!(report.opened.len(), 1);
}

#[tokio::test]
async fn pause_mid_cycle_stops_remaining_admissions() {
    let symbols = ["ETH/USDT", "SOL/USDT", "BNB/USDT"];
    let state_path = temp_state_path();
    let cfg = Arc::new(test_config(&symbols, &state_path));
    let market = Arc::new(MockMarket::new());
    market.with_long_setup("BTC/USDT");
    for s in symbols {
        market.with_long_setup(s);
    }
    let ledger = Arc::new(Ledger::cold_start(dec!(10000), LedgerConfig::from_app(&cfg)));
    let notifier = Arc::new(AfkOnFirstSignal { ledger: ledger.clone() });
    let scanner = ScanOrchestrator::new(market, ledger.clone(), notifier, cfg);

    let report = scanner.run_cycle(now()).await.unwrap();

    // The cycle started READY; the ledger refused everything after /afk
    assert_eq!(report.mode, BotMode::Active);
    assert_eq!(report.opened.len(), 1);
    assert_eq!(report.opened[0].symbol, "ETH/USDT");
    assert_eq!(report.reject_counts().get(&RejectReason::Paused), Some(&2));

    let snap = ledger.snapshot().await;
    assert_eq!(snap.mode, BotMode::Paused);
    assert_eq!(snap.portfolio.positions.len(), 1);
    assert_eq!(snap.counters.signals_alerted, 1);
    let _ = std::fs::remove_file(&state_path);
}
