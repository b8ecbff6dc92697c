//! Deterministic market fixtures for integration testing.
//!
//! `MockMarket` serves canned candles per (symbol, timeframe); symbols
//! without fixtures fail like an unreachable exchange. `Recorder` keeps
//! every alert so tests can assert on what the user would have seen.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use rust_decimal_macros::dec;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use swingwatch::alerts::Notifier;
use swingwatch::config::AppConfig;
use swingwatch::engine::ledger::{Ledger, LedgerConfig};
use swingwatch::engine::scanner::ScanOrchestrator;
use swingwatch::engine::supervisor::PositionSupervisor;
use swingwatch::market::CandleSource;
use swingwatch::types::{Candle, Timeframe};

/// Fixed clock for every fixture.
pub fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 12, 15, 0, 0).unwrap()
}

// ---------------------------------------------------------------------------
// Series builders
// ---------------------------------------------------------------------------

/// Compounded closes: `legs` of (bars, per-bar return) starting at 100.
pub fn closes(legs: &[(usize, f64)]) -> Vec<f64> {
    let mut out = vec![100.0];
    for &(n, r) in legs {
        for _ in 0..n {
            let last = *out.last().unwrap();
            out.push(last * (1.0 + r));
        }
    }
    out
}

/// Bars ending so that the last one closes exactly at `end`.
pub fn bars_ending(closes: &[f64], tf: Timeframe, end: DateTime<Utc>) -> Vec<Candle> {
    let n = closes.len() as i32;
    closes
        .iter()
        .enumerate()
        .map(|(i, &close)| {
            let open = if i == 0 { close } else { closes[i - 1] };
            Candle {
                open_time: end - tf.duration() * (n - i as i32),
                open,
                high: open.max(close) * 1.001,
                low: open.min(close) * 0.999,
                close,
                volume: 1000.0 + (i % 7) as f64 * 50.0,
            }
        })
        .collect()
}

/// 4H uptrend: close well above the 200 EMA.
pub fn bull_regime() -> Vec<Candle> {
    bars_ending(&closes(&[(260, 0.002)]), Timeframe::H4, now())
}

/// 1H uptrend with a short pullback, then a bounce whose MACD cross is two
/// bars old: EMA20 > EMA50, histogram positive for exactly two bars.
pub fn fresh_long_trigger() -> Vec<Candle> {
    bars_ending(
        &closes(&[(250, 0.002), (3, -0.004), (4, 0.012)]),
        Timeframe::H1,
        now(),
    )
}

/// A closed 5m bar spanning `low..high` and a forming bar at `price`.
pub fn quote_bars(low: f64, high: f64, price: f64) -> Vec<Candle> {
    let closed_open = now() - Duration::minutes(10);
    vec![
        Candle {
            open_time: closed_open,
            open: (low + high) / 2.0,
            high,
            low,
            close: (low + high) / 2.0,
            volume: 10.0,
        },
        Candle {
            open_time: now() - Duration::minutes(2),
            open: price,
            high: price,
            low: price,
            close: price,
            volume: 1.0,
        },
    ]
}

// ---------------------------------------------------------------------------
// Mock candle source
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockMarket {
    bars: Mutex<HashMap<(String, Timeframe), Vec<Candle>>>,
}

impl MockMarket {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, symbol: &str, tf: Timeframe, bars: Vec<Candle>) {
        self.bars.lock().unwrap().insert((symbol.to_string(), tf), bars);
    }

    /// Long trend-aligned setup on both timeframes.
    pub fn with_long_setup(&self, symbol: &str) {
        self.set(symbol, Timeframe::H4, bull_regime());
        self.set(symbol, Timeframe::H1, fresh_long_trigger());
    }

    pub fn set_quote(&self, symbol: &str, low: f64, high: f64, price: f64) {
        self.set(symbol, Timeframe::M5, quote_bars(low, high, price));
    }

    pub fn remove(&self, symbol: &str) {
        self.bars.lock().unwrap().retain(|(s, _), _| s != symbol);
    }
}

#[async_trait]
impl CandleSource for MockMarket {
    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize) -> Result<Vec<Candle>> {
        let guard = self.bars.lock().unwrap();
        let bars = guard
            .get(&(symbol.to_string(), timeframe))
            .ok_or_else(|| anyhow!("mock: no {timeframe} bars for {symbol}"))?;
        let start = bars.len().saturating_sub(limit);
        Ok(bars[start..].to_vec())
    }

    fn name(&self) -> &str {
        "mock"
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct Recorder {
    messages: Mutex<Vec<String>>,
}

impl Recorder {
    pub fn messages(&self) -> Vec<String> {
        self.messages.lock().unwrap().clone()
    }

    pub fn count_containing(&self, needle: &str) -> usize {
        self.messages().iter().filter(|m| m.contains(needle)).count()
    }
}

#[async_trait]
impl Notifier for Recorder {
    async fn send(&self, text: &str) -> Result<()> {
        self.messages.lock().unwrap().push(text.to_string());
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

pub struct Harness {
    pub market: Arc<MockMarket>,
    pub notifier: Arc<Recorder>,
    pub ledger: Arc<Ledger>,
    pub scanner: ScanOrchestrator,
    pub supervisor: PositionSupervisor,
    pub cfg: Arc<AppConfig>,
    pub state_path: PathBuf,
}

impl Drop for Harness {
    fn drop(&mut self) {
        let _ = std::fs::remove_file(&self.state_path);
    }
}

pub fn temp_state_path() -> PathBuf {
    std::env::temp_dir().join(format!("swingwatch_it_{}.json", uuid::Uuid::new_v4()))
}

/// Config with a zero acceptance threshold so any classified setup is a
/// candidate, and no retry pause.
pub fn test_config(symbols: &[&str], state_path: &Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.universe.symbols = symbols.iter().map(|s| s.to_string()).collect();
    cfg.universe.priority = Vec::new();
    cfg.universe.reference = "BTC/USDT".to_string();
    cfg.scoring.acceptance_threshold = 0.0;
    cfg.market_data.retry_delay_ms = 1;
    cfg.persistence.state_file = state_path.to_string_lossy().into_owned();
    cfg.persistence.write_retries = 1;
    cfg.persistence.retry_backoff_ms = 1;
    cfg
}

pub fn harness(symbols: &[&str]) -> Harness {
    let state_path = temp_state_path();
    let cfg = Arc::new(test_config(symbols, &state_path));
    let market = Arc::new(MockMarket::new());
    market.with_long_setup("BTC/USDT");
    let notifier = Arc::new(Recorder::default());
    let ledger = Arc::new(Ledger::cold_start(dec!(10000), LedgerConfig::from_app(&cfg)));

    let scanner = ScanOrchestrator::new(market.clone(), ledger.clone(), notifier.clone(), cfg.clone());
    let supervisor = PositionSupervisor::new(market.clone(), ledger.clone(), notifier.clone(), cfg.clone());
    Harness {
        market,
        notifier,
        ledger,
        scanner,
        supervisor,
        cfg,
        state_path,
    }
}
