//! Scan orchestrator.
//!
//! One cycle: expire stale dedup records, fetch 4H + 1H bars for the
//! universe (plus the reference asset), score every symbol, rank the
//! candidates, and admit them through the ledger in rank order. Per-symbol
//! fetch or history failures become skips in the report. When paused, the
//! candidates are reported but nothing is admitted; instead the AFK safety
//! levels are recomputed for every open position.
//!
//! Periodic and command-triggered scans share `run_cycle` and are
//! serialized by the cycle lock.

use chrono::{DateTime, Utc};
use futures::stream::{self, StreamExt};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::alerts::{self, Notifier};
use crate::config::AppConfig;
use crate::engine::ledger::Ledger;
use crate::market::{fetch_with_retry, CandleSource, FetchPolicy};
use crate::strategy::indicators::compute_snapshot;
use crate::strategy::ranker;
use crate::strategy::risk::{safety_levels, SafetyLevels};
use crate::strategy::evaluate_symbol;
use crate::types::{
    split_closed, BotMode, Candidate, Candle, Position, RejectReason, SwingError, Timeframe,
};

// ---------------------------------------------------------------------------
// Report
// ---------------------------------------------------------------------------

/// Outcome of one scan cycle.
#[derive(Debug, Clone)]
pub struct ScanReport {
    pub started_at: DateTime<Utc>,
    pub mode: BotMode,
    /// Universe symbols that produced indicator snapshots.
    pub evaluated: usize,
    /// (symbol, reason) for fetch or history failures.
    pub skipped: Vec<(String, String)>,
    /// Candidates at or above the threshold, in rank order.
    pub candidates: Vec<Candidate>,
    pub opened: Vec<Position>,
    pub rejected: Vec<(Candidate, RejectReason)>,
    /// Only filled while paused.
    pub safety_levels: Vec<SafetyLevels>,
    pub dedup_expired: usize,
    pub dedup_pruned: usize,
}

impl ScanReport {
    pub fn reject_counts(&self) -> BTreeMap<RejectReason, usize> {
        let mut counts = BTreeMap::new();
        for (_, reason) in &self.rejected {
            *counts.entry(*reason).or_insert(0) += 1;
        }
        counts
    }
}

/// Closed bars for both timeframes plus the latest traded price.
struct SymbolBars {
    h4: Vec<Candle>,
    h1: Vec<Candle>,
    live_price: f64,
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

pub struct ScanOrchestrator {
    source: Arc<dyn CandleSource>,
    ledger: Arc<Ledger>,
    notifier: Arc<dyn Notifier>,
    cfg: Arc<AppConfig>,
    policy: FetchPolicy,
    cycle: Mutex<()>,
}

impl ScanOrchestrator {
    pub fn new(
        source: Arc<dyn CandleSource>,
        ledger: Arc<Ledger>,
        notifier: Arc<dyn Notifier>,
        cfg: Arc<AppConfig>,
    ) -> Self {
        let policy = FetchPolicy::from_config(&cfg.market_data);
        Self {
            source,
            ledger,
            notifier,
            cfg,
            policy,
            cycle: Mutex::new(()),
        }
    }

    async fn fetch_bars(&self, symbol: &str, now: DateTime<Utc>) -> Result<SymbolBars, SwingError> {
        let limit = self.cfg.market_data.history_bars + 1;
        let src = self.source.as_ref();
        let (h4, h1) = tokio::join!(
            fetch_with_retry(src, symbol, Timeframe::H4, limit, self.policy),
            fetch_with_retry(src, symbol, Timeframe::H1, limit, self.policy),
        );
        let (h4, h1) = (h4?, h1?);

        let live_price = h1.last().map(|b| b.close).unwrap_or(f64::NAN);
        let (h4_closed, _) = split_closed(&h4, Timeframe::H4, now);
        let (h1_closed, _) = split_closed(&h1, Timeframe::H1, now);
        Ok(SymbolBars {
            h4: h4_closed.to_vec(),
            h1: h1_closed.to_vec(),
            live_price,
        })
    }

    /// Latest price from the 5m feed (forming bar close when present).
    async fn live_price(&self, symbol: &str) -> Result<f64, SwingError> {
        let bars = fetch_with_retry(self.source.as_ref(), symbol, Timeframe::M5, 2, self.policy).await?;
        bars.last()
            .map(|b| b.close)
            .filter(|p| p.is_finite() && *p > 0.0)
            .ok_or_else(|| SwingError::DataUnavailable {
                symbol: symbol.to_string(),
                reason: "no 5m price".to_string(),
            })
    }

    /// AFK safety levels for every open position. Symbols whose price
    /// cannot be fetched are left out.
    pub async fn safety_levels(&self, known_prices: &HashMap<String, f64>) -> Vec<SafetyLevels> {
        let mut levels = Vec::new();
        for p in self.ledger.positions().await {
            let price = match known_prices.get(&p.symbol) {
                Some(&price) if price.is_finite() && price > 0.0 => price,
                _ => match self.live_price(&p.symbol).await {
                    Ok(price) => price,
                    Err(e) => {
                        warn!(symbol = %p.symbol, error = %e, "No price for safety levels");
                        continue;
                    }
                },
            };
            levels.push(safety_levels(&p.symbol, p.direction, price, &self.cfg.risk));
        }
        levels
    }

    /// Run one scan cycle. Only persistence failures are returned as errors.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<ScanReport, SwingError> {
        let _cycle = self.cycle.lock().await;

        let dedup_expired = self.ledger.expire_dedup(now).await?;
        let mode = self.ledger.mode().await;

        let symbols = self.cfg.fetch_symbols();
        info!(symbols = symbols.len(), mode = ?mode, "Scan cycle starting");

        let fetched: Vec<(String, Result<SymbolBars, SwingError>)> = stream::iter(symbols)
            .map(|symbol| async move {
                let bars = self.fetch_bars(&symbol, now).await;
                (symbol, bars)
            })
            .buffered(self.cfg.market_data.concurrency.max(1))
            .collect()
            .await;

        let reference = &self.cfg.universe.reference;
        let reference_change = fetched
            .iter()
            .find(|(s, _)| s == reference)
            .and_then(|(_, r)| r.as_ref().ok())
            .and_then(|bars| compute_snapshot(&bars.h1, &self.cfg.indicators))
            .map(|snap| snap.change)
            .unwrap_or_else(|| {
                warn!(reference = %reference, "Reference asset unavailable, relative strength vs 0");
                0.0
            });

        let universe: HashSet<&String> = self.cfg.universe.symbols.iter().collect();
        let mut skipped = Vec::new();
        let mut evaluated = HashSet::new();
        let mut active = HashSet::new();
        let mut scored = Vec::new();
        let mut prices = HashMap::new();

        for (symbol, result) in &fetched {
            if !universe.contains(symbol) {
                continue;
            }
            let bars = match result {
                Ok(bars) => bars,
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "Symbol skipped");
                    skipped.push((symbol.clone(), e.to_string()));
                    continue;
                }
            };
            prices.insert(symbol.clone(), bars.live_price);

            match evaluate_symbol(
                symbol,
                &bars.h4,
                &bars.h1,
                reference_change,
                &self.cfg.indicators,
                &self.cfg.scoring,
                now,
            ) {
                Ok(candidate) => {
                    evaluated.insert(symbol.clone());
                    if let Some(c) = candidate {
                        active.insert(c.trigger.key());
                        scored.push(c);
                    }
                }
                Err(e) => {
                    debug!(symbol = %symbol, error = %e, "Symbol skipped");
                    skipped.push((symbol.clone(), e.to_string()));
                }
            }
        }

        let ranked = ranker::rank(
            scored,
            self.cfg.scoring.acceptance_threshold,
            &self.cfg.universe.priority,
            &self.cfg.universe.symbols,
        );

        let mut opened = Vec::new();
        let mut rejected = ranked.below_threshold;
        let mut safety = Vec::new();

        match mode {
            BotMode::Active => {
                for c in &ranked.ordered {
                    match self.ledger.admit(c, now).await {
                        Ok(position) => {
                            if let Err(e) = self.notifier.send(&alerts::format_signal(c, &position)).await {
                                warn!(symbol = %c.symbol, error = %e, "Signal alert failed");
                            }
                            opened.push(position);
                        }
                        Err(e) if e.is_fatal() => return Err(e),
                        Err(e) => {
                            let reason = e.reject_reason().unwrap_or(RejectReason::InvariantBreach);
                            if reason == RejectReason::InvariantBreach {
                                warn!(symbol = %c.symbol, error = %e, "Admission aborted by ledger");
                            } else {
                                debug!(symbol = %c.symbol, reason = %reason, "Candidate rejected");
                            }
                            rejected.push((c.clone(), reason));
                        }
                    }
                }
            }
            BotMode::Paused => {
                rejected.extend(ranked.ordered.iter().map(|c| (c.clone(), RejectReason::Paused)));
                safety = self.safety_levels(&prices).await;
            }
        }

        let dedup_pruned = self.ledger.prune_dedup(&evaluated, &active).await?;
        let cycle = self.ledger.record_scan_cycle().await?;

        let report = ScanReport {
            started_at: now,
            mode,
            evaluated: evaluated.len(),
            skipped,
            candidates: ranked.ordered,
            opened,
            rejected,
            safety_levels: safety,
            dedup_expired,
            dedup_pruned,
        };

        info!(
            cycle,
            evaluated = report.evaluated,
            skipped = report.skipped.len(),
            candidates = report.candidates.len(),
            opened = report.opened.len(),
            rejected = report.rejected.len(),
            dedup_pruned,
            dedup_expired,
            "Scan cycle complete"
        );
        Ok(report)
    }
}
