//! Market data.
//!
//! Defines the `CandleSource` trait and the timeout + single-retry wrapper
//! used by the scan and supervisor loops. A symbol whose fetch still fails
//! after the retry is reported as `DataUnavailable` and skipped for the
//! cycle; it never aborts the cycle.

pub mod binance;

use anyhow::Result;
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

use crate::config::MarketDataConfig;
use crate::types::{Candle, SwingError, Timeframe};

/// Abstraction over an OHLCV provider.
#[async_trait]
pub trait CandleSource: Send + Sync {
    /// Most recent `limit` bars, ascending by open time. The last bar may
    /// still be forming.
    async fn fetch_candles(&self, symbol: &str, timeframe: Timeframe, limit: usize)
        -> Result<Vec<Candle>>;

    /// Provider name for logging.
    fn name(&self) -> &str;
}

/// Per-call timeout and the pause before the one retry.
#[derive(Debug, Clone, Copy)]
pub struct FetchPolicy {
    pub timeout: Duration,
    pub retry_delay: Duration,
}

impl FetchPolicy {
    pub fn from_config(cfg: &MarketDataConfig) -> Self {
        Self {
            timeout: Duration::from_secs(cfg.timeout_secs),
            retry_delay: Duration::from_millis(cfg.retry_delay_ms),
        }
    }
}

async fn fetch_once(
    source: &dyn CandleSource,
    symbol: &str,
    timeframe: Timeframe,
    limit: usize,
    policy: FetchPolicy,
) -> Result<Vec<Candle>, String> {
    let bars = tokio::time::timeout(policy.timeout, source.fetch_candles(symbol, timeframe, limit))
        .await
        .map_err(|_| format!("timed out after {:?}", policy.timeout))?
        .map_err(|e| format!("{e:#}"))?;

    if bars.is_empty() {
        return Err("empty response".to_string());
    }
    if bars.windows(2).any(|w| w[1].open_time <= w[0].open_time) {
        return Err("bars not strictly ascending".to_string());
    }
    Ok(bars)
}

/// Fetch with a timeout and one retry.
pub async fn fetch_with_retry(
    source: &dyn CandleSource,
    symbol: &str,
    timeframe: Timeframe,
    limit: usize,
    policy: FetchPolicy,
) -> Result<Vec<Candle>, SwingError> {
    match fetch_once(source, symbol, timeframe, limit, policy).await {
        Ok(bars) => Ok(bars),
        Err(first) => {
            warn!(
                symbol,
                timeframe = %timeframe,
                source = source.name(),
                error = %first,
                "Candle fetch failed, retrying once"
            );
            tokio::time::sleep(policy.retry_delay).await;
            let bars = fetch_once(source, symbol, timeframe, limit, policy)
                .await
                .map_err(|reason| SwingError::DataUnavailable {
                    symbol: symbol.to_string(),
                    reason: format!("{timeframe}: {reason}"),
                })?;
            debug!(symbol, timeframe = %timeframe, "Candle fetch succeeded on retry");
            Ok(bars)
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
