//! Binance spot klines client.
//!
//! Public endpoint, no key needed:
//! `GET /api/v3/klines?symbol=ETHUSDT&interval=1h&limit=300`
//! Each row is `[openTime, "open", "high", "low", "close", "volume", closeTime, ...]`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use reqwest::Client;
use serde_json::Value;
use tracing::debug;

use super::CandleSource;
use crate::types::{Candle, Timeframe};

/// Binance caps `limit` at 1000.
const MAX_LIMIT: usize = 1000;

pub struct BinanceClient {
    http: Client,
    base_url: String,
}

impl BinanceClient {
    pub fn new(base_url: &str, timeout_secs: u64) -> Result<Self> {
        let http = Client::builder()
            .timeout(std::time::Duration::from_secs(timeout_secs))
            .user_agent("SWINGWATCH/0.1.0 (swing-signal-scanner)")
            .build()
            .context("Failed to build HTTP client for Binance")?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    /// "BTC/USDT" → "BTCUSDT".
    pub fn market_id(symbol: &str) -> String {
        symbol.replace('/', "").to_uppercase()
    }

    /// Parse a klines payload into candles.
    pub fn parse_klines(payload: &Value) -> Result<Vec<Candle>> {
        let rows = payload
            .as_array()
            .context("klines payload is not an array")?;

        rows.iter()
            .enumerate()
            .map(|(i, row)| {
                let cols = row
                    .as_array()
                    .with_context(|| format!("kline row {i} is not an array"))?;
                let num = |idx: usize| -> Result<f64> {
                    let v = cols
                        .get(idx)
                        .with_context(|| format!("kline row {i} missing column {idx}"))?;
                    match v {
                        Value::String(s) => s
                            .parse::<f64>()
                            .with_context(|| format!("kline row {i} column {idx}: {s}")),
                        Value::Number(n) => n
                            .as_f64()
                            .with_context(|| format!("kline row {i} column {idx} not f64")),
                        _ => anyhow::bail!("kline row {i} column {idx} has unexpected type"),
                    }
                };
                let open_ms = cols
                    .first()
                    .and_then(Value::as_i64)
                    .with_context(|| format!("kline row {i} has no open time"))?;
                let open_time = Utc
                    .timestamp_millis_opt(open_ms)
                    .single()
                    .with_context(|| format!("kline row {i} open time {open_ms} out of range"))?;

                Ok(Candle {
                    open_time,
                    open: num(1)?,
                    high: num(2)?,
                    low: num(3)?,
                    close: num(4)?,
                    volume: num(5)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl CandleSource for BinanceClient {
    async fn fetch_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>> {
        let url = format!(
            "{}/api/v3/klines?symbol={}&interval={}&limit={}",
            self.base_url,
            urlencoding::encode(&Self::market_id(symbol)),
            timeframe.as_str(),
            limit.clamp(1, MAX_LIMIT),
        );

        debug!(url = %url, "Fetching Binance klines");

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .context("Binance API request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Binance API error {status}: {body}");
        }

        let payload: Value = resp
            .json()
            .await
            .context("Failed to parse Binance klines response")?;

        Self::parse_klines(&payload)
    }

    fn name(&self) -> &str {
        "binance"
    }
}
