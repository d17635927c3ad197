//! Candle and spot price adapter
//!
//! Polygon tokens are priced off their centralized-exchange proxy pairs
//! (`ETHUSDT` for WETH and so on). Wrapped assets are remapped to the
//! underlying ticker before the request.

use super::errors::MarketDataError;
use super::retry::{with_retry, RetryConfig};
use crate::config::MarketDataConfig;
use crate::types::{Candle, CandleSeries, Timeframe};
use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

const KLINES_PATH: &str = "/api/v3/klines";
const TICKER_PATH: &str = "/api/v3/ticker/price";

/// Symbols that are priced at 1.0 without a request
const STABLECOINS: &[&str] = &["USDC", "USDC.E", "USDT", "DAI"];

pub fn is_stablecoin(symbol: &str) -> bool {
    let upper = symbol.to_uppercase();
    STABLECOINS.contains(&upper.as_str())
}

/// Map a wrapped/native Polygon symbol to its exchange ticker
pub fn remap_symbol(symbol: &str) -> String {
    let upper = symbol.to_uppercase();
    match upper.as_str() {
        "WETH" => "ETH".to_string(),
        "WBTC" => "BTC".to_string(),
        "WMATIC" | "WPOL" | "MATIC" => "POL".to_string(),
        "USDC.E" => "USDC".to_string(),
        _ => upper,
    }
}

#[derive(Debug, Deserialize)]
struct TickerPrice {
    price: String,
}

pub struct MarketData {
    client: reqwest::Client,
    config: MarketDataConfig,
    retry: RetryConfig,
}

impl MarketData {
    pub fn new(config: MarketDataConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            config,
            retry: RetryConfig::default(),
        })
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Exchange pair for a Polygon symbol, e.g. `WETH` -> `ETHUSDT`
    pub fn exchange_pair(&self, symbol: &str) -> String {
        format!("{}{}", remap_symbol(symbol), self.config.quote_suffix)
    }

    /// Load candles for a timeframe given as text (`15m`, `1h`, `4h`, `1d`)
    pub async fn load_ohlcv(
        &self,
        symbol: &str,
        timeframe: &str,
        limit: u32,
    ) -> Result<CandleSeries, MarketDataError> {
        let timeframe: Timeframe = timeframe.parse()?;
        self.load_candles(symbol, timeframe, limit).await
    }

    pub async fn load_candles(
        &self,
        symbol: &str,
        timeframe: Timeframe,
        limit: u32,
    ) -> Result<CandleSeries, MarketDataError> {
        let pair = self.exchange_pair(symbol);
        let url = format!("{}{}", self.config.candle_api_url.trim_end_matches('/'), KLINES_PATH);
        let limit = limit.to_string();
        let (client, url_ref, pair_ref, limit_ref) = (&self.client, url.as_str(), pair.as_str(), limit.as_str());

        let rows: Vec<Vec<serde_json::Value>> = with_retry(&self.retry, "klines", move || async move {
            let response = client
                .get(url_ref)
                .query(&[
                    ("symbol", pair_ref),
                    ("interval", timeframe.as_str()),
                    ("limit", limit_ref),
                ])
                .send()
                .await
                .map_err(|e| MarketDataError::from_network_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MarketDataError::from_response(status.as_u16(), &body));
            }

            response
                .json::<Vec<Vec<serde_json::Value>>>()
                .await
                .map_err(|e| MarketDataError::Malformed(e.to_string()))
        })
        .await?;

        if rows.is_empty() {
            return Err(MarketDataError::EmptyResponse {
                symbol: pair,
                timeframe: timeframe.to_string(),
            });
        }

        let candles = rows
            .iter()
            .map(|row| parse_kline(row))
            .collect::<Result<Vec<_>, _>>()?;

        debug!("[MarketData] {} {} candles for {}", candles.len(), timeframe, pair);
        Ok(CandleSeries::new(symbol.to_uppercase(), timeframe, candles))
    }

    /// Spot price in USD; stablecoins are 1.0
    pub async fn try_get_price(&self, symbol: &str) -> Result<f64, MarketDataError> {
        if is_stablecoin(symbol) {
            return Ok(1.0);
        }

        let pair = self.exchange_pair(symbol);
        let url = format!("{}{}", self.config.ticker_api_url.trim_end_matches('/'), TICKER_PATH);

        let (client, url_ref, pair_ref) = (&self.client, url.as_str(), pair.as_str());

        let ticker: TickerPrice = with_retry(&self.retry, "ticker", move || async move {
            let response = client
                .get(url_ref)
                .query(&[("symbol", pair_ref)])
                .send()
                .await
                .map_err(|e| MarketDataError::from_network_error(&e))?;

            let status = response.status();
            if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(MarketDataError::from_response(status.as_u16(), &body));
            }

            response
                .json::<TickerPrice>()
                .await
                .map_err(|e| MarketDataError::Malformed(e.to_string()))
        })
        .await?;

        let price: f64 = ticker
            .price
            .parse()
            .map_err(|_| MarketDataError::Malformed(format!("price '{}'", ticker.price)))?;

        if !price.is_finite() || price <= 0.0 {
            return Err(MarketDataError::Malformed(format!("non-positive price {}", price)));
        }
        Ok(price)
    }

    /// Spot price, 0.0 when unavailable
    pub async fn get_price(&self, symbol: &str) -> f64 {
        match self.try_get_price(symbol).await {
            Ok(price) => price,
            Err(e) => {
                warn!("[MarketData] Price unavailable for {}: {}", symbol, e);
                0.0
            }
        }
    }

    /// Spot price as a decimal, zero when unavailable
    pub async fn get_price_decimal(&self, symbol: &str) -> Decimal {
        Decimal::from_f64(self.get_price(symbol).await).unwrap_or(Decimal::ZERO)
    }
}

fn value_to_f64(value: &serde_json::Value) -> Option<f64> {
    match value {
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Number(n) => n.as_f64(),
        _ => None,
    }
}

fn parse_kline(row: &[serde_json::Value]) -> Result<Candle, MarketDataError> {
    if row.len() < 6 {
        return Err(MarketDataError::Malformed(format!("kline row has {} fields", row.len())));
    }
    let field = |i: usize| {
        value_to_f64(&row[i]).ok_or_else(|| MarketDataError::Malformed(format!("kline field {}: {}", i, row[i])))
    };

    Ok(Candle {
        open_time: row[0]
            .as_i64()
            .ok_or_else(|| MarketDataError::Malformed(format!("open time {}", row[0])))?,
        open: field(1)?,
        high: field(2)?,
        low: field(3)?,
        close: field(4)?,
        volume: field(5)?,
    })
}
