//! Core types for the Polygon trading bot

use crate::services::errors::MarketDataError;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Balances below this many token units are treated as closed positions
pub const DUST_THRESHOLD: Decimal = dec!(0.00000001);

/// Trade direction relative to the stablecoin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Buy => write!(f, "BUY"),
            Side::Sell => write!(f, "SELL"),
        }
    }
}

impl FromStr for Side {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "BUY" => Ok(Side::Buy),
            "SELL" => Ok(Side::Sell),
            other => anyhow::bail!("Unknown trade side: {}", other),
        }
    }
}

/// An executed swap, as stored in the `trades` table.
///
/// `amount_in` and `amount_out` are both quote (USDC) denominated so that
/// `amount_out - amount_in` is the realized result of the row: a buy records
/// the USDC spent against the value received at the fill price, a sell records
/// the cost basis of the sold quantity against the USDC received.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub id: Option<i64>,
    /// Unix seconds, UTC
    pub timestamp: i64,
    /// Pair label such as `WETH/USDC`
    pub pair: String,
    pub side: Side,
    pub amount_in: Decimal,
    pub amount_out: Decimal,
    /// Token units moved by the swap
    pub quantity: Decimal,
    /// Execution price in USDC per token
    pub price: Decimal,
    pub tx_hash: String,
    pub strategy: Option<String>,
    pub equity_before: Option<Decimal>,
    pub equity_after: Option<Decimal>,
}

impl Trade {
    pub fn pnl(&self) -> Decimal {
        self.amount_out - self.amount_in
    }

    /// Asset symbol, the part of the pair label before the slash
    pub fn asset(&self) -> &str {
        self.pair.split('/').next().unwrap_or(&self.pair)
    }
}

/// One row of the `balances` table: a held asset and its exit bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub asset: String,
    pub amount: Decimal,
    /// Last observed market price
    pub price: Decimal,
    /// Set on the first buy and never changed by partial sells
    pub entry_price: Option<Decimal>,
    pub tp1_hit: bool,
    pub tp2_hit: bool,
    /// Highest price seen since entry
    pub ath_price: Option<Decimal>,
    /// Runner stop after TP2; only ever raised
    pub trail_stop: Option<Decimal>,
    pub updated_at: i64,
}

impl Position {
    pub fn new(asset: impl Into<String>, amount: Decimal, price: Decimal) -> Self {
        Self {
            asset: asset.into(),
            amount,
            price,
            entry_price: None,
            tp1_hit: false,
            tp2_hit: false,
            ath_price: None,
            trail_stop: None,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn value(&self) -> Decimal {
        self.amount * self.price
    }

    pub fn unrealized_pnl(&self) -> Decimal {
        match self.entry_price {
            Some(entry) if self.price > Decimal::ZERO => (self.price - entry) * self.amount,
            _ => Decimal::ZERO,
        }
    }

    pub fn is_dust(&self) -> bool {
        self.amount < DUST_THRESHOLD
    }
}

/// Point-in-time portfolio valuation, as stored in `portfolio_snapshots`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PortfolioSnapshot {
    pub timestamp: i64,
    pub total_equity: Decimal,
    pub stable_balance: Decimal,
    pub invested_value: Decimal,
    pub unrealized_pnl: Decimal,
    pub realized_pnl: Decimal,
}

/// Candle interval supported by the kline endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::M15 => "15m",
            Timeframe::H1 => "1h",
            Timeframe::H4 => "4h",
            Timeframe::D1 => "1d",
        }
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Timeframe {
    type Err = MarketDataError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "15m" => Ok(Timeframe::M15),
            "1h" => Ok(Timeframe::H1),
            "4h" => Ok(Timeframe::H4),
            "1d" => Ok(Timeframe::D1),
            other => Err(MarketDataError::UnsupportedTimeframe(other.to_string())),
        }
    }
}

/// OHLCV bar
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    /// Open time in unix milliseconds
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

/// Time-ordered candles for one symbol and timeframe
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandleSeries {
    pub symbol: String,
    pub timeframe: Timeframe,
    pub candles: Vec<Candle>,
}

impl CandleSeries {
    pub fn new(symbol: impl Into<String>, timeframe: Timeframe, mut candles: Vec<Candle>) -> Self {
        candles.sort_by_key(|c| c.open_time);
        Self {
            symbol: symbol.into(),
            timeframe,
            candles,
        }
    }

    pub fn len(&self) -> usize {
        self.candles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candles.is_empty()
    }

    pub fn closes(&self) -> Vec<f64> {
        self.candles.iter().map(|c| c.close).collect()
    }

    pub fn last_close(&self) -> Option<f64> {
        self.candles.last().map(|c| c.close)
    }
}

/// Aggregate trade statistics for the `stats` command
#[derive(Debug, Clone, Default)]
pub struct BotStats {
    pub total_trades: i64,
    pub buys: i64,
    pub sells: i64,
    pub winning_sells: i64,
    pub losing_sells: i64,
    pub realized_pnl: Decimal,
    pub open_positions: i64,
}

impl BotStats {
    pub fn win_rate(&self) -> f64 {
        let closed = self.winning_sells + self.losing_sells;
        if closed == 0 {
            0.0
        } else {
            (self.winning_sells as f64 / closed as f64) * 100.0
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timeframe_parse() {
        assert_eq!("4h".parse::<Timeframe>().unwrap(), Timeframe::H4);
        assert_eq!("15m".parse::<Timeframe>().unwrap(), Timeframe::M15);
        assert!(matches!(
            "2h".parse::<Timeframe>(),
            Err(MarketDataError::UnsupportedTimeframe(_))
        ));
    }

    #[test]
    fn test_trade_pnl_and_asset() {
        let trade = Trade {
            id: None,
            timestamp: 0,
            pair: "WETH/USDC".to_string(),
            side: Side::Sell,
            amount_in: dec!(2.40),
            amount_out: dec!(2.52),
            quantity: dec!(0.001),
            price: dec!(2520),
            tx_hash: "0xabc".to_string(),
            strategy: None,
            equity_before: None,
            equity_after: None,
        };
        assert_eq!(trade.pnl(), dec!(0.12));
        assert_eq!(trade.asset(), "WETH");
    }

    #[test]
    fn test_position_value_and_dust() {
        let mut pos = Position::new("WBTC", dec!(0.0001), dec!(60000));
        pos.entry_price = Some(dec!(50000));
        assert_eq!(pos.value(), dec!(6));
        assert_eq!(pos.unrealized_pnl(), dec!(1));
        assert!(!pos.is_dust());

        pos.amount = dec!(0.000000001);
        assert!(pos.is_dust());
    }

    #[test]
    fn test_series_sorted_by_open_time() {
        let c = |t: i64, close: f64| Candle { open_time: t, open: close, high: close, low: close, close, volume: 1.0 };
        let series = CandleSeries::new("ETH", Timeframe::H1, vec![c(2, 20.0), c(1, 10.0)]);
        assert_eq!(series.closes(), vec![10.0, 20.0]);
        assert_eq!(series.last_close(), Some(20.0));
    }
}
