//! Entry strategies for the Polygon trading bot
//!
//! A strategy supplies the trend filter (higher timeframe) and the entry
//! filter (lower timeframe). [`SignalEvaluator`] owns the row-count and
//! warm-up guards so every strategy sees fully defined indicator rows.

pub mod pullback;
pub mod rsi_hook;
pub mod trend_follow;

pub use pullback::PullbackStrategy;
pub use rsi_hook::RsiHookStrategy;
pub use trend_follow::TrendFollowStrategy;

use crate::indicators::{IndicatorRow, Indicators};
use crate::types::CandleSeries;
use anyhow::Result;

/// Minimum higher-timeframe rows for the 200-period EMA to settle
pub const MIN_HTF_ROWS: usize = 210;

/// Minimum lower-timeframe rows for the entry filter
pub const MIN_LTF_ROWS: usize = 60;

/// Trait for entry strategies
pub trait Strategy: Send + Sync {
    /// Higher-timeframe trend filter on the latest row
    fn trend_ok(&self, last: &IndicatorRow) -> bool;

    /// Lower-timeframe entry filter on the latest and previous rows
    fn entry_ok(&self, last: &IndicatorRow, prev: &IndicatorRow) -> bool;

    /// Get strategy name for display and trade tagging
    fn name(&self) -> &'static str;
}

/// Build a strategy from its configured name
pub fn strategy_from_name(name: &str) -> Result<Box<dyn Strategy>> {
    match name {
        "trend_follow" | "trend" => Ok(Box::new(TrendFollowStrategy)),
        "rsi_hook" | "rsi" => Ok(Box::new(RsiHookStrategy)),
        "pullback" => Ok(Box::new(PullbackStrategy)),
        other => anyhow::bail!(
            "Unknown strategy '{}' (expected trend_follow, rsi_hook or pullback)",
            other
        ),
    }
}

/// Outcome of evaluating one pair
#[derive(Debug, Clone, PartialEq)]
pub enum Signal {
    Enter,
    NoSignal(String),
    DataUnavailable(String),
}

/// Applies a strategy to candle series
pub struct SignalEvaluator {
    strategy: Box<dyn Strategy>,
}

impl SignalEvaluator {
    pub fn new(strategy: Box<dyn Strategy>) -> Self {
        Self { strategy }
    }

    pub fn from_name(name: &str) -> Result<Self> {
        Ok(Self::new(strategy_from_name(name)?))
    }

    pub fn strategy_name(&self) -> &'static str {
        self.strategy.name()
    }

    /// Trend filter; false for short series or undefined indicators
    pub fn htf_ok(&self, htf: &CandleSeries) -> bool {
        if htf.len() < MIN_HTF_ROWS {
            return false;
        }
        let ind = Indicators::compute(htf);
        match ind.last() {
            Some(last) if last.ema50.is_some() && last.ema200.is_some() && last.rsi.is_some() => {
                self.strategy.trend_ok(&last)
            }
            _ => false,
        }
    }

    /// Entry filter; false for short series or undefined indicators
    pub fn entry_ok(&self, ltf: &CandleSeries) -> bool {
        if ltf.len() < MIN_LTF_ROWS {
            return false;
        }
        let ind = Indicators::compute(ltf);
        match (ind.back(0), ind.back(1)) {
            (Some(last), Some(prev))
                if last.ema20.is_some() && last.ema50.is_some() && last.rsi.is_some() && prev.rsi.is_some() =>
            {
                self.strategy.entry_ok(&last, &prev)
            }
            _ => false,
        }
    }

    /// Combined verdict for a pair
    pub fn evaluate(&self, htf: &CandleSeries, ltf: &CandleSeries) -> Signal {
        if htf.len() < MIN_HTF_ROWS {
            return Signal::DataUnavailable(format!(
                "{} {} candles, need {}",
                htf.len(),
                htf.timeframe,
                MIN_HTF_ROWS
            ));
        }
        if ltf.len() < MIN_LTF_ROWS {
            return Signal::DataUnavailable(format!(
                "{} {} candles, need {}",
                ltf.len(),
                ltf.timeframe,
                MIN_LTF_ROWS
            ));
        }
        if !self.htf_ok(htf) {
            return Signal::NoSignal(format!("{} trend filter failed", htf.timeframe));
        }
        if !self.entry_ok(ltf) {
            return Signal::NoSignal(format!("{} entry filter failed", ltf.timeframe));
        }
        Signal::Enter
    }

    /// Latest ATR of a series, used for trailing exits
    pub fn latest_atr(series: &CandleSeries) -> Option<f64> {
        Indicators::compute(series).last().and_then(|row| row.atr)
    }
}

#[cfg(test)]
pub(crate) mod test_series {
    use crate::types::{Candle, CandleSeries, Timeframe};

    pub fn from_closes(closes: &[f64], timeframe: Timeframe) -> CandleSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: i as i64 * 60_000,
                open: c,
                high: c + 0.5,
                low: c - 0.5,
                close: c,
                volume: 100.0,
            })
            .collect();
        CandleSeries::new("ETH", timeframe, candles)
    }

    /// Alternating +3/-2 steps ending on an up step: rising trend, RSI 60
    pub fn uptrend(len: usize) -> Vec<f64> {
        let mut closes = Vec::with_capacity(len);
        let mut price = 1000.0;
        for i in 0..len {
            // last index is always an up step
            price += if (len - 1 - i) % 2 == 0 { 3.0 } else { -2.0 };
            closes.push(price);
        }
        closes
    }

    pub fn downtrend(len: usize) -> Vec<f64> {
        let mut closes = Vec::with_capacity(len);
        let mut price = 2000.0;
        for i in 0..len {
            price += if (len - 1 - i) % 2 == 0 { -3.0 } else { 2.0 };
            closes.push(price);
        }
        closes
    }
}
