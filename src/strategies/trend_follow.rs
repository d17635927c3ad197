//! Trend Following Strategy
//!
//! The play: only buy when the higher timeframe is in an uptrend
//! (EMA50 above EMA200 and price above EMA50), then enter on the lower
//! timeframe when price holds above EMA50 with moderate momentum and the
//! latest candle closed higher than the one before.

use super::Strategy;
use crate::indicators::IndicatorRow;

/// RSI band for entries: above oversold noise, below exhaustion
const RSI_MIN: f64 = 35.0;
const RSI_MAX: f64 = 65.0;

pub struct TrendFollowStrategy;

impl Strategy for TrendFollowStrategy {
    fn trend_ok(&self, last: &IndicatorRow) -> bool {
        let (Some(ema50), Some(ema200)) = (last.ema50, last.ema200) else {
            return false;
        };
        ema50 > ema200 && last.close > ema50
    }

    fn entry_ok(&self, last: &IndicatorRow, prev: &IndicatorRow) -> bool {
        let (Some(ema50), Some(rsi)) = (last.ema50, last.rsi) else {
            return false;
        };
        last.close > ema50 && (RSI_MIN..=RSI_MAX).contains(&rsi) && last.close > prev.close
    }

    fn name(&self) -> &'static str {
        "trend_follow"
    }
}
