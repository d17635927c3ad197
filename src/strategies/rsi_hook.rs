//! RSI Hook Strategy
//!
//! Buys oversold dips inside a higher-timeframe uptrend once RSI turns back
//! up and the candle closes green.

use super::Strategy;
use crate::indicators::IndicatorRow;

const RSI_OVERSOLD: f64 = 40.0;

pub struct RsiHookStrategy;

impl Strategy for RsiHookStrategy {
    fn trend_ok(&self, last: &IndicatorRow) -> bool {
        let (Some(ema50), Some(ema200)) = (last.ema50, last.ema200) else {
            return false;
        };
        ema50 > ema200 && last.close > ema50
    }

    fn entry_ok(&self, last: &IndicatorRow, prev: &IndicatorRow) -> bool {
        let (Some(rsi), Some(prev_rsi)) = (last.rsi, prev.rsi) else {
            return false;
        };
        rsi < RSI_OVERSOLD && rsi > prev_rsi && last.close > prev.close
    }

    fn name(&self) -> &'static str {
        "rsi_hook"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(close: f64, rsi: Option<f64>) -> IndicatorRow {
        IndicatorRow {
            close,
            ema20: None,
            ema50: Some(100.0),
            ema200: Some(90.0),
            rsi,
            atr: None,
        }
    }

    #[test]
    fn test_hook_requires_turn_up() {
        let s = RsiHookStrategy;
        assert!(s.entry_ok(&row(101.0, Some(35.0)), &row(100.0, Some(30.0))));
        // RSI still falling
        assert!(!s.entry_ok(&row(101.0, Some(28.0)), &row(100.0, Some(30.0))));
        // not oversold
        assert!(!s.entry_ok(&row(101.0, Some(45.0)), &row(100.0, Some(30.0))));
        // lower close
        assert!(!s.entry_ok(&row(99.0, Some(35.0)), &row(100.0, Some(30.0))));
        assert!(!s.entry_ok(&row(101.0, None), &row(100.0, Some(30.0))));
    }
}
