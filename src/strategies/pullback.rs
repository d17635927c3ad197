//! Pullback Strategy
//!
//! Enters when price retraces into the EMA20–EMA50 zone with cooled-off RSI,
//! provided the higher timeframe trend is intact and RSI there is above 45.

use super::Strategy;
use crate::indicators::IndicatorRow;

const HTF_RSI_MIN: f64 = 45.0;
const RSI_MIN: f64 = 38.0;
const RSI_MAX: f64 = 48.0;

pub struct PullbackStrategy;

impl Strategy for PullbackStrategy {
    fn trend_ok(&self, last: &IndicatorRow) -> bool {
        let (Some(ema50), Some(ema200), Some(rsi)) = (last.ema50, last.ema200, last.rsi) else {
            return false;
        };
        ema50 > ema200 && rsi > HTF_RSI_MIN
    }

    fn entry_ok(&self, last: &IndicatorRow, _prev: &IndicatorRow) -> bool {
        let (Some(ema20), Some(ema50), Some(rsi)) = (last.ema20, last.ema50, last.rsi) else {
            return false;
        };
        ema20 <= last.close && last.close <= ema50 && (RSI_MIN..=RSI_MAX).contains(&rsi)
    }

    fn name(&self) -> &'static str {
        "pullback"
    }
}
