//! Technical indicators over candle closes
//!
//! Each function returns one value per input row, `None` while the window is
//! still warming up.

use crate::types::CandleSeries;

/// Exponential moving average seeded with the first value (`adjust=False`).
///
/// Rows before `period - 1` are reported as `None` even though the recursion
/// runs from the first row.
pub fn ema(values: &[f64], period: usize) -> Vec<Option<f64>> {
    if period == 0 {
        return vec![None; values.len()];
    }
    let alpha = 2.0 / (period as f64 + 1.0);
    let mut out = Vec::with_capacity(values.len());
    let mut prev: Option<f64> = None;

    for (i, &v) in values.iter().enumerate() {
        let next = match prev {
            None => v,
            Some(p) => alpha * v + (1.0 - alpha) * p,
        };
        prev = Some(next);
        out.push(if i + 1 >= period { Some(next) } else { None });
    }
    out
}

/// RSI from plain rolling means of gains and losses (not Wilder smoothing)
pub fn rsi(values: &[f64], period: usize) -> Vec<Option<f64>> {
    let mut out = vec![None; values.len()];
    if period == 0 || values.len() <= period {
        return out;
    }

    let deltas: Vec<f64> = values.windows(2).map(|w| w[1] - w[0]).collect();

    // deltas[i] is the change into row i + 1
    for end in period..=deltas.len() {
        let window = &deltas[end - period..end];
        let gain: f64 = window.iter().filter(|d| **d > 0.0).sum::<f64>() / period as f64;
        let loss: f64 = window.iter().filter(|d| **d < 0.0).map(|d| -d).sum::<f64>() / period as f64;

        out[end] = Some(if loss == 0.0 {
            100.0
        } else {
            100.0 - 100.0 / (1.0 + gain / loss)
        });
    }
    out
}

/// Average true range as a rolling mean of the true range
pub fn atr(series: &CandleSeries, period: usize) -> Vec<Option<f64>> {
    let candles = &series.candles;
    let mut out = vec![None; candles.len()];
    if period == 0 || candles.len() < period {
        return out;
    }

    let tr: Vec<f64> = candles
        .iter()
        .enumerate()
        .map(|(i, c)| {
            let range = c.high - c.low;
            match i.checked_sub(1).map(|p| candles[p].close) {
                Some(prev_close) => range
                    .max((c.high - prev_close).abs())
                    .max((c.low - prev_close).abs()),
                None => range,
            }
        })
        .collect();

    for end in period..=tr.len() {
        out[end - 1] = Some(tr[end - period..end].iter().sum::<f64>() / period as f64);
    }
    out
}

/// Indicator values at one row
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IndicatorRow {
    pub close: f64,
    pub ema20: Option<f64>,
    pub ema50: Option<f64>,
    pub ema200: Option<f64>,
    pub rsi: Option<f64>,
    pub atr: Option<f64>,
}

/// Indicators computed over a whole series
#[derive(Debug, Clone)]
pub struct Indicators {
    pub closes: Vec<f64>,
    pub ema20: Vec<Option<f64>>,
    pub ema50: Vec<Option<f64>>,
    pub ema200: Vec<Option<f64>>,
    pub rsi: Vec<Option<f64>>,
    pub atr: Vec<Option<f64>>,
}

impl Indicators {
    pub fn compute(series: &CandleSeries) -> Self {
        let closes = series.closes();
        Self {
            ema20: ema(&closes, 20),
            ema50: ema(&closes, 50),
            ema200: ema(&closes, 200),
            rsi: rsi(&closes, 14),
            atr: atr(series, 14),
            closes,
        }
    }

    pub fn len(&self) -> usize {
        self.closes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.closes.is_empty()
    }

    /// Row counted back from the end: `back(0)` is the latest row
    pub fn back(&self, offset: usize) -> Option<IndicatorRow> {
        let i = self.closes.len().checked_sub(offset + 1)?;
        Some(IndicatorRow {
            close: self.closes[i],
            ema20: self.ema20[i],
            ema50: self.ema50[i],
            ema200: self.ema200[i],
            rsi: self.rsi[i],
            atr: self.atr[i],
        })
    }

    pub fn last(&self) -> Option<IndicatorRow> {
        self.back(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Candle, Timeframe};

    fn series(closes: &[f64]) -> CandleSeries {
        let candles = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| Candle {
                open_time: i as i64 * 60_000,
                open: c,
                high: c + 1.0,
                low: c - 1.0,
                close: c,
                volume: 10.0,
            })
            .collect();
        CandleSeries::new("ETH", Timeframe::M15, candles)
    }

    #[test]
    fn test_ema_constant_series() {
        let values = vec![5.0; 30];
        let out = ema(&values, 20);
        assert!(out[18].is_none());
        assert_eq!(out[19], Some(5.0));
        assert_eq!(out[29], Some(5.0));
    }

    #[test]
    fn test_ema_recursion() {
        let out = ema(&[1.0, 2.0, 3.0], 3);
        // alpha = 0.5: 1.0 -> 1.5 -> 2.25
        assert_eq!(out, vec![None, None, Some(2.25)]);
    }

    #[test]
    fn test_rsi_all_gains_is_100() {
        let values: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let out = rsi(&values, 14);
        assert!(out[13].is_none());
        assert_eq!(out[14], Some(100.0));
        assert_eq!(out[19], Some(100.0));
    }

    #[test]
    fn test_rsi_balanced_is_50() {
        let values: Vec<f64> = (0..30).map(|i| if i % 2 == 0 { 10.0 } else { 11.0 }).collect();
        let out = rsi(&values, 14);
        let last = out[29].unwrap();
        assert!((last - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_atr_rolling_mean() {
        let s = series(&vec![100.0; 20]);
        let out = atr(&s, 14);
        assert!(out[12].is_none());
        assert_eq!(out[13], Some(2.0));
    }

    #[test]
    fn test_indicator_rows() {
        let s = series(&(0..250).map(|i| 100.0 + i as f64).collect::<Vec<_>>());
        let ind = Indicators::compute(&s);
        let last = ind.last().unwrap();
        assert_eq!(last.close, 349.0);
        assert!(last.ema200.is_some());
        assert!(last.ema20.unwrap() > last.ema50.unwrap());
        assert_eq!(ind.back(1).unwrap().close, 348.0);
        assert!(ind.back(250).is_none());
    }
}
