//! Per-position exit plan: stop loss, two take-profit tiers and a trailing
//! stop on the runner.

use crate::config::ExitConfig;
use crate::types::Position;
use rust_decimal::Decimal;
use std::fmt;

/// Price levels derived from the entry price
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitLevels {
    pub tp1: Decimal,
    pub tp2: Decimal,
    pub sl: Decimal,
}

pub fn exit_levels(entry_price: Decimal, config: &ExitConfig) -> ExitLevels {
    ExitLevels {
        tp1: entry_price * (Decimal::ONE + config.tp1_pct),
        tp2: entry_price * (Decimal::ONE + config.tp2_pct),
        sl: entry_price * (Decimal::ONE - config.sl_pct),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitReason {
    StopLoss,
    TakeProfit1,
    TakeProfit2,
    TrailingStop,
    /// Portfolio trailing stop liquidation
    Liquidation,
}

impl fmt::Display for ExitReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitReason::StopLoss => write!(f, "stop loss"),
            ExitReason::TakeProfit1 => write!(f, "TP1"),
            ExitReason::TakeProfit2 => write!(f, "TP2"),
            ExitReason::TrailingStop => write!(f, "trailing stop"),
            ExitReason::Liquidation => write!(f, "portfolio liquidation"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitDecision {
    Hold,
    /// Sell `fraction` of the current amount
    SellPartial { fraction: Decimal, reason: ExitReason },
    SellAll { reason: ExitReason },
}

/// Trailing stop level below the high since entry
pub fn trail_level(high: Decimal, atr: Option<Decimal>, config: &ExitConfig) -> Decimal {
    match atr {
        Some(atr) if atr > Decimal::ZERO => high - atr * config.atr_multiplier,
        _ => high * (Decimal::ONE - config.trail_pct),
    }
}

/// Runner stop at `price`: the fresh trail level, never below the stored stop
pub fn ratchet_trail(position: &Position, price: Decimal, atr: Option<Decimal>, config: &ExitConfig) -> Decimal {
    let high = position
        .ath_price
        .or(position.entry_price)
        .unwrap_or(price)
        .max(price);
    let level = trail_level(high, atr, config);
    position.trail_stop.map_or(level, |stored| stored.max(level))
}

/// Decide what to do with a position at `price`.
///
/// Positions without an entry price (airdrops, pre-existing balances) are held.
pub fn evaluate_exit(
    position: &Position,
    price: Decimal,
    atr: Option<Decimal>,
    config: &ExitConfig,
) -> ExitDecision {
    let Some(entry) = position.entry_price else {
        return ExitDecision::Hold;
    };
    if price <= Decimal::ZERO || position.amount <= Decimal::ZERO {
        return ExitDecision::Hold;
    }

    let levels = exit_levels(entry, config);

    if price <= levels.sl {
        return ExitDecision::SellAll {
            reason: ExitReason::StopLoss,
        };
    }

    if !position.tp1_hit && price >= levels.tp1 {
        return ExitDecision::SellPartial {
            fraction: config.tp1_ratio,
            reason: ExitReason::TakeProfit1,
        };
    }

    if position.tp1_hit && !position.tp2_hit && price >= levels.tp2 {
        // tp2_ratio is a share of the original size; convert to a share of what is left
        let remaining = Decimal::ONE - config.tp1_ratio;
        let fraction = if remaining > Decimal::ZERO {
            (config.tp2_ratio / remaining).min(Decimal::ONE)
        } else {
            Decimal::ONE
        };
        return ExitDecision::SellPartial {
            fraction,
            reason: ExitReason::TakeProfit2,
        };
    }

    if position.tp2_hit {
        if price <= ratchet_trail(position, price, atr, config) {
            return ExitDecision::SellAll {
                reason: ExitReason::TrailingStop,
            };
        }
    }

    ExitDecision::Hold
}

/// Position bookkeeping after a partial sell of `sold` units
pub fn after_partial(position: &Position, sold: Decimal, reason: ExitReason, price: Decimal) -> Position {
    let mut next = position.clone();
    next.amount = (position.amount - sold).max(Decimal::ZERO);
    next.price = price;
    match reason {
        ExitReason::TakeProfit1 => next.tp1_hit = true,
        ExitReason::TakeProfit2 => {
            next.tp1_hit = true;
            next.tp2_hit = true;
        }
        _ => {}
    }
    next.ath_price = Some(position.ath_price.unwrap_or(price).max(price));
    next.updated_at = chrono::Utc::now().timestamp();
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn held(entry: Decimal) -> Position {
        let mut pos = Position::new("WETH", dec!(1), entry);
        pos.entry_price = Some(entry);
        pos
    }

    #[test]
    fn test_exit_levels_from_100() {
        let levels = exit_levels(dec!(100), &ExitConfig::default());
        assert_eq!(levels.tp1, dec!(101.2));
        assert_eq!(levels.tp2, dec!(102.5));
        assert_eq!(levels.sl, dec!(98.5));
    }

    #[test]
    fn test_stop_loss_sells_all() {
        let cfg = ExitConfig::default();
        let decision = evaluate_exit(&held(dec!(100)), dec!(98.5), None, &cfg);
        assert_eq!(decision, ExitDecision::SellAll { reason: ExitReason::StopLoss });
        assert_eq!(evaluate_exit(&held(dec!(100)), dec!(99), None, &cfg), ExitDecision::Hold);
    }

    #[test]
    fn test_take_profit_ladder() {
        let cfg = ExitConfig::default();
        let pos = held(dec!(100));

        let first = evaluate_exit(&pos, dec!(101.5), None, &cfg);
        assert_eq!(
            first,
            ExitDecision::SellPartial { fraction: dec!(0.30), reason: ExitReason::TakeProfit1 }
        );

        let pos = after_partial(&pos, dec!(0.3), ExitReason::TakeProfit1, dec!(101.5));
        assert_eq!(pos.amount, dec!(0.7));
        assert!(pos.tp1_hit);
        assert_eq!(pos.entry_price, Some(dec!(100)));
        assert_eq!(evaluate_exit(&pos, dec!(102), None, &cfg), ExitDecision::Hold);

        match evaluate_exit(&pos, dec!(102.6), None, &cfg) {
            ExitDecision::SellPartial { fraction, reason } => {
                assert_eq!(reason, ExitReason::TakeProfit2);
                // 40% of the original out of the 70% left
                assert_eq!((fraction * dec!(0.7)).round_dp(10), dec!(0.4));
            }
            other => panic!("expected TP2 partial, got {:?}", other),
        }
    }

    #[test]
    fn test_trailing_after_tp2() {
        let cfg = ExitConfig::default();
        let mut pos = held(dec!(100));
        pos.tp1_hit = true;
        pos.tp2_hit = true;
        pos.ath_price = Some(dec!(110));

        // ATR trail: 110 - 2 * 1.2 = 107.6
        assert_eq!(evaluate_exit(&pos, dec!(108), Some(dec!(2)), &cfg), ExitDecision::Hold);
        assert_eq!(
            evaluate_exit(&pos, dec!(107.6), Some(dec!(2)), &cfg),
            ExitDecision::SellAll { reason: ExitReason::TrailingStop }
        );

        // percentage fallback: 110 * 0.985 = 108.35
        assert_eq!(
            evaluate_exit(&pos, dec!(108.3), None, &cfg),
            ExitDecision::SellAll { reason: ExitReason::TrailingStop }
        );
    }

    #[test]
    fn test_trail_never_moves_down() {
        let cfg = ExitConfig::default();
        let mut pos = held(dec!(100));
        pos.tp1_hit = true;
        pos.tp2_hit = true;
        pos.ath_price = Some(dec!(110));

        pos.trail_stop = Some(ratchet_trail(&pos, dec!(108), Some(dec!(2)), &cfg));
        assert_eq!(pos.trail_stop, Some(dec!(107.6)));

        // a wider ATR would put the fresh level at 104.0
        assert_eq!(ratchet_trail(&pos, dec!(105), Some(dec!(5)), &cfg), dec!(107.6));
        assert_eq!(
            evaluate_exit(&pos, dec!(105), Some(dec!(5)), &cfg),
            ExitDecision::SellAll { reason: ExitReason::TrailingStop }
        );

        // a new high still lifts it
        pos.ath_price = Some(dec!(120));
        assert_eq!(ratchet_trail(&pos, dec!(119), Some(dec!(2)), &cfg), dec!(117.6));
    }

    #[test]
    fn test_no_entry_price_holds() {
        let pos = Position::new("WETH", dec!(1), dec!(100));
        assert_eq!(evaluate_exit(&pos, dec!(50), None, &ExitConfig::default()), ExitDecision::Hold);
    }
}
