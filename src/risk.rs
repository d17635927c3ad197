//! Portfolio-level risk gate
//!
//! Two independent checks run every cycle:
//!
//! 1. **Daily loss kill switch**: realized PnL since UTC midnight against a
//!    limit. Breaching it halts new entries; exits keep running.
//! 2. **Portfolio trailing stop**: drawdown from the equity high. Breaching it
//!    liquidates every position and pauses entries for a cooldown.

use crate::config::RiskConfig;
use crate::db::{meta_keys, Database};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use tracing::{info, warn};

/// How the daily loss threshold is expressed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DailyLossLimit {
    /// Fixed USDC amount, negative (e.g. -1.5)
    Absolute(Decimal),
    /// Fraction of the portfolio baseline, negative (e.g. -0.01)
    PercentOfBaseline(Decimal),
}

impl DailyLossLimit {
    /// Threshold in USDC for the given baseline
    pub fn threshold(&self, baseline: Decimal) -> Decimal {
        match *self {
            DailyLossLimit::Absolute(limit) => -limit.abs(),
            DailyLossLimit::PercentOfBaseline(pct) => -(pct.abs() * baseline),
        }
    }
}

/// True when the day's realized PnL is at or below the loss threshold
pub fn kill_switch_triggered(daily_pnl: Decimal, limit: DailyLossLimit, baseline: Decimal) -> bool {
    daily_pnl <= limit.threshold(baseline)
}

/// True when the day's realized PnL has reached the profit lock
pub fn profit_lock_reached(daily_pnl: Decimal, lock: Option<Decimal>, baseline: Decimal) -> bool {
    match lock {
        Some(pct) if baseline > Decimal::ZERO => daily_pnl >= pct.abs() * baseline,
        _ => false,
    }
}

/// True when equity has fallen `pct` or more below its high
pub fn trailing_stop_triggered(ath: Decimal, current: Decimal, pct: Decimal) -> bool {
    if ath <= Decimal::ZERO {
        return false;
    }
    (ath - current) / ath >= pct
}

/// Unix seconds of the most recent UTC midnight
pub fn utc_day_start(now: DateTime<Utc>) -> i64 {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().timestamp())
        .unwrap_or_else(|| now.timestamp())
}

/// Why new entries are blocked this cycle
#[derive(Debug, Clone, PartialEq)]
pub enum HaltReason {
    DailyLoss { pnl: Decimal, threshold: Decimal },
    ProfitLock { pnl: Decimal },
    TrailingCooldown { until: i64 },
}

impl std::fmt::Display for HaltReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HaltReason::DailyLoss { pnl, threshold } => {
                write!(f, "daily loss kill switch (pnl {:.4} <= {:.4})", pnl, threshold)
            }
            HaltReason::ProfitLock { pnl } => write!(f, "daily profit lock (pnl {:.4})", pnl),
            HaltReason::TrailingCooldown { until } => {
                write!(f, "trailing stop cooldown until {}", until)
            }
        }
    }
}

/// Persists risk state in the `meta` table
pub struct RiskGate {
    db: Database,
    config: RiskConfig,
}

impl RiskGate {
    pub fn new(db: Database, config: RiskConfig) -> Self {
        Self { db, config }
    }

    /// Recompute realized PnL since UTC midnight and store it
    pub async fn refresh_daily_pnl(&self, now: DateTime<Utc>) -> Result<Decimal> {
        let pnl = self.db.realized_pnl_since(utc_day_start(now)).await?;
        self.db.set_meta_decimal(meta_keys::DAILY_PNL, pnl).await?;
        Ok(pnl)
    }

    /// Entry gate: `None` when new positions may be opened
    pub async fn entry_halt(
        &self,
        daily_pnl: Decimal,
        baseline: Decimal,
        now: DateTime<Utc>,
    ) -> Result<Option<HaltReason>> {
        let threshold = self.config.daily_loss_limit.threshold(baseline);
        if kill_switch_triggered(daily_pnl, self.config.daily_loss_limit, baseline) {
            return Ok(Some(HaltReason::DailyLoss {
                pnl: daily_pnl,
                threshold,
            }));
        }

        if profit_lock_reached(daily_pnl, self.config.daily_profit_lock, baseline) {
            return Ok(Some(HaltReason::ProfitLock { pnl: daily_pnl }));
        }

        if let Some(until) = self.db.get_meta_i64(meta_keys::TRAILING_STOP_UNTIL).await? {
            if now.timestamp() < until {
                return Ok(Some(HaltReason::TrailingCooldown { until }));
            }
        }

        Ok(None)
    }

    /// Ratchet the equity high and report whether the trailing stop fired
    pub async fn check_trailing_stop(&self, current: Decimal) -> Result<bool> {
        if current <= Decimal::ZERO {
            return Ok(false);
        }

        let ath = match self.db.get_meta_decimal(meta_keys::PORTFOLIO_ATH).await? {
            Some(ath) if ath > Decimal::ZERO => ath,
            _ => {
                self.db.set_meta_decimal(meta_keys::PORTFOLIO_ATH, current).await?;
                return Ok(false);
            }
        };

        if current > ath {
            self.db.set_meta_decimal(meta_keys::PORTFOLIO_ATH, current).await?;
            return Ok(false);
        }

        let fired = trailing_stop_triggered(ath, current, self.config.trailing_stop_pct);
        if fired {
            warn!(
                "[Risk] Portfolio trailing stop: equity {:.4} is {:.2}% below high {:.4}",
                current,
                ((ath - current) / ath * Decimal::ONE_HUNDRED),
                ath
            );
        }
        Ok(fired)
    }

    /// Reset the equity high after liquidation and start the entry cooldown
    pub async fn after_liquidation(&self, equity: Decimal, now: DateTime<Utc>) -> Result<()> {
        self.db.set_meta_decimal(meta_keys::PORTFOLIO_ATH, equity).await?;
        let until = now.timestamp() + self.config.trailing_stop_cooldown_seconds;
        self.db
            .set_meta(meta_keys::TRAILING_STOP_UNTIL, &until.to_string())
            .await?;
        info!("[Risk] High reset to {:.4}, entries paused until {}", equity, until);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    #[test]
    fn test_kill_switch_absolute() {
        let limit = DailyLossLimit::Absolute(dec!(-1.5));
        assert!(kill_switch_triggered(dec!(-2.0), limit, dec!(100)));
        assert!(!kill_switch_triggered(dec!(-1.0), limit, dec!(100)));
        assert!(kill_switch_triggered(dec!(-1.5), limit, dec!(100)));
    }

    #[test]
    fn test_kill_switch_percent_of_baseline() {
        let limit = DailyLossLimit::PercentOfBaseline(dec!(-0.01));
        assert_eq!(limit.threshold(dec!(200)), dec!(-2));
        assert!(kill_switch_triggered(dec!(-2.5), limit, dec!(200)));
        assert!(!kill_switch_triggered(dec!(-1.5), limit, dec!(200)));
    }

    #[test]
    fn test_trailing_stop_threshold() {
        assert!(trailing_stop_triggered(dec!(100), dec!(94), dec!(0.05)));
        assert!(!trailing_stop_triggered(dec!(100), dec!(96), dec!(0.05)));
        assert!(trailing_stop_triggered(dec!(100), dec!(95), dec!(0.05)));
        assert!(!trailing_stop_triggered(Decimal::ZERO, dec!(10), dec!(0.05)));
    }

    #[test]
    fn test_profit_lock() {
        assert!(profit_lock_reached(dec!(1.6), Some(dec!(0.015)), dec!(100)));
        assert!(!profit_lock_reached(dec!(1.4), Some(dec!(0.015)), dec!(100)));
        assert!(!profit_lock_reached(dec!(50), None, dec!(100)));
    }

    #[test]
    fn test_utc_day_start() {
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 15, 9, 26).unwrap();
        let start = Utc.with_ymd_and_hms(2026, 3, 14, 0, 0, 0).unwrap();
        assert_eq!(utc_day_start(now), start.timestamp());
    }

    #[tokio::test]
    async fn test_gate_trailing_and_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("risk.db").to_str().unwrap()).await.unwrap();
        let gate = RiskGate::new(db.clone(), RiskConfig::default());
        let now = Utc.with_ymd_and_hms(2026, 3, 14, 12, 0, 0).unwrap();

        assert!(!gate.check_trailing_stop(dec!(100)).await.unwrap());
        assert!(!gate.check_trailing_stop(dec!(96)).await.unwrap());
        assert!(gate.check_trailing_stop(dec!(94)).await.unwrap());

        gate.after_liquidation(dec!(94), now).await.unwrap();
        assert_eq!(db.get_meta_decimal(meta_keys::PORTFOLIO_ATH).await.unwrap(), Some(dec!(94)));

        let halt = gate.entry_halt(Decimal::ZERO, dec!(100), now).await.unwrap();
        assert!(matches!(halt, Some(HaltReason::TrailingCooldown { .. })));

        let later = now + chrono::Duration::seconds(601);
        assert!(gate.entry_halt(Decimal::ZERO, dec!(100), later).await.unwrap().is_none());

        let halt = gate.entry_halt(dec!(-2), dec!(100), later).await.unwrap();
        assert!(matches!(halt, Some(HaltReason::DailyLoss { .. })));
    }
}
