//! Portfolio baseline, growth lock and position sizing

use crate::config::RiskConfig;
use crate::db::{meta_keys, Database};
use anyhow::Result;
use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::info;

/// True when `current` has grown past the baseline by `trigger`
pub fn should_ratchet(baseline: Decimal, current: Decimal, trigger: Decimal) -> bool {
    baseline > Decimal::ZERO && current >= baseline * (Decimal::ONE + trigger)
}

/// Entry size in USDC: a fraction of equity with a floor, rounded to cents
pub fn trade_size(portfolio_value: Decimal, risk_per_trade: Decimal, min_trade: Decimal) -> Decimal {
    (portfolio_value * risk_per_trade).max(min_trade).round_dp(2)
}

/// Entry size capped by the stablecoin on hand; zero when below the floor
pub fn affordable_size(size: Decimal, available: Decimal, min_trade: Decimal) -> Decimal {
    let capped = size.min(available).round_dp_with_strategy(2, rust_decimal::RoundingStrategy::ToZero);
    if capped < min_trade {
        Decimal::ZERO
    } else {
        capped
    }
}

pub struct BaselineTracker {
    db: Database,
    growth_trigger: Decimal,
}

impl BaselineTracker {
    pub fn new(db: Database, config: &RiskConfig) -> Self {
        Self {
            db,
            growth_trigger: config.growth_trigger,
        }
    }

    /// Stored baseline, initialised (or repaired when non-positive) to `current`
    pub async fn get_or_init(&self, current: Decimal) -> Result<Decimal> {
        match self.db.get_meta_decimal(meta_keys::PORTFOLIO_BASELINE).await? {
            Some(baseline) if baseline > Decimal::ZERO => Ok(baseline),
            _ => {
                let baseline = current.max(dec!(0));
                self.db
                    .set_meta_decimal(meta_keys::PORTFOLIO_BASELINE, baseline)
                    .await?;
                info!("[Baseline] Initialised to {:.4}", baseline);
                Ok(baseline)
            }
        }
    }

    /// Raise the baseline to `current` after sufficient growth; returns the new value
    pub async fn maybe_ratchet(&self, current: Decimal) -> Result<Option<Decimal>> {
        let baseline = self.get_or_init(current).await?;
        if !should_ratchet(baseline, current, self.growth_trigger) {
            return Ok(None);
        }

        self.db
            .set_meta_decimal(meta_keys::PORTFOLIO_BASELINE, current)
            .await?;
        self.db
            .set_meta(meta_keys::LAST_GROWTH_LOCK, &Utc::now().timestamp().to_string())
            .await?;
        info!("[Baseline] Growth lock: {:.4} -> {:.4}", baseline, current);
        Ok(Some(current))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_ratchet() {
        assert!(should_ratchet(dec!(100), dec!(100.6), dec!(0.005)));
        assert!(should_ratchet(dec!(100), dec!(100.5), dec!(0.005)));
        assert!(!should_ratchet(dec!(100), dec!(100.4), dec!(0.005)));
        assert!(!should_ratchet(Decimal::ZERO, dec!(10), dec!(0.005)));
    }

    #[test]
    fn test_trade_size() {
        assert_eq!(trade_size(dec!(240), dec!(0.01), dec!(1)), dec!(2.40));
        // floor applies to small portfolios
        assert_eq!(trade_size(dec!(20), dec!(0.01), dec!(1)), dec!(1));
        assert_eq!(trade_size(dec!(333.333), dec!(0.01), dec!(1)), dec!(3.33));
    }

    #[test]
    fn test_affordable_size() {
        assert_eq!(affordable_size(dec!(2.4), dec!(10), dec!(1)), dec!(2.4));
        assert_eq!(affordable_size(dec!(2.4), dec!(1.999), dec!(1)), dec!(1.99));
        assert_eq!(affordable_size(dec!(2.4), dec!(0.5), dec!(1)), Decimal::ZERO);
    }

    #[tokio::test]
    async fn test_baseline_ratchet() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("b.db").to_str().unwrap()).await.unwrap();
        let tracker = BaselineTracker::new(db.clone(), &RiskConfig::default());

        assert_eq!(tracker.get_or_init(dec!(100)).await.unwrap(), dec!(100));
        assert_eq!(tracker.maybe_ratchet(dec!(100.4)).await.unwrap(), None);
        assert_eq!(tracker.get_or_init(dec!(0)).await.unwrap(), dec!(100));

        assert_eq!(tracker.maybe_ratchet(dec!(100.6)).await.unwrap(), Some(dec!(100.6)));
        assert_eq!(tracker.get_or_init(dec!(0)).await.unwrap(), dec!(100.6));
        assert!(db.get_meta(meta_keys::LAST_GROWTH_LOCK).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_baseline_self_heals() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("b.db").to_str().unwrap()).await.unwrap();
        db.set_meta_decimal(meta_keys::PORTFOLIO_BASELINE, dec!(-5)).await.unwrap();

        let tracker = BaselineTracker::new(db, &RiskConfig::default());
        assert_eq!(tracker.get_or_init(dec!(42)).await.unwrap(), dec!(42));
    }
}
