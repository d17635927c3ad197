//! Portfolio valuation over the `balances` table

use crate::services::market_data::is_stablecoin;
use crate::types::{PortfolioSnapshot, Position};
use rust_decimal::Decimal;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PortfolioValue {
    pub total: Decimal,
    pub stable: Decimal,
    pub invested: Decimal,
    pub unrealized: Decimal,
}

/// Σ amount × price over rows with a known price
pub fn value_positions(positions: &[Position]) -> PortfolioValue {
    let mut value = PortfolioValue::default();
    for position in positions {
        if position.price <= Decimal::ZERO {
            continue;
        }
        let worth = position.value();
        value.total += worth;
        if is_stablecoin(&position.asset) {
            value.stable += worth;
        } else {
            value.invested += worth;
            value.unrealized += position.unrealized_pnl();
        }
    }
    value
}

/// Held non-stable positions opened by the bot
pub fn open_positions(positions: &[Position]) -> Vec<&Position> {
    positions
        .iter()
        .filter(|p| !is_stablecoin(&p.asset) && p.entry_price.is_some() && !p.is_dust())
        .collect()
}

pub fn snapshot(value: &PortfolioValue, realized_pnl: Decimal, timestamp: i64) -> PortfolioSnapshot {
    PortfolioSnapshot {
        timestamp,
        total_equity: value.total,
        stable_balance: value.stable,
        invested_value: value.invested,
        unrealized_pnl: value.unrealized,
        realized_pnl,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_value_skips_unpriced_rows() {
        let mut weth = Position::new("WETH", dec!(0.01), dec!(2100));
        weth.entry_price = Some(dec!(2000));
        let positions = vec![
            Position::new("USDC", dec!(10), dec!(1)),
            weth,
            Position::new("AAVE", dec!(1), dec!(0)),
        ];

        let value = value_positions(&positions);
        assert_eq!(value.total, dec!(31));
        assert_eq!(value.stable, dec!(10));
        assert_eq!(value.invested, dec!(21));
        assert_eq!(value.unrealized, dec!(1));

        let open = open_positions(&positions);
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].asset, "WETH");
    }
}
