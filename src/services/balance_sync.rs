//! Balance sync: wallet balances and prices into the `balances` table

use super::market_data::MarketData;
use super::uniswap::UniswapClient;
use crate::db::Database;
use crate::tokens::{self, QUOTE_SYMBOL};
use crate::types::{Position, DUST_THRESHOLD};
use anyhow::Result;
use rust_decimal::Decimal;
use tracing::{debug, info, warn};

/// Summary of one sync pass
#[derive(Debug, Clone, Default)]
pub struct SyncReport {
    pub updated: usize,
    pub removed: Vec<String>,
    pub failed: Vec<String>,
}

pub struct BalanceSync<'a> {
    db: &'a Database,
    market: &'a MarketData,
    chain: Option<&'a UniswapClient>,
}

impl<'a> BalanceSync<'a> {
    pub fn new(db: &'a Database, market: &'a MarketData, chain: Option<&'a UniswapClient>) -> Self {
        Self { db, market, chain }
    }

    /// Refresh balances for `symbols` (plus the quote token and anything stored)
    pub async fn sync(&self, symbols: &[String]) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        let mut tracked: Vec<String> = vec![QUOTE_SYMBOL.to_string()];
        for symbol in symbols {
            let upper = symbol.to_uppercase();
            if !tracked.contains(&upper) {
                tracked.push(upper);
            }
        }
        for position in self.db.get_positions().await? {
            if !tracked.contains(&position.asset) {
                tracked.push(position.asset);
            }
        }

        for symbol in &tracked {
            match self.sync_one(symbol).await {
                Ok(true) => report.updated += 1,
                Ok(false) => report.removed.push(symbol.clone()),
                Err(e) => {
                    warn!("[Sync] {} failed: {}", symbol, e);
                    report.failed.push(symbol.clone());
                }
            }
        }

        info!(
            "[Sync] {} balances updated, {} removed, {} failed",
            report.updated,
            report.removed.len(),
            report.failed.len()
        );
        Ok(report)
    }

    /// Returns false when the row was dropped as dust
    async fn sync_one(&self, symbol: &str) -> Result<bool> {
        let stored = self.db.get_position(symbol).await?;

        let amount = match self.chain {
            Some(chain) => {
                let token = tokens::require(symbol)?;
                chain.token_balance(token).await?
            }
            None => match &stored {
                Some(position) => position.amount,
                None => return Ok(false),
            },
        };

        if amount < DUST_THRESHOLD && symbol != QUOTE_SYMBOL {
            if stored.is_some() {
                self.db.remove_position(symbol).await?;
                debug!("[Sync] Removed dust {} ({})", symbol, amount);
            }
            return Ok(false);
        }

        let mut price = self.market.get_price_decimal(symbol).await;
        if price <= Decimal::ZERO {
            // keep the last known price rather than zeroing the valuation
            price = stored.as_ref().map(|p| p.price).unwrap_or(Decimal::ZERO);
        }

        match stored {
            Some(mut position) if position.entry_price.is_some() => {
                position.amount = amount;
                position.price = price;
                if price > position.ath_price.unwrap_or(Decimal::ZERO) {
                    position.ath_price = Some(price);
                }
                position.updated_at = chrono::Utc::now().timestamp();
                self.db.save_position(&position).await?;
            }
            Some(_) => self.db.sync_balance(symbol, amount, price).await?,
            None => self.db.save_position(&Position::new(symbol, amount, price)).await?,
        }
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::MarketDataConfig;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_paper_sync_refreshes_prices_and_drops_dust() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"symbol": "ETHUSDT", "price": "2100"})))
            .mount(&server)
            .await;

        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("sync.db").to_str().unwrap()).await.unwrap();
        let market = MarketData::new(MarketDataConfig {
            candle_api_url: server.uri(),
            ticker_api_url: server.uri(),
            ..MarketDataConfig::default()
        })
        .unwrap();

        db.save_position(&Position::new("USDC", dec!(15), dec!(1))).await.unwrap();
        let mut weth = Position::new("WETH", dec!(0.01), dec!(2000));
        weth.entry_price = Some(dec!(2000));
        weth.ath_price = Some(dec!(2000));
        db.save_position(&weth).await.unwrap();
        db.save_position(&Position::new("LINK", dec!(0.000000001), dec!(10))).await.unwrap();

        let report = BalanceSync::new(&db, &market, None).sync(&[]).await.unwrap();
        assert_eq!(report.updated, 2);
        assert_eq!(report.removed, vec!["LINK".to_string()]);

        let weth = db.get_position("WETH").await.unwrap().unwrap();
        assert_eq!(weth.price, dec!(2100));
        assert_eq!(weth.ath_price, Some(dec!(2100)));
        assert_eq!(weth.entry_price, Some(dec!(2000)));
        assert!(db.get_position("LINK").await.unwrap().is_none());
        assert_eq!(db.get_position("USDC").await.unwrap().unwrap().price, dec!(1));
    }
}
