//! Order execution for Uniswap V3 swaps (paper or live)
//!
//! Every fill is recorded as one `trades` row plus the matching `balances`
//! changes in a single transaction. Live fills are recorded only after the
//! swap receipt confirms; balances are then read back from chain.

use crate::config::Config;
use crate::db::{BalanceChange, Database};
use crate::exits::{after_partial, ExitReason};
use crate::services::market_data::MarketData;
use crate::services::uniswap::UniswapClient;
use crate::tokens::{self, Token, USDC};
use crate::types::{Position, Side, Trade, DUST_THRESHOLD};
use anyhow::{anyhow, Context, Result};
use chrono::Utc;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Result of an execution attempt
#[derive(Debug, Clone)]
pub enum ExecutionResult {
    Executed(Fill),
    Skipped { reason: String },
}

impl ExecutionResult {
    pub fn is_executed(&self) -> bool {
        matches!(self, ExecutionResult::Executed(_))
    }
}

/// A recorded swap
#[derive(Debug, Clone)]
pub struct Fill {
    pub trade_id: i64,
    pub side: Side,
    pub symbol: String,
    /// Token units bought or sold
    pub quantity: Decimal,
    /// USDC spent (buy) or received (sell)
    pub usdc: Decimal,
    pub price: Decimal,
    pub tx_hash: String,
    /// Realized result of the trade row
    pub pnl: Decimal,
    pub paper: bool,
}

/// Order executor handles placing swaps (paper or real)
pub struct Executor {
    config: Config,
    db: Database,
    market: Arc<MarketData>,
    chain: Option<UniswapClient>,
}

impl Executor {
    /// Build an executor; connects the signing client in live mode
    pub async fn new(config: Config, db: Database, market: Arc<MarketData>) -> Result<Self> {
        let chain = if config.is_live() {
            let key = config
                .private_key
                .as_deref()
                .ok_or_else(|| anyhow!("Private key required for live trading"))?;
            let client = UniswapClient::connect(&config.rpc_url, key, config.chain_id, config.execution.clone())
                .await
                .context("Failed to connect Uniswap client")?;
            Some(client)
        } else {
            None
        };

        Ok(Self {
            config,
            db,
            market,
            chain,
        })
    }

    pub fn is_paper(&self) -> bool {
        self.chain.is_none()
    }

    /// Signing client, present only in live mode
    pub fn chain(&self) -> Option<&UniswapClient> {
        self.chain.as_ref()
    }

    /// Credit the paper wallet with its starting USDC on first run
    pub async fn ensure_paper_wallet(&self) -> Result<()> {
        if !self.is_paper() {
            return Ok(());
        }
        if self.db.get_position(USDC.symbol).await?.is_none() {
            self.db
                .save_position(&Position::new(USDC.symbol, self.config.paper_starting_usdc, Decimal::ONE))
                .await?;
            info!("[PAPER] Wallet funded with {} USDC", self.config.paper_starting_usdc);
        }
        Ok(())
    }

    /// Spend `usdc_amount` on `symbol`
    pub async fn buy(
        &self,
        symbol: &str,
        usdc_amount: Decimal,
        strategy: &str,
        equity_before: Option<Decimal>,
    ) -> Result<ExecutionResult> {
        let token = tokens::require(symbol)?;

        if usdc_amount <= Decimal::ZERO {
            return Ok(ExecutionResult::Skipped {
                reason: "Trade size is zero".to_string(),
            });
        }

        if let Some(existing) = self.db.get_position(token.symbol).await? {
            if existing.entry_price.is_some() && !existing.is_dust() {
                return Ok(ExecutionResult::Skipped {
                    reason: format!("Already holding {}", existing.asset),
                });
            }
        }

        let available = self
            .db
            .get_position(USDC.symbol)
            .await?
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO);
        if available < usdc_amount {
            return Ok(ExecutionResult::Skipped {
                reason: format!("Insufficient USDC: {} < {}", available, usdc_amount),
            });
        }

        match &self.chain {
            None => self.paper_buy(token, usdc_amount, available, strategy, equity_before).await,
            Some(chain) => self.live_buy(chain, token, usdc_amount, strategy, equity_before).await,
        }
    }

    /// Sell `quantity` of a held position
    pub async fn sell(
        &self,
        position: &Position,
        quantity: Decimal,
        reason: ExitReason,
        equity_before: Option<Decimal>,
    ) -> Result<ExecutionResult> {
        let token = tokens::require(&position.asset)?;
        let quantity = quantity.min(position.amount);

        if quantity < DUST_THRESHOLD {
            return Ok(ExecutionResult::Skipped {
                reason: format!("Sell quantity for {} is dust", token.symbol),
            });
        }

        match &self.chain {
            None => self.paper_sell(token, position, quantity, reason, equity_before).await,
            Some(chain) => self.live_sell(chain, token, position, quantity, reason, equity_before).await,
        }
    }

    /// Paper trade execution (simulation at the ticker price)
    async fn paper_buy(
        &self,
        token: &Token,
        usdc_amount: Decimal,
        usdc_available: Decimal,
        strategy: &str,
        equity_before: Option<Decimal>,
    ) -> Result<ExecutionResult> {
        let price = self.market.get_price_decimal(token.symbol).await;
        if price <= Decimal::ZERO {
            return Ok(ExecutionResult::Skipped {
                reason: format!("No price for {}", token.symbol),
            });
        }

        let quantity = (usdc_amount / price).round_dp(token.decimals as u32);
        let tx_hash = format!("paper-{}", Uuid::new_v4());

        let mut position = Position::new(token.symbol, quantity, price);
        position.entry_price = Some(price);
        position.ath_price = Some(price);

        let trade = Trade {
            id: None,
            timestamp: Utc::now().timestamp(),
            pair: token.pair_label(),
            side: Side::Buy,
            amount_in: usdc_amount,
            amount_out: quantity * price,
            quantity,
            price,
            tx_hash: tx_hash.clone(),
            strategy: Some(strategy.to_string()),
            equity_before,
            equity_after: equity_before.map(|e| e + quantity * price - usdc_amount),
        };

        let changes = [
            BalanceChange::Upsert(position),
            BalanceChange::Upsert(Position::new(USDC.symbol, usdc_available - usdc_amount, Decimal::ONE)),
        ];
        let trade_id = self.db.record_fill(&trade, &changes).await?;

        info!(
            "[PAPER] BUY {} {} at {} for ${}",
            quantity, token.symbol, price, usdc_amount
        );

        Ok(ExecutionResult::Executed(Fill {
            trade_id,
            side: Side::Buy,
            symbol: token.symbol.to_string(),
            quantity,
            usdc: usdc_amount,
            price,
            tx_hash,
            pnl: trade.pnl(),
            paper: true,
        }))
    }

    async fn paper_sell(
        &self,
        token: &Token,
        position: &Position,
        quantity: Decimal,
        reason: ExitReason,
        equity_before: Option<Decimal>,
    ) -> Result<ExecutionResult> {
        let price = self.market.get_price_decimal(token.symbol).await;
        if price <= Decimal::ZERO {
            return Ok(ExecutionResult::Skipped {
                reason: format!("No price for {}", token.symbol),
            });
        }

        let proceeds = (quantity * price).round_dp(USDC.decimals as u32);
        let usdc_before = self
            .db
            .get_position(USDC.symbol)
            .await?
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO);

        let tx_hash = format!("paper-{}", Uuid::new_v4());
        let trade = self.sell_trade(token, position, quantity, proceeds, price, &tx_hash, reason, equity_before);

        let remaining = after_partial(position, quantity, reason, price);
        let mut changes = vec![BalanceChange::Upsert(Position::new(
            USDC.symbol,
            usdc_before + proceeds,
            Decimal::ONE,
        ))];
        changes.push(if remaining.is_dust() {
            BalanceChange::Remove(token.symbol.to_string())
        } else {
            BalanceChange::Upsert(remaining)
        });

        let trade_id = self.db.record_fill(&trade, &changes).await?;

        info!(
            "[PAPER] SELL {} {} at {} for ${} ({}) pnl {:.4}",
            quantity,
            token.symbol,
            price,
            proceeds,
            reason,
            trade.pnl()
        );

        Ok(ExecutionResult::Executed(Fill {
            trade_id,
            side: Side::Sell,
            symbol: token.symbol.to_string(),
            quantity,
            usdc: proceeds,
            price,
            tx_hash,
            pnl: trade.pnl(),
            paper: true,
        }))
    }

    /// Live swap execution via the Uniswap router
    async fn live_buy(
        &self,
        chain: &UniswapClient,
        token: &Token,
        usdc_amount: Decimal,
        strategy: &str,
        equity_before: Option<Decimal>,
    ) -> Result<ExecutionResult> {
        info!("[LIVE] BUY {} for ${}", token.symbol, usdc_amount);

        let receipt = chain.swap(&USDC, token, usdc_amount).await?;
        if receipt.amount_out <= Decimal::ZERO {
            warn!("[LIVE] Swap {} confirmed but no {} received", receipt.tx_hash, token.symbol);
        }

        let quantity = receipt.amount_out;
        let price = if quantity > Decimal::ZERO {
            receipt.amount_in / quantity
        } else {
            Decimal::ZERO
        };

        let token_balance = chain.token_balance(token).await?;
        let usdc_balance = chain.token_balance(&USDC).await?;

        let mut position = Position::new(token.symbol, token_balance, price);
        position.entry_price = Some(price);
        position.ath_price = Some(price);

        let trade = Trade {
            id: None,
            timestamp: Utc::now().timestamp(),
            pair: token.pair_label(),
            side: Side::Buy,
            amount_in: receipt.amount_in,
            amount_out: quantity * price,
            quantity,
            price,
            tx_hash: receipt.tx_hash.clone(),
            strategy: Some(strategy.to_string()),
            equity_before,
            equity_after: equity_before.map(|e| e + quantity * price - receipt.amount_in),
        };

        let changes = [
            BalanceChange::Upsert(position),
            BalanceChange::Upsert(Position::new(USDC.symbol, usdc_balance, Decimal::ONE)),
        ];
        let trade_id = self.db.record_fill(&trade, &changes).await?;

        info!(
            "[LIVE] Bought {} {} at {} (tx {}, gas {})",
            quantity, token.symbol, price, receipt.tx_hash, receipt.gas_used
        );

        Ok(ExecutionResult::Executed(Fill {
            trade_id,
            side: Side::Buy,
            symbol: token.symbol.to_string(),
            quantity,
            usdc: receipt.amount_in,
            price,
            pnl: trade.pnl(),
            tx_hash: receipt.tx_hash,
            paper: false,
        }))
    }

    async fn live_sell(
        &self,
        chain: &UniswapClient,
        token: &Token,
        position: &Position,
        quantity: Decimal,
        reason: ExitReason,
        equity_before: Option<Decimal>,
    ) -> Result<ExecutionResult> {
        info!("[LIVE] SELL {} {} ({})", quantity, token.symbol, reason);

        let receipt = chain.swap(token, &USDC, quantity).await?;
        let proceeds = receipt.amount_out;
        let sold = receipt.amount_in;
        let price = if sold > Decimal::ZERO { proceeds / sold } else { position.price };

        let trade = self.sell_trade(token, position, sold, proceeds, price, &receipt.tx_hash, reason, equity_before);

        let token_balance = chain.token_balance(token).await?;
        let usdc_balance = chain.token_balance(&USDC).await?;

        let mut remaining = after_partial(position, sold, reason, price);
        remaining.amount = token_balance;

        let changes = [
            BalanceChange::Upsert(Position::new(USDC.symbol, usdc_balance, Decimal::ONE)),
            if remaining.is_dust() {
                BalanceChange::Remove(token.symbol.to_string())
            } else {
                BalanceChange::Upsert(remaining)
            },
        ];
        let trade_id = self.db.record_fill(&trade, &changes).await?;

        info!(
            "[LIVE] Sold {} {} for ${} (tx {}) pnl {:.4}",
            sold,
            token.symbol,
            proceeds,
            receipt.tx_hash,
            trade.pnl()
        );

        Ok(ExecutionResult::Executed(Fill {
            trade_id,
            side: Side::Sell,
            symbol: token.symbol.to_string(),
            quantity: sold,
            usdc: proceeds,
            price,
            pnl: trade.pnl(),
            tx_hash: receipt.tx_hash,
            paper: false,
        }))
    }

    /// Sell row with the cost basis of the sold quantity as `amount_in`
    #[allow(clippy::too_many_arguments)]
    fn sell_trade(
        &self,
        token: &Token,
        position: &Position,
        quantity: Decimal,
        proceeds: Decimal,
        price: Decimal,
        tx_hash: &str,
        reason: ExitReason,
        equity_before: Option<Decimal>,
    ) -> Trade {
        let entry = position.entry_price.unwrap_or(price);
        let cost_basis = (quantity * entry).round_dp(USDC.decimals as u32);
        Trade {
            id: None,
            timestamp: Utc::now().timestamp(),
            pair: token.pair_label(),
            side: Side::Sell,
            amount_in: cost_basis,
            amount_out: proceeds,
            quantity,
            price,
            tx_hash: tx_hash.to_string(),
            strategy: Some(reason.to_string()),
            equity_before,
            equity_after: equity_before.map(|e| e + proceeds - quantity * position.price),
        }
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

    async fn paper_executor(server: &MockServer) -> (tempfile::TempDir, Database, Executor) {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::new(dir.path().join("exec.db").to_str().unwrap()).await.unwrap();
        let market = MarketData::new(MarketDataConfig {
            candle_api_url: server.uri(),
            ticker_api_url: server.uri(),
            ..MarketDataConfig::default()
        })
        .unwrap();
        let executor = Executor::new(Config::default(), db.clone(), Arc::new(market)).await.unwrap();
        executor.ensure_paper_wallet().await.unwrap();
        (dir, db, executor)
    }

    async fn mount_price(server: &MockServer, pair: &str, price: &str) {
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", pair))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"symbol": pair, "price": price})))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_paper_buy_then_partial_and_full_sell() {
        let server = MockServer::start().await;
        mount_price(&server, "ETHUSDT", "2000").await;
        let (_dir, db, executor) = paper_executor(&server).await;

        let result = executor.buy("WETH", dec!(2), "trend_follow", Some(dec!(20))).await.unwrap();
        let ExecutionResult::Executed(fill) = result else {
            panic!("expected a fill");
        };
        assert_eq!(fill.quantity, dec!(0.001));
        assert!(fill.tx_hash.starts_with("paper-"));

        let usdc = db.get_position("USDC").await.unwrap().unwrap();
        assert_eq!(usdc.amount, dec!(18));
        let weth = db.get_position("WETH").await.unwrap().unwrap();
        assert_eq!(weth.entry_price, Some(dec!(2000)));

        // second buy of a held symbol is skipped
        let again = executor.buy("WETH", dec!(2), "trend_follow", None).await.unwrap();
        assert!(!again.is_executed());

        let partial = executor
            .sell(&weth, dec!(0.0003), ExitReason::TakeProfit1, None)
            .await
            .unwrap();
        assert!(partial.is_executed());
        let weth = db.get_position("WETH").await.unwrap().unwrap();
        assert_eq!(weth.amount, dec!(0.0007));
        assert!(weth.tp1_hit);
        assert_eq!(weth.entry_price, Some(dec!(2000)));

        executor.sell(&weth, weth.amount, ExitReason::StopLoss, None).await.unwrap();
        assert!(db.get_position("WETH").await.unwrap().is_none());
        assert_eq!(db.get_position("USDC").await.unwrap().unwrap().amount, dec!(20));

        let trades = db.recent_trades(10).await.unwrap();
        assert_eq!(trades.len(), 3);
        assert!(trades.iter().all(|t| t.pnl() == Decimal::ZERO));
    }

    #[tokio::test]
    async fn test_buy_skips_without_funds_or_price() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":-1121}"))
            .mount(&server)
            .await;
        let (_dir, _db, executor) = paper_executor(&server).await;

        let too_big = executor.buy("WETH", dec!(500), "trend_follow", None).await.unwrap();
        assert!(matches!(too_big, ExecutionResult::Skipped { .. }));

        let no_price = executor.buy("LINK", dec!(2), "trend_follow", None).await.unwrap();
        assert!(matches!(no_price, ExecutionResult::Skipped { .. }));

        assert!(executor.buy("DOGE", dec!(2), "trend_follow", None).await.is_err());
    }
}
