//! Trading loop
//!
//! One cycle: sync balances, value the portfolio, snapshot, apply the risk
//! gate, run the portfolio trailing stop, manage exits, then look for entries.

use crate::baseline::{affordable_size, trade_size, BaselineTracker};
use crate::config::Config;
use crate::db::Database;
use crate::executor::{ExecutionResult, Executor};
use crate::exits::{evaluate_exit, ratchet_trail, ExitDecision, ExitReason};
use crate::portfolio::{self, PortfolioValue};
use crate::risk::{HaltReason, RiskGate};
use crate::scanner::{Scanner, TradingPair};
use crate::services::balance_sync::BalanceSync;
use crate::services::market_data::{is_stablecoin, MarketData};
use crate::state::{EquityPoint, EquitySeries, PointKind, RunState, RunStateStore};
use crate::strategies::{Signal, SignalEvaluator};
use crate::tokens::{self, QUOTE_SYMBOL};
use crate::types::Position;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rand::Rng;
use rust_decimal::prelude::*;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// What happened to one candidate pair during the entry pass
#[derive(Debug, Clone, PartialEq)]
pub enum EntryOutcome {
    Bought { usdc: Decimal, quantity: Decimal, price: Decimal },
    NoSignal(String),
    DataUnavailable(String),
    Skipped(String),
    Failed(String),
}

/// A sell made during the exit pass or a liquidation
#[derive(Debug, Clone, PartialEq)]
pub struct ExitAction {
    pub symbol: String,
    pub reason: ExitReason,
    pub quantity: Decimal,
    pub usdc: Decimal,
}

#[derive(Debug, Clone)]
pub struct CycleReport {
    pub timestamp: i64,
    pub equity: Decimal,
    pub daily_pnl: Decimal,
    pub baseline: Decimal,
    pub halt: Option<HaltReason>,
    pub liquidated: bool,
    pub exits: Vec<ExitAction>,
    pub entries: Vec<(String, EntryOutcome)>,
}

impl CycleReport {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            timestamp: now.timestamp(),
            equity: Decimal::ZERO,
            daily_pnl: Decimal::ZERO,
            baseline: Decimal::ZERO,
            halt: None,
            liquidated: false,
            exits: Vec::new(),
            entries: Vec::new(),
        }
    }

    pub fn log(&self) {
        let bought = self
            .entries
            .iter()
            .filter(|(_, o)| matches!(o, EntryOutcome::Bought { .. }))
            .count();
        info!(
            "[Cycle] equity ${:.4} | daily PnL {:.4} | baseline {:.4} | {} exits | {} buys{}{}",
            self.equity,
            self.daily_pnl,
            self.baseline,
            self.exits.len(),
            bought,
            if self.liquidated { " | LIQUIDATED" } else { "" },
            self.halt
                .as_ref()
                .map(|h| format!(" | halted: {}", h))
                .unwrap_or_default()
        );
    }
}

pub struct Bot {
    config: Config,
    db: Database,
    market: Arc<MarketData>,
    executor: Executor,
    evaluator: SignalEvaluator,
    risk: RiskGate,
    baseline: BaselineTracker,
    scanner: Scanner,
    run_state: RunStateStore,
    equity: EquitySeries,
}

impl Bot {
    pub async fn new(config: Config, db: Database) -> Result<Self> {
        let market = Arc::new(MarketData::new(config.market_data.clone())?);
        let executor = Executor::new(config.clone(), db.clone(), market.clone()).await?;
        executor.ensure_paper_wallet().await?;

        let evaluator = SignalEvaluator::from_name(&config.strategy)?;
        let risk = RiskGate::new(db.clone(), config.risk.clone());
        let baseline = BaselineTracker::new(db.clone(), &config.risk);
        let scanner = Scanner::new(config.scanner.clone())?;
        let run_state = RunStateStore::new(&config.bot_state_path);
        let equity = EquitySeries::new(
            &config.snapshots_path,
            config.risk.snapshot_interval_seconds,
            config.risk.snapshot_window_seconds,
        );

        info!(
            "[Bot] Strategy {} | {} mode",
            evaluator.strategy_name(),
            if executor.is_paper() { "PAPER" } else { "LIVE" }
        );

        Ok(Self {
            config,
            db,
            market,
            executor,
            evaluator,
            risk,
            baseline,
            scanner,
            run_state,
            equity,
        })
    }

    pub fn market(&self) -> &MarketData {
        &self.market
    }

    pub fn scanner(&self) -> &Scanner {
        &self.scanner
    }

    /// Run cycles until Ctrl+C
    pub async fn run(&self) -> Result<()> {
        loop {
            let sleep_secs = match self.run_cycle(Utc::now()).await {
                Ok(report) => {
                    report.log();
                    self.config.loop_sleep_seconds
                }
                Err(e) => {
                    error!("[Bot] Cycle failed: {:#}", e);
                    self.config.error_sleep_seconds
                }
            };

            debug!("[Bot] Sleeping {}s", sleep_secs);
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {
                    info!("[Bot] Shutdown requested");
                    break;
                }
                _ = tokio::time::sleep(Duration::from_secs(sleep_secs)) => {}
            }
        }
        Ok(())
    }

    /// Balance sync on its own, for the `sync` command
    pub async fn sync_balances(&self) -> Result<Vec<Position>> {
        let symbols: Vec<String> = self.scanner.static_pairs().iter().map(|p| p.symbol().to_string()).collect();
        BalanceSync::new(&self.db, &self.market, self.executor.chain())
            .sync(&symbols)
            .await?;
        self.db.get_positions().await
    }

    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<CycleReport> {
        let mut report = CycleReport::new(now);
        let mut state = self.run_state.load(now).await;

        let pairs = self.scanner.pairs().await;
        let symbols: Vec<String> = pairs.iter().map(|p| p.symbol().to_string()).collect();

        BalanceSync::new(&self.db, &self.market, self.executor.chain())
            .sync(&symbols)
            .await
            .context("Balance sync failed")?;

        let (positions, value) = self.portfolio().await?;
        report.equity = value.total;
        self.snapshot(&value, now).await?;

        report.daily_pnl = self.risk.refresh_daily_pnl(now).await?;
        report.baseline = match self.baseline.maybe_ratchet(value.total).await? {
            Some(raised) => raised,
            None => self.baseline.get_or_init(value.total).await?,
        };
        report.halt = self.risk.entry_halt(report.daily_pnl, report.baseline, now).await?;
        if let Some(halt) = &report.halt {
            warn!("[Risk] Entries halted: {}", halt);
        }

        if self.risk.check_trailing_stop(value.total).await? {
            report.exits = self.liquidate(&positions, value.total, &mut state, now).await;
            let (_, after) = self.portfolio().await?;
            report.equity = after.total;
            report.liquidated = true;
            self.risk.after_liquidation(after.total, now).await?;
            self.equity
                .append(EquityPoint {
                    ts: now.timestamp(),
                    value: after.total,
                    kind: PointKind::Liquidation,
                })
                .await?;
            self.run_state.save(&state).await?;
            return Ok(report);
        }

        report.exits = self.run_exits(&positions, value.total, &mut state, now).await;

        if report.halt.is_none() {
            report.entries = self.run_entries(&pairs, value.total, &mut state, now).await?;
        }

        self.run_state.save(&state).await?;
        Ok(report)
    }

    async fn portfolio(&self) -> Result<(Vec<Position>, PortfolioValue)> {
        let positions = self.db.get_positions().await?;
        let value = portfolio::value_positions(&positions);
        Ok((positions, value))
    }

    async fn snapshot(&self, value: &PortfolioValue, now: DateTime<Utc>) -> Result<()> {
        let ts = now.timestamp();
        let due = match self.db.last_snapshot_timestamp().await? {
            Some(last) => ts - last >= self.config.risk.snapshot_interval_seconds,
            None => true,
        };
        if due {
            let realized = self.db.realized_pnl_total().await?;
            self.db.record_snapshot(&portfolio::snapshot(value, realized, ts)).await?;
        }

        if let Err(e) = self
            .equity
            .append(EquityPoint {
                ts,
                value: value.total,
                kind: PointKind::Snapshot,
            })
            .await
        {
            warn!("[Bot] Equity series not updated: {:#}", e);
        }
        Ok(())
    }

    /// Sell every non-stable holding
    async fn liquidate(
        &self,
        positions: &[Position],
        equity: Decimal,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> Vec<ExitAction> {
        warn!("[Risk] Liquidating all positions");
        let mut actions = Vec::new();
        for position in positions.iter().filter(|p| !is_stablecoin(&p.asset) && !p.is_dust()) {
            match self
                .executor
                .sell(position, position.amount, ExitReason::Liquidation, Some(equity))
                .await
            {
                Ok(ExecutionResult::Executed(fill)) => {
                    state.record_trade(&fill.symbol, fill.pnl, now.timestamp());
                    actions.push(ExitAction {
                        symbol: fill.symbol,
                        reason: ExitReason::Liquidation,
                        quantity: fill.quantity,
                        usdc: fill.usdc,
                    });
                }
                Ok(ExecutionResult::Skipped { reason }) => {
                    warn!("[Risk] Liquidation of {} skipped: {}", position.asset, reason)
                }
                Err(e) => error!("[Risk] Liquidation of {} failed: {:#}", position.asset, e),
            }
        }
        actions
    }

    async fn run_exits(
        &self,
        positions: &[Position],
        equity: Decimal,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> Vec<ExitAction> {
        let mut actions = Vec::new();
        for position in portfolio::open_positions(positions) {
            match self.manage_position(position, equity).await {
                Ok(Some(action)) => {
                    state.record_trade(&action.0.symbol, action.1, now.timestamp());
                    actions.push(action.0);
                }
                Ok(None) => {}
                Err(e) => warn!("[Exit] {} skipped this cycle: {:#}", position.asset, e),
            }
        }
        actions
    }

    async fn manage_position(&self, position: &Position, equity: Decimal) -> Result<Option<(ExitAction, Decimal)>> {
        let price = position.price;
        if price <= Decimal::ZERO {
            debug!("[Exit] No price for {}", position.asset);
            return Ok(None);
        }

        let md = &self.config.market_data;
        let atr = if position.tp2_hit {
            match self.market.load_candles(&position.asset, md.ltf, md.candle_limit).await {
                Ok(series) => SignalEvaluator::latest_atr(&series).and_then(Decimal::from_f64),
                Err(e) => {
                    warn!("[Exit] No {} candles for {}, trailing by percentage: {}", md.ltf, position.asset, e);
                    None
                }
            }
        } else {
            None
        };

        let mut position = position.clone();
        if position.tp2_hit {
            let stop = ratchet_trail(&position, price, atr, &self.config.exits);
            if position.trail_stop != Some(stop) {
                debug!("[Exit] {} trail stop -> {}", position.asset, stop);
                position.trail_stop = Some(stop);
                self.db.save_position(&position).await?;
            }
        }
        let position = &position;

        let (quantity, reason) = match evaluate_exit(position, price, atr, &self.config.exits) {
            ExitDecision::Hold => return Ok(None),
            ExitDecision::SellAll { reason } => (position.amount, reason),
            ExitDecision::SellPartial { fraction, reason } => {
                let decimals = tokens::require(&position.asset)?.decimals as u32;
                let qty = (position.amount * fraction).round_dp_with_strategy(decimals, RoundingStrategy::ToZero);
                (qty, reason)
            }
        };

        info!("[Exit] {} {} at {} (qty {})", position.asset, reason, price, quantity);
        match self.executor.sell(position, quantity, reason, Some(equity)).await? {
            ExecutionResult::Executed(fill) => Ok(Some((
                ExitAction {
                    symbol: fill.symbol,
                    reason,
                    quantity: fill.quantity,
                    usdc: fill.usdc,
                },
                fill.pnl,
            ))),
            ExecutionResult::Skipped { reason } => {
                debug!("[Exit] {} not sold: {}", position.asset, reason);
                Ok(None)
            }
        }
    }

    async fn run_entries(
        &self,
        pairs: &[TradingPair],
        equity: Decimal,
        state: &mut RunState,
        now: DateTime<Utc>,
    ) -> Result<Vec<(String, EntryOutcome)>> {
        let positions = self.db.get_positions().await?;
        let mut open = portfolio::open_positions(&positions).len();
        let mut usdc_available = positions
            .iter()
            .find(|p| p.asset == QUOTE_SYMBOL)
            .map(|p| p.amount)
            .unwrap_or(Decimal::ZERO);

        let mut outcomes = Vec::with_capacity(pairs.len());
        for (i, pair) in pairs.iter().enumerate() {
            let symbol = pair.symbol();
            let held = positions
                .iter()
                .any(|p| p.asset == symbol && p.entry_price.is_some() && !p.is_dust());

            let outcome = if state.on_cooldown(symbol, now.timestamp(), self.config.trade_cooldown_seconds) {
                EntryOutcome::Skipped("cooldown".to_string())
            } else if held {
                EntryOutcome::Skipped("already held".to_string())
            } else if open >= self.config.max_positions {
                EntryOutcome::Skipped(format!("max positions ({}) reached", self.config.max_positions))
            } else {
                let size = affordable_size(
                    trade_size(equity, self.config.risk.risk_per_trade, self.config.risk.min_trade_usdc),
                    usdc_available,
                    self.config.risk.min_trade_usdc,
                );
                self.try_enter(symbol, size, equity).await
            };

            match &outcome {
                EntryOutcome::Bought { usdc, .. } => {
                    info!("[Entry] Bought {} for ${}", symbol, usdc);
                    state.record_trade(symbol, Decimal::ZERO, now.timestamp());
                    open += 1;
                    usdc_available -= *usdc;
                    if i + 1 < pairs.len() {
                        self.entry_pause().await;
                    }
                }
                EntryOutcome::Failed(reason) => warn!("[Entry] {} failed: {}", symbol, reason),
                other => debug!("[Entry] {}: {:?}", symbol, other),
            }
            outcomes.push((symbol.to_string(), outcome));
        }
        Ok(outcomes)
    }

    async fn try_enter(&self, symbol: &str, size: Decimal, equity: Decimal) -> EntryOutcome {
        let md = &self.config.market_data;
        let htf = match self.market.load_candles(symbol, md.htf, md.candle_limit).await {
            Ok(series) => series,
            Err(e) => return EntryOutcome::DataUnavailable(format!("{}: {}", md.htf, e)),
        };
        let ltf = match self.market.load_candles(symbol, md.ltf, md.candle_limit).await {
            Ok(series) => series,
            Err(e) => return EntryOutcome::DataUnavailable(format!("{}: {}", md.ltf, e)),
        };

        match self.evaluator.evaluate(&htf, &ltf) {
            Signal::Enter => {}
            Signal::NoSignal(reason) => return EntryOutcome::NoSignal(reason),
            Signal::DataUnavailable(reason) => return EntryOutcome::DataUnavailable(reason),
        }

        if size <= Decimal::ZERO {
            return EntryOutcome::Skipped("insufficient USDC for minimum trade".to_string());
        }

        match self
            .executor
            .buy(symbol, size, self.evaluator.strategy_name(), Some(equity))
            .await
        {
            Ok(ExecutionResult::Executed(fill)) => EntryOutcome::Bought {
                usdc: fill.usdc,
                quantity: fill.quantity,
                price: fill.price,
            },
            Ok(ExecutionResult::Skipped { reason }) => EntryOutcome::Skipped(reason),
            Err(e) => EntryOutcome::Failed(format!("{:#}", e)),
        }
    }

    async fn entry_pause(&self) {
        let (min, max) = (self.config.entry_pause_min_seconds, self.config.entry_pause_max_seconds);
        if max == 0 {
            return;
        }
        let secs = rand::thread_rng().gen_range(min..=max);
        debug!("[Entry] Pausing {}s", secs);
        tokio::time::sleep(Duration::from_secs(secs)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ScannerConfig;
    use crate::strategies::test_series::uptrend;
    use rust_decimal_macros::dec;
    use serde_json::json;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn kline_rows(closes: &[f64]) -> serde_json::Value {
        let rows: Vec<_> = closes
            .iter()
            .enumerate()
            .map(|(i, c)| {
                json!([
                    1_700_000_000_000i64 + i as i64 * 900_000,
                    c.to_string(),
                    (c + 0.5).to_string(),
                    (c - 0.5).to_string(),
                    c.to_string(),
                    "100"
                ])
            })
            .collect();
        json!(rows)
    }

    async fn paper_bot(server: &MockServer, dir: &tempfile::TempDir) -> (Bot, Database) {
        let mut config = Config::default();
        config.database_path = dir.path().join("trader.db").to_string_lossy().to_string();
        config.bot_state_path = dir.path().join("bot_state.json").to_string_lossy().to_string();
        config.snapshots_path = dir.path().join("portfolio_snapshots.json").to_string_lossy().to_string();
        config.entry_pause_min_seconds = 0;
        config.entry_pause_max_seconds = 0;
        config.market_data.candle_api_url = server.uri();
        config.market_data.ticker_api_url = server.uri();
        config.scanner = ScannerConfig {
            symbols: vec!["WETH".into(), "LINK".into()],
            ..ScannerConfig::default()
        };

        let db = Database::new(&config.database_path).await.unwrap();
        let bot = Bot::new(config, db.clone()).await.unwrap();
        (bot, db)
    }

    async fn mount_market(server: &MockServer) {
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(kline_rows(&uptrend(250))))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"symbol": "ETHUSDT", "price": "1000"})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("symbol", "LINKUSDT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":-1121,\"msg\":\"Invalid symbol.\"}"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_paper_cycle_buys_on_signal() {
        let server = MockServer::start().await;
        mount_market(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let (bot, db) = paper_bot(&server, &dir).await;

        let now = Utc::now();
        let report = bot.run_cycle(now).await.unwrap();

        assert_eq!(report.equity, dec!(20));
        assert!(report.halt.is_none());
        assert!(!report.liquidated);
        assert_eq!(report.entries.len(), 2);
        assert_eq!(
            report.entries[0],
            (
                "WETH".to_string(),
                EntryOutcome::Bought {
                    usdc: dec!(1.00),
                    quantity: dec!(0.001),
                    price: dec!(1000)
                }
            )
        );
        assert!(matches!(report.entries[1].1, EntryOutcome::DataUnavailable(_)));

        let weth = db.get_position("WETH").await.unwrap().unwrap();
        assert_eq!(weth.entry_price, Some(dec!(1000)));
        assert_eq!(db.get_position("USDC").await.unwrap().unwrap().amount, dec!(19));
        assert_eq!(db.snapshots_since(0).await.unwrap().len(), 1);

        // the next cycle holds WETH and respects the cooldown
        let second = bot.run_cycle(now + chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(second.entries[0].1, EntryOutcome::Skipped("cooldown".to_string()));
        assert!(second.exits.is_empty());
        assert_eq!(db.recent_trades(10).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_kill_switch_blocks_entries() {
        let server = MockServer::start().await;
        mount_market(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let (bot, db) = paper_bot(&server, &dir).await;

        // a losing sell earlier today
        db.record_trade(&crate::types::Trade {
            id: None,
            timestamp: Utc::now().timestamp(),
            pair: "WETH/USDC".to_string(),
            side: crate::types::Side::Sell,
            amount_in: dec!(5),
            amount_out: dec!(3),
            quantity: dec!(0.003),
            price: dec!(1000),
            tx_hash: "paper-loss".to_string(),
            strategy: None,
            equity_before: None,
            equity_after: None,
        })
        .await
        .unwrap();

        let report = bot.run_cycle(Utc::now()).await.unwrap();
        assert_eq!(report.daily_pnl, dec!(-2));
        assert!(matches!(report.halt, Some(HaltReason::DailyLoss { .. })));
        assert!(report.entries.is_empty());
        assert!(db.get_position("WETH").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_trailing_stop_liquidates() {
        let server = MockServer::start().await;
        mount_market(&server).await;
        let dir = tempfile::tempdir().unwrap();
        let (bot, db) = paper_bot(&server, &dir).await;

        let mut weth = Position::new("WETH", dec!(0.01), dec!(1000));
        weth.entry_price = Some(dec!(1000));
        db.save_position(&weth).await.unwrap();
        // equity is 30; a high of 40 puts it 25% down
        db.set_meta_decimal(crate::db::meta_keys::PORTFOLIO_ATH, dec!(40)).await.unwrap();

        let now = Utc::now();
        let report = bot.run_cycle(now).await.unwrap();
        assert!(report.liquidated);
        assert_eq!(report.exits.len(), 1);
        assert_eq!(report.exits[0].reason, ExitReason::Liquidation);
        assert!(db.get_position("WETH").await.unwrap().is_none());
        assert_eq!(report.equity, dec!(30));

        let until = db.get_meta_i64(crate::db::meta_keys::TRAILING_STOP_UNTIL).await.unwrap().unwrap();
        assert_eq!(until, now.timestamp() + 600);

        let next = bot.run_cycle(now + chrono::Duration::seconds(30)).await.unwrap();
        assert!(matches!(next.halt, Some(HaltReason::TrailingCooldown { .. })));
    }

    async fn mount_without_candles(server: &MockServer, eth_price: &str) {
        Mock::given(method("GET"))
            .and(path("/api/v3/klines"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":-1121,\"msg\":\"Invalid symbol.\"}"))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(path("/api/v3/ticker/price"))
            .and(query_param("symbol", "ETHUSDT"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"symbol": "ETHUSDT", "price": eth_price})))
            .mount(server)
            .await;
        Mock::given(method("GET"))
            .and(query_param("symbol", "LINKUSDT"))
            .respond_with(ResponseTemplate::new(400).set_body_string("{\"code\":-1121,\"msg\":\"Invalid symbol.\"}"))
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_runner_trails_without_candles() {
        let server = MockServer::start().await;
        mount_without_candles(&server, "109").await;
        let dir = tempfile::tempdir().unwrap();
        let (bot, db) = paper_bot(&server, &dir).await;

        let mut weth = Position::new("WETH", dec!(1), dec!(109));
        weth.entry_price = Some(dec!(100));
        weth.tp1_hit = true;
        weth.tp2_hit = true;
        weth.ath_price = Some(dec!(110));
        db.save_position(&weth).await.unwrap();

        // percentage trail: 110 * 0.985 = 108.35
        let now = Utc::now();
        let report = bot.run_cycle(now).await.unwrap();
        assert!(report.exits.is_empty());
        let held = db.get_position("WETH").await.unwrap().unwrap();
        assert_eq!(held.trail_stop, Some(dec!(108.35)));

        server.reset().await;
        mount_without_candles(&server, "108").await;

        let report = bot.run_cycle(now + chrono::Duration::seconds(60)).await.unwrap();
        assert_eq!(report.exits.len(), 1);
        assert_eq!(report.exits[0].reason, ExitReason::TrailingStop);
        assert_eq!(report.exits[0].usdc, dec!(108));
        assert!(db.get_position("WETH").await.unwrap().is_none());
    }
}
