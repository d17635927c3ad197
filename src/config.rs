//! Configuration management for the Polygon trading bot

use crate::risk::DailyLossLimit;
use crate::types::Timeframe;
use anyhow::{Context, Result};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use std::env;
use std::str::FromStr;

/// Bot configuration loaded from environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Private key for signing swaps (only required for live trading)
    pub private_key: Option<String>,

    /// Path to SQLite database
    pub database_path: String,

    /// Polygon RPC URL
    pub rpc_url: String,

    pub chain_id: u64,

    /// Whether running in paper trading mode
    pub paper_trading: bool,

    /// USDC credited to a fresh paper wallet
    pub paper_starting_usdc: Decimal,

    /// Entry strategy name (`trend_follow`, `rsi_hook`, `pullback`)
    pub strategy: String,

    /// Seconds between cycles
    pub loop_sleep_seconds: u64,

    /// Seconds to back off after a failed cycle
    pub error_sleep_seconds: u64,

    /// Per-symbol cooldown after a buy, in seconds
    pub trade_cooldown_seconds: i64,

    /// Maximum number of simultaneously held assets
    pub max_positions: usize,

    /// Random pause between buys within one cycle (seconds)
    pub entry_pause_min_seconds: u64,
    pub entry_pause_max_seconds: u64,

    /// Run-state JSON file (cooldowns, daily accumulator)
    pub bot_state_path: String,

    /// Equity series JSON file
    pub snapshots_path: String,

    pub logging: LoggingConfig,
    pub market_data: MarketDataConfig,
    pub scanner: ScannerConfig,
    pub risk: RiskConfig,
    pub exits: ExitConfig,
    pub execution: ExecutionConfig,
}

#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// Activity log file; empty disables file logging
    pub file_path: Option<String>,
    /// Size at which the activity log is rotated
    pub max_bytes: u64,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            file_path: Some("bot_activity.log".to_string()),
            max_bytes: 100_000,
        }
    }
}

#[derive(Debug, Clone)]
pub struct MarketDataConfig {
    /// Base URL of the kline endpoint
    pub candle_api_url: String,
    /// Base URL of the ticker endpoint
    pub ticker_api_url: String,
    /// Quote currency of the proxy pairs on the exchange
    pub quote_suffix: String,
    /// Higher timeframe for the trend filter
    pub htf: Timeframe,
    /// Lower timeframe for the entry filter
    pub ltf: Timeframe,
    pub candle_limit: u32,
    pub request_timeout_seconds: u64,
}

impl Default for MarketDataConfig {
    fn default() -> Self {
        Self {
            candle_api_url: "https://api.binance.com".to_string(),
            ticker_api_url: "https://api.binance.com".to_string(),
            quote_suffix: "USDT".to_string(),
            htf: Timeframe::H4,
            ltf: Timeframe::M15,
            candle_limit: 250,
            request_timeout_seconds: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ScannerConfig {
    /// Uniswap V3 subgraph; when unset the static token registry is the universe
    pub subgraph_url: Option<String>,
    /// Minimum pool TVL in USD
    pub min_tvl_usd: f64,
    /// Minimum pool volume in USD
    pub min_volume_usd: f64,
    /// Number of pools requested from the subgraph
    pub top_pools: u32,
    /// Symbols traded when no subgraph is configured
    pub symbols: Vec<String>,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            subgraph_url: None,
            min_tvl_usd: 5_000_000.0,
            min_volume_usd: 500_000.0,
            top_pools: 25,
            symbols: vec![
                "WETH".to_string(),
                "WBTC".to_string(),
                "WMATIC".to_string(),
                "LINK".to_string(),
                "AAVE".to_string(),
            ],
        }
    }
}

#[derive(Debug, Clone)]
pub struct RiskConfig {
    /// Entries halt once the day's realized PnL reaches this limit
    pub daily_loss_limit: DailyLossLimit,
    /// Entries halt once the day's realized PnL reaches this fraction of baseline
    pub daily_profit_lock: Option<Decimal>,
    /// Drawdown from the equity high that liquidates everything
    pub trailing_stop_pct: Decimal,
    /// Entry pause after a trailing-stop liquidation (seconds)
    pub trailing_stop_cooldown_seconds: i64,
    /// Growth over baseline that ratchets the baseline up
    pub growth_trigger: Decimal,
    /// Fraction of equity committed per entry
    pub risk_per_trade: Decimal,
    /// Floor for the entry size in USDC
    pub min_trade_usdc: Decimal,
    /// Minimum spacing between persisted snapshots (seconds)
    pub snapshot_interval_seconds: i64,
    /// Rolling window kept in the equity JSON file (seconds)
    pub snapshot_window_seconds: i64,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            daily_loss_limit: DailyLossLimit::Absolute(dec!(-1.5)),
            daily_profit_lock: None,
            trailing_stop_pct: dec!(0.05),
            trailing_stop_cooldown_seconds: 600,
            growth_trigger: dec!(0.005),
            risk_per_trade: dec!(0.01),
            min_trade_usdc: dec!(1.0),
            snapshot_interval_seconds: 300,
            snapshot_window_seconds: 86_400,
        }
    }
}

/// Take-profit / stop-loss ladder
#[derive(Debug, Clone)]
pub struct ExitConfig {
    pub tp1_pct: Decimal,
    pub tp2_pct: Decimal,
    pub sl_pct: Decimal,
    /// Share of the original position sold at TP1
    pub tp1_ratio: Decimal,
    /// Share of the original position sold at TP2
    pub tp2_ratio: Decimal,
    /// Trailing distance in ATRs after TP2
    pub atr_multiplier: Decimal,
    /// Trailing distance as a fraction of the high when ATR is unavailable
    pub trail_pct: Decimal,
}

impl Default for ExitConfig {
    fn default() -> Self {
        Self {
            tp1_pct: dec!(0.012),
            tp2_pct: dec!(0.025),
            sl_pct: dec!(0.015),
            tp1_ratio: dec!(0.30),
            tp2_ratio: dec!(0.40),
            atr_multiplier: dec!(1.2),
            trail_pct: dec!(0.015),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ExecutionConfig {
    /// Slippage tolerance applied to the quote (0.003 = 0.3%)
    pub slippage: Decimal,
    pub deadline_seconds: u64,
    /// Multiplier on the node's gas estimate
    pub gas_limit_multiplier: f64,
    pub swap_gas_fallback: u64,
    pub approve_gas_fallback: u64,
    /// max_fee = base_fee * multiplier + tip
    pub base_fee_multiplier: u128,
    pub priority_tip_gwei: u128,
    /// Approve the max uint instead of the swap amount
    pub approve_max: bool,
    /// Tokens that require resetting the allowance to zero first
    pub zero_approve_tokens: Vec<String>,
    /// Pause after an approval confirms
    pub approval_settle_seconds: u64,
    pub confirm_timeout_seconds: u64,
    pub confirm_poll_seconds: u64,
    /// sqrtPriceLimit distance from the pool price in bps, 0 disables
    pub price_limit_bps: u32,
    /// Fee tiers tried by the quoter, in hundredths of a bip
    pub fee_tiers: Vec<u32>,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            slippage: dec!(0.003),
            deadline_seconds: 300,
            gas_limit_multiplier: 1.2,
            swap_gas_fallback: 350_000,
            approve_gas_fallback: 100_000,
            base_fee_multiplier: 2,
            priority_tip_gwei: 40,
            approve_max: false,
            zero_approve_tokens: Vec::new(),
            approval_settle_seconds: 10,
            confirm_timeout_seconds: 120,
            confirm_poll_seconds: 2,
            price_limit_bps: 0,
            fee_tiers: vec![500, 3000, 10000],
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            private_key: None,
            database_path: "trader.db".to_string(),
            rpc_url: "https://polygon-rpc.com".to_string(),
            chain_id: 137,
            paper_trading: true,
            paper_starting_usdc: dec!(20),
            strategy: "trend_follow".to_string(),
            loop_sleep_seconds: 300,
            error_sleep_seconds: 30,
            trade_cooldown_seconds: 1800,
            max_positions: 2,
            entry_pause_min_seconds: 5,
            entry_pause_max_seconds: 25,
            bot_state_path: "bot_state.json".to_string(),
            snapshots_path: "portfolio_snapshots.json".to_string(),
            logging: LoggingConfig::default(),
            market_data: MarketDataConfig::default(),
            scanner: ScannerConfig::default(),
            risk: RiskConfig::default(),
            exits: ExitConfig::default(),
            execution: ExecutionConfig::default(),
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn env_decimal(key: &str, default: Decimal) -> Decimal {
    env::var(key)
        .ok()
        .and_then(|v| Decimal::from_str(v.trim()).ok())
        .unwrap_or(default)
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().filter(|s| !s.trim().is_empty()).map(|v| {
        v.split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect()
    })
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let defaults = Config::default();

        let private_key = env::var("PRIVATE_KEY").ok().filter(|s| !s.is_empty());

        let paper_trading = env::var("PAPER_TRADING")
            .map(|v| v.to_lowercase() == "true")
            .unwrap_or(true); // Default to paper trading for safety

        let logging = LoggingConfig {
            file_path: match env::var("LOG_FILE") {
                Ok(v) if v.trim().is_empty() => None,
                Ok(v) => Some(v),
                Err(_) => defaults.logging.file_path.clone(),
            },
            max_bytes: env_parse("LOG_MAX_BYTES", defaults.logging.max_bytes),
        };

        let md = &defaults.market_data;
        let market_data = MarketDataConfig {
            candle_api_url: env::var("CANDLE_API_URL").unwrap_or_else(|_| md.candle_api_url.clone()),
            ticker_api_url: env::var("TICKER_API_URL").unwrap_or_else(|_| md.ticker_api_url.clone()),
            quote_suffix: env::var("CANDLE_QUOTE_SUFFIX").unwrap_or_else(|_| md.quote_suffix.clone()),
            htf: match env::var("HTF") {
                Ok(v) => v.parse().context("Invalid HTF timeframe")?,
                Err(_) => md.htf,
            },
            ltf: match env::var("LTF") {
                Ok(v) => v.parse().context("Invalid LTF timeframe")?,
                Err(_) => md.ltf,
            },
            candle_limit: env_parse("CANDLE_LIMIT", md.candle_limit),
            request_timeout_seconds: env_parse("REQUEST_TIMEOUT_SECONDS", md.request_timeout_seconds),
        };

        let sc = &defaults.scanner;
        let scanner = ScannerConfig {
            subgraph_url: env::var("SUBGRAPH_URL").ok().filter(|s| !s.is_empty()),
            min_tvl_usd: env_parse("MIN_TVL", sc.min_tvl_usd),
            min_volume_usd: env_parse("MIN_VOLUME", sc.min_volume_usd),
            top_pools: env_parse("TOP_POOLS", sc.top_pools),
            symbols: env_list("TRADE_SYMBOLS").unwrap_or_else(|| sc.symbols.clone()),
        };

        let rk = &defaults.risk;
        let daily_loss_limit = match env::var("DAILY_LOSS_MODE")
            .unwrap_or_else(|_| "absolute".to_string())
            .to_lowercase()
            .as_str()
        {
            "absolute" => DailyLossLimit::Absolute(env_decimal("MAX_DAILY_LOSS", dec!(-1.5))),
            "percent" => DailyLossLimit::PercentOfBaseline(env_decimal("MAX_DAILY_LOSS", dec!(-0.01))),
            other => anyhow::bail!("DAILY_LOSS_MODE must be 'absolute' or 'percent', got '{}'", other),
        };
        let risk = RiskConfig {
            daily_loss_limit,
            daily_profit_lock: env::var("DAILY_PROFIT_LOCK")
                .ok()
                .and_then(|v| Decimal::from_str(v.trim()).ok()),
            trailing_stop_pct: env_decimal("TRAILING_STOP_PCT", rk.trailing_stop_pct),
            trailing_stop_cooldown_seconds: env_parse(
                "TRAILING_STOP_COOLDOWN_SECONDS",
                rk.trailing_stop_cooldown_seconds,
            ),
            growth_trigger: env_decimal("GROWTH_TRIGGER", rk.growth_trigger),
            risk_per_trade: env_decimal("RISK_PER_TRADE", rk.risk_per_trade),
            min_trade_usdc: env_decimal("MIN_TRADE_USDC", rk.min_trade_usdc),
            snapshot_interval_seconds: env_parse("SNAPSHOT_INTERVAL_SECONDS", rk.snapshot_interval_seconds),
            snapshot_window_seconds: rk.snapshot_window_seconds,
        };

        let ex = &defaults.exits;
        let exits = ExitConfig {
            tp1_pct: env_decimal("TP1_PCT", ex.tp1_pct),
            tp2_pct: env_decimal("TP2_PCT", ex.tp2_pct),
            sl_pct: env_decimal("SL_PCT", ex.sl_pct),
            tp1_ratio: env_decimal("TP1_SELL_RATIO", ex.tp1_ratio),
            tp2_ratio: env_decimal("TP2_SELL_RATIO", ex.tp2_ratio),
            atr_multiplier: env_decimal("ATR_TRAIL_MULTIPLIER", ex.atr_multiplier),
            trail_pct: env_decimal("TRAIL_PCT", ex.trail_pct),
        };

        let ec = &defaults.execution;
        let execution = ExecutionConfig {
            slippage: env_decimal("SLIPPAGE", ec.slippage),
            deadline_seconds: env_parse("SWAP_DEADLINE_SECONDS", ec.deadline_seconds),
            gas_limit_multiplier: env_parse("GAS_LIMIT_MULTIPLIER", ec.gas_limit_multiplier),
            swap_gas_fallback: env_parse("SWAP_GAS_FALLBACK", ec.swap_gas_fallback),
            approve_gas_fallback: env_parse("APPROVE_GAS_FALLBACK", ec.approve_gas_fallback),
            base_fee_multiplier: env_parse("BASE_FEE_MULTIPLIER", ec.base_fee_multiplier),
            priority_tip_gwei: env_parse("PRIORITY_TIP_GWEI", ec.priority_tip_gwei),
            approve_max: env::var("APPROVE_MAX")
                .map(|v| v.to_lowercase() == "true")
                .unwrap_or(ec.approve_max),
            zero_approve_tokens: env_list("ZERO_APPROVE_TOKENS").unwrap_or_default(),
            approval_settle_seconds: env_parse("APPROVAL_SETTLE_SECONDS", ec.approval_settle_seconds),
            confirm_timeout_seconds: env_parse("CONFIRM_TIMEOUT_SECONDS", ec.confirm_timeout_seconds),
            confirm_poll_seconds: ec.confirm_poll_seconds,
            price_limit_bps: env_parse("PRICE_LIMIT_BPS", ec.price_limit_bps),
            fee_tiers: ec.fee_tiers.clone(),
        };

        let config = Self {
            private_key,
            database_path: env::var("DATABASE_PATH").unwrap_or(defaults.database_path),
            rpc_url: env::var("RPC_URL").unwrap_or(defaults.rpc_url),
            chain_id: env_parse("CHAIN_ID", defaults.chain_id),
            paper_trading,
            paper_starting_usdc: env_decimal("PAPER_STARTING_USDC", defaults.paper_starting_usdc),
            strategy: env::var("STRATEGY").unwrap_or(defaults.strategy).to_lowercase(),
            loop_sleep_seconds: env_parse("LOOP_SLEEP", defaults.loop_sleep_seconds),
            error_sleep_seconds: env_parse("ERROR_SLEEP", defaults.error_sleep_seconds),
            trade_cooldown_seconds: env_parse("TRADE_COOLDOWN_SECONDS", defaults.trade_cooldown_seconds),
            max_positions: env_parse("MAX_POSITIONS", defaults.max_positions),
            entry_pause_min_seconds: env_parse("ENTRY_PAUSE_MIN", defaults.entry_pause_min_seconds),
            entry_pause_max_seconds: env_parse("ENTRY_PAUSE_MAX", defaults.entry_pause_max_seconds),
            bot_state_path: env::var("BOT_STATE_PATH").unwrap_or(defaults.bot_state_path),
            snapshots_path: env::var("SNAPSHOTS_PATH").unwrap_or(defaults.snapshots_path),
            logging,
            market_data,
            scanner,
            risk,
            exits,
            execution,
        };

        config.validate()?;
        Ok(config)
    }

    /// Reject combinations that would trade unsafely
    pub fn validate(&self) -> Result<()> {
        if !self.paper_trading && self.private_key.is_none() {
            anyhow::bail!("PRIVATE_KEY required for live trading");
        }
        if self.execution.slippage < Decimal::ZERO || self.execution.slippage >= dec!(0.5) {
            anyhow::bail!("SLIPPAGE must be in [0, 0.5), got {}", self.execution.slippage);
        }
        if self.exits.tp1_pct >= self.exits.tp2_pct {
            anyhow::bail!("TP1_PCT must be below TP2_PCT");
        }
        if self.exits.tp1_ratio + self.exits.tp2_ratio >= Decimal::ONE {
            anyhow::bail!("TP1_SELL_RATIO + TP2_SELL_RATIO must leave a runner below 1.0");
        }
        if self.entry_pause_min_seconds > self.entry_pause_max_seconds {
            anyhow::bail!("ENTRY_PAUSE_MIN must not exceed ENTRY_PAUSE_MAX");
        }
        if self.max_positions == 0 {
            anyhow::bail!("MAX_POSITIONS must be at least 1");
        }
        Ok(())
    }

    /// Check if live trading is enabled
    pub fn is_live(&self) -> bool {
        !self.paper_trading && self.private_key.is_some()
    }
}
