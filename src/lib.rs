//! Polygon Trader Library
//!
//! A single-wallet spot trading bot for Uniswap V3 on Polygon:
//!
//! 1. **Signals**: EMA/RSI trend and entry filters on exchange candles
//!    (4h trend, 15m entry).
//!
//! 2. **Risk**: daily loss kill switch, portfolio trailing stop, baseline
//!    growth lock and per-trade sizing from portfolio value.
//!
//! 3. **Execution**: `exactInputSingle` swaps through the Uniswap V3 router,
//!    or simulated fills in paper mode.

pub mod baseline;
pub mod bot;
pub mod config;
pub mod db;
pub mod executor;
pub mod exits;
pub mod indicators;
pub mod logging;
pub mod portfolio;
pub mod risk;
pub mod scanner;
pub mod services;
pub mod state;
pub mod strategies;
pub mod tokens;
pub mod types;

pub use bot::{Bot, CycleReport, EntryOutcome};
pub use config::Config;
pub use db::Database;
pub use executor::{ExecutionResult, Executor};
pub use logging::init_logging;
pub use scanner::Scanner;
pub use strategies::{Signal, SignalEvaluator, Strategy};
pub use types::{Candle, CandleSeries, Position, Side, Timeframe, Trade};
