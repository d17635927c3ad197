//! External service adapters: market data, chain access and balance sync

pub mod balance_sync;
pub mod errors;
pub mod market_data;
pub mod retry;
pub mod uniswap;

pub use balance_sync::{BalanceSync, SyncReport};
pub use errors::{ExecutionError, MarketDataError};
pub use market_data::MarketData;
pub use retry::{with_retry, RetryConfig};
pub use uniswap::UniswapClient;
