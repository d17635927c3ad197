//! Uniswap V3 swap client for Polygon
//!
//! One swap goes QUOTE -> (APPROVE) -> BUILD -> SIGN -> SUBMIT -> CONFIRM:
//! the best fee tier is picked from QuoterV2, the router allowance is topped
//! up if needed, and `exactInputSingle` is sent with a slippage-protected
//! minimum output and EIP-1559 fees. Nonces are tracked locally; a rejected
//! submission either hands its nonce back or, on nonce drift, resyncs from chain.

use super::errors::ExecutionError;
use super::retry::{with_retry, RetryConfig};
use crate::config::ExecutionConfig;
use crate::tokens::Token;
use alloy::eips::BlockNumberOrTag;
use alloy::network::{EthereumWallet, ReceiptResponse};
use alloy::primitives::aliases::{U160, U24};
use alloy::primitives::{Address, TxHash, U256};
use alloy::providers::{DynProvider, Provider, ProviderBuilder};
use alloy::rpc::types::TransactionReceipt;
use alloy::signers::local::PrivateKeySigner;
use alloy::signers::Signer;
use alloy::sol;
use rust_decimal::Decimal;
use rust_decimal::RoundingStrategy;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// SwapRouter (v1) on Polygon
pub const SWAP_ROUTER: &str = "0xE592427A0AEce92De3Edee1F18E0157C05861564";
/// QuoterV2 on Polygon
pub const QUOTER_V2: &str = "0x61fFE014bA17989E743c5F6cB21bF9697530B21e";
/// UniswapV3Factory on Polygon
pub const FACTORY: &str = "0x1F98431c8aD98523631AE4a59f267346ea31F984";

const GWEI: u128 = 1_000_000_000;

/// Fixed-point scale for slippage and price-limit factors
const FACTOR_SCALE: u64 = 1_000_000_000;

sol! {
    #[sol(rpc)]
    contract IERC20 {
        function balanceOf(address account) external view returns (uint256);
        function decimals() external view returns (uint8);
        function allowance(address owner, address spender) external view returns (uint256);
        function approve(address spender, uint256 amount) external returns (bool);
    }

    #[sol(rpc)]
    contract IUniswapV3Factory {
        function getPool(address tokenA, address tokenB, uint24 fee) external view returns (address pool);
    }

    #[sol(rpc)]
    contract IUniswapV3Pool {
        function slot0() external view returns (
            uint160 sqrtPriceX96,
            int24 tick,
            uint16 observationIndex,
            uint16 observationCardinality,
            uint16 observationCardinalityNext,
            uint8 feeProtocol,
            bool unlocked
        );
    }

    #[sol(rpc)]
    contract IQuoterV2 {
        struct QuoteExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint256 amountIn;
            uint24 fee;
            uint160 sqrtPriceLimitX96;
        }

        function quoteExactInputSingle(QuoteExactInputSingleParams memory params) external returns (
            uint256 amountOut,
            uint160 sqrtPriceX96After,
            uint32 initializedTicksCrossed,
            uint256 gasEstimate
        );
    }

    #[sol(rpc)]
    contract ISwapRouter {
        struct ExactInputSingleParams {
            address tokenIn;
            address tokenOut;
            uint24 fee;
            address recipient;
            uint256 deadline;
            uint256 amountIn;
            uint256 amountOutMinimum;
            uint160 sqrtPriceLimitX96;
        }

        function exactInputSingle(ExactInputSingleParams calldata params) external payable returns (uint256 amountOut);
    }
}

// ==================== PURE HELPERS ====================

/// Decimal token amount to base units, truncating dust below one unit
pub fn to_units(amount: Decimal, decimals: u8) -> U256 {
    if amount <= Decimal::ZERO {
        return U256::ZERO;
    }
    let scaled = (amount * Decimal::from(10u64.pow(decimals as u32))).trunc();
    U256::from_str(&scaled.to_string()).unwrap_or(U256::ZERO)
}

/// Base units to a decimal token amount
pub fn from_units(units: U256, decimals: u8) -> Result<Decimal, ExecutionError> {
    let overflow = || ExecutionError::AmountOverflow {
        units: units.to_string(),
        decimals,
    };
    let raw = u128::try_from(units).map_err(|_| overflow())?;
    let raw = i128::try_from(raw).map_err(|_| overflow())?;
    Decimal::try_from_i128_with_scale(raw, decimals as u32)
        .map(|d| d.normalize())
        .map_err(|_| overflow())
}

/// Minimum acceptable output: `quote * (1 - slippage)`
pub fn min_amount_out(quote: U256, slippage: Decimal) -> U256 {
    let keep = (Decimal::ONE - slippage.max(Decimal::ZERO)).max(Decimal::ZERO);
    let factor = (keep * Decimal::from(FACTOR_SCALE))
        .round_dp_with_strategy(0, RoundingStrategy::ToZero)
        .to_string()
        .parse::<u64>()
        .unwrap_or(0);
    quote * U256::from(factor) / U256::from(FACTOR_SCALE)
}

/// Tier with the largest non-zero quote
pub fn select_best_quote(quotes: &[(u32, U256)]) -> Option<(u32, U256)> {
    quotes
        .iter()
        .copied()
        .filter(|(_, out)| !out.is_zero())
        .max_by(|a, b| a.1.cmp(&b.1))
}

/// Gas limit from the node's estimate, or the fallback when estimation failed
pub fn gas_limit(estimate: Option<u64>, multiplier: f64, fallback: u64) -> u64 {
    match estimate {
        Some(gas) if gas > 0 => (gas as f64 * multiplier).ceil() as u64,
        _ => fallback,
    }
}

/// EIP-1559 fee pair `(max_fee_per_gas, max_priority_fee_per_gas)` in wei
pub fn fee_params(base_fee: u128, base_fee_multiplier: u128, tip_gwei: u128) -> (u128, u128) {
    let tip = tip_gwei * GWEI;
    (base_fee.saturating_mul(base_fee_multiplier).saturating_add(tip), tip)
}

/// sqrtPriceLimitX96 `bps` away from the current pool price in the swap direction.
///
/// Zero disables the limit.
pub fn sqrt_price_limit(sqrt_price_x96: U256, zero_for_one: bool, bps: u32) -> U256 {
    if bps == 0 || sqrt_price_x96.is_zero() {
        return U256::ZERO;
    }
    let move_frac = bps as f64 / 10_000.0;
    // price moves down when selling token0 for token1
    let price_factor = if zero_for_one { 1.0 - move_frac } else { 1.0 + move_frac };
    if price_factor <= 0.0 {
        return U256::ZERO;
    }
    let factor = (price_factor.sqrt() * FACTOR_SCALE as f64) as u64;
    sqrt_price_x96 * U256::from(factor) / U256::from(FACTOR_SCALE)
}

/// Locally incremented nonce
#[derive(Debug)]
pub struct NonceTracker {
    next: AtomicU64,
}

impl NonceTracker {
    pub fn new(start: u64) -> Self {
        Self {
            next: AtomicU64::new(start),
        }
    }

    /// Reserve the next nonce
    pub fn next(&self) -> u64 {
        self.next.fetch_add(1, Ordering::SeqCst)
    }

    pub fn peek(&self) -> u64 {
        self.next.load(Ordering::SeqCst)
    }

    pub fn reset(&self, value: u64) {
        self.next.store(value, Ordering::SeqCst);
    }
}

/// What to do with the local nonce after the node rejected a submission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NonceRecovery {
    /// Local nonce drifted; reload the pending count from chain
    Resync,
    /// Nothing was accepted; hand the nonce back
    Release(u64),
}

pub fn nonce_recovery(err: &ExecutionError, used: u64) -> NonceRecovery {
    if err.is_nonce_error() {
        NonceRecovery::Resync
    } else {
        NonceRecovery::Release(used)
    }
}

// ==================== CLIENT ====================

/// Winning quote for a swap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Quote {
    pub fee: u32,
    pub amount_out: U256,
}

/// Confirmed swap
#[derive(Debug, Clone)]
pub struct SwapReceipt {
    pub tx_hash: String,
    pub fee: u32,
    /// Token-in units actually spent
    pub amount_in: Decimal,
    /// Token-out units received, measured as the balance delta
    pub amount_out: Decimal,
    pub gas_used: u64,
}

pub struct UniswapClient {
    provider: DynProvider,
    owner: Address,
    config: ExecutionConfig,
    nonce: NonceTracker,
    retry: RetryConfig,
    router: Address,
    quoter: Address,
    factory: Address,
}

fn rpc_err(context: &str) -> impl Fn(alloy::contract::Error) -> ExecutionError + '_ {
    move |e| ExecutionError::Rpc(format!("{}: {}", context, e))
}

fn parse_address(s: &str) -> Result<Address, ExecutionError> {
    Address::from_str(s).map_err(|e| ExecutionError::Rpc(format!("bad address {}: {}", s, e)))
}

impl UniswapClient {
    /// Connect a signing provider and read the starting nonce
    pub async fn connect(
        rpc_url: &str,
        private_key: &str,
        chain_id: u64,
        config: ExecutionConfig,
    ) -> Result<Self, ExecutionError> {
        let signer: PrivateKeySigner = private_key
            .trim()
            .parse()
            .map_err(|e| ExecutionError::Signer(format!("Failed to parse private key: {}", e)))?;
        let signer = signer.with_chain_id(Some(chain_id));
        let owner = signer.address();

        let url: reqwest::Url = rpc_url
            .parse()
            .map_err(|e| ExecutionError::Rpc(format!("Invalid RPC URL {}: {}", rpc_url, e)))?;
        let provider = ProviderBuilder::new()
            .wallet(EthereumWallet::from(signer))
            .connect_http(url)
            .erased();

        let start_nonce = provider
            .get_transaction_count(owner)
            .pending()
            .await
            .map_err(|e| ExecutionError::Rpc(format!("Failed to read nonce: {}", e)))?;

        info!("[Uniswap] Wallet {} connected, next nonce {}", owner, start_nonce);

        Ok(Self {
            provider,
            owner,
            config,
            nonce: NonceTracker::new(start_nonce),
            retry: RetryConfig::default(),
            router: parse_address(SWAP_ROUTER)?,
            quoter: parse_address(QUOTER_V2)?,
            factory: parse_address(FACTORY)?,
        })
    }

    /// Raw ERC-20 balance of the wallet
    pub async fn raw_balance(&self, token: Address) -> Result<U256, ExecutionError> {
        let erc20 = IERC20::new(token, &self.provider);
        let (erc20, owner) = (&erc20, self.owner);
        with_retry(&self.retry, "balanceOf", move || async move {
            erc20.balanceOf(owner).call().await.map_err(rpc_err("balanceOf"))
        })
        .await
    }

    pub async fn token_balance(&self, token: &Token) -> Result<Decimal, ExecutionError> {
        let raw = self.raw_balance(token.address()?).await?;
        from_units(raw, token.decimals)
    }

    /// Quote every configured fee tier that has a pool and keep the best
    pub async fn best_quote(
        &self,
        token_in: Address,
        token_out: Address,
        amount_in: U256,
    ) -> Result<Quote, ExecutionError> {
        let factory = IUniswapV3Factory::new(self.factory, &self.provider);
        let quoter = IQuoterV2::new(self.quoter, &self.provider);
        let mut quotes = Vec::with_capacity(self.config.fee_tiers.len());

        for &fee in &self.config.fee_tiers {
            let pool = match factory.getPool(token_in, token_out, U24::from(fee)).call().await {
                Ok(pool) => pool,
                Err(e) => {
                    debug!("[Uniswap] getPool fee {} failed: {}", fee, e);
                    continue;
                }
            };
            if pool == Address::ZERO {
                continue;
            }

            let params = IQuoterV2::QuoteExactInputSingleParams {
                tokenIn: token_in,
                tokenOut: token_out,
                amountIn: amount_in,
                fee: U24::from(fee),
                sqrtPriceLimitX96: U160::ZERO,
            };
            match quoter.quoteExactInputSingle(params).call().await {
                Ok(quote) => {
                    debug!("[Uniswap] fee {} quote {}", fee, quote.amountOut);
                    quotes.push((fee, quote.amountOut));
                }
                Err(e) => debug!("[Uniswap] quote fee {} failed: {}", fee, e),
            }
        }

        select_best_quote(&quotes)
            .map(|(fee, amount_out)| Quote { fee, amount_out })
            .ok_or_else(|| ExecutionError::NoLiquidity {
                token_in: token_in.to_string(),
                token_out: token_out.to_string(),
            })
    }

    /// Current EIP-1559 fee pair
    async fn current_fees(&self) -> Result<(u128, u128), ExecutionError> {
        let block = self
            .provider
            .get_block_by_number(BlockNumberOrTag::Latest)
            .await
            .map_err(|e| ExecutionError::Rpc(format!("Failed to read latest block: {}", e)))?
            .ok_or_else(|| ExecutionError::Rpc("latest block not found".to_string()))?;

        let base_fee = block.header.base_fee_per_gas.unwrap_or(0) as u128;
        Ok(fee_params(
            base_fee,
            self.config.base_fee_multiplier,
            self.config.priority_tip_gwei,
        ))
    }

    /// Recover the local nonce after a rejected submission and pass the error on
    async fn rejected(&self, used: u64, err: ExecutionError) -> ExecutionError {
        match nonce_recovery(&err, used) {
            NonceRecovery::Resync => self.resync_nonce().await,
            NonceRecovery::Release(nonce) => {
                debug!("[Uniswap] Releasing nonce {} after rejection", nonce);
                self.nonce.reset(nonce);
            }
        }
        err
    }

    async fn resync_nonce(&self) {
        match self.provider.get_transaction_count(self.owner).pending().await {
            Ok(n) => {
                warn!("[Uniswap] Nonce resynced {} -> {}", self.nonce.peek(), n);
                self.nonce.reset(n);
            }
            Err(e) => warn!("[Uniswap] Nonce resync failed: {}", e),
        }
    }

    /// Poll for a receipt until it arrives or the confirmation window closes
    async fn wait_for_receipt(&self, tx_hash: TxHash) -> Result<TransactionReceipt, ExecutionError> {
        let timeout = Duration::from_secs(self.config.confirm_timeout_seconds);
        let poll = Duration::from_secs(self.config.confirm_poll_seconds.max(1));
        let started = Instant::now();

        loop {
            match self.provider.get_transaction_receipt(tx_hash).await {
                Ok(Some(receipt)) => {
                    if receipt.status() {
                        return Ok(receipt);
                    }
                    return Err(ExecutionError::Reverted {
                        tx_hash: tx_hash.to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => debug!("[Uniswap] receipt poll for {} failed: {}", tx_hash, e),
            }

            if started.elapsed() >= timeout {
                return Err(ExecutionError::ConfirmationTimeout {
                    tx_hash: tx_hash.to_string(),
                    waited_secs: timeout.as_secs(),
                });
            }
            tokio::time::sleep(poll).await;
        }
    }

    /// Make sure the router may spend `amount` of `token`; returns the approval tx hash if one was sent
    pub async fn ensure_allowance(&self, token: &Token, amount: U256) -> Result<Option<String>, ExecutionError> {
        let token_address = token.address()?;
        let erc20 = IERC20::new(token_address, &self.provider);

        let allowance = erc20
            .allowance(self.owner, self.router)
            .call()
            .await
            .map_err(rpc_err("allowance"))?;
        if allowance >= amount {
            return Ok(None);
        }

        let needs_reset = !allowance.is_zero()
            && self
                .config
                .zero_approve_tokens
                .iter()
                .any(|s| s.eq_ignore_ascii_case(token.symbol));
        if needs_reset {
            info!("[Uniswap] Resetting {} allowance to zero first", token.symbol);
            self.send_approval(token, U256::ZERO).await?;
        }

        let target = if self.config.approve_max { U256::MAX } else { amount };
        let hash = self.send_approval(token, target).await?;

        tokio::time::sleep(Duration::from_secs(self.config.approval_settle_seconds)).await;
        Ok(Some(hash))
    }

    async fn send_approval(&self, token: &Token, amount: U256) -> Result<String, ExecutionError> {
        let erc20 = IERC20::new(token.address()?, &self.provider);
        let (max_fee, tip) = self.current_fees().await?;

        let call = erc20.approve(self.router, amount).from(self.owner);
        let estimate = call.estimate_gas().await.ok();
        let gas = gas_limit(estimate, self.config.gas_limit_multiplier, self.config.approve_gas_fallback);

        let nonce = self.nonce.next();
        let pending = match call
            .nonce(nonce)
            .gas(gas)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(tip)
            .send()
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                let err = ExecutionError::Submission(format!("approve {}: {}", token.symbol, e));
                return Err(self.rejected(nonce, err).await);
            }
        };

        let tx_hash = *pending.tx_hash();
        info!("[Uniswap] Approve {} sent: {}", token.symbol, tx_hash);
        self.wait_for_receipt(tx_hash).await?;
        info!("[Uniswap] Approve {} confirmed", token.symbol);
        Ok(tx_hash.to_string())
    }

    async fn price_limit(&self, token_in: Address, token_out: Address, fee: u32) -> U160 {
        if self.config.price_limit_bps == 0 {
            return U160::ZERO;
        }
        let factory = IUniswapV3Factory::new(self.factory, &self.provider);
        let pool = match factory.getPool(token_in, token_out, U24::from(fee)).call().await {
            Ok(pool) if pool != Address::ZERO => pool,
            _ => return U160::ZERO,
        };
        match IUniswapV3Pool::new(pool, &self.provider).slot0().call().await {
            Ok(slot0) => {
                let current = U256::from(slot0.sqrtPriceX96);
                let limit = sqrt_price_limit(current, token_in < token_out, self.config.price_limit_bps);
                U160::saturating_from(limit)
            }
            Err(e) => {
                debug!("[Uniswap] slot0 failed, no price limit: {}", e);
                U160::ZERO
            }
        }
    }

    /// Swap an exact `amount_in` of `token_in` for `token_out`
    pub async fn swap(
        &self,
        token_in: &Token,
        token_out: &Token,
        amount_in: Decimal,
    ) -> Result<SwapReceipt, ExecutionError> {
        let in_address = token_in.address()?;
        let out_address = token_out.address()?;
        let amount_units = to_units(amount_in, token_in.decimals);

        // QUOTE
        let balance_in = self.raw_balance(in_address).await?;
        if balance_in < amount_units || amount_units.is_zero() {
            return Err(ExecutionError::InsufficientBalance {
                token: token_in.symbol.to_string(),
                have: from_units(balance_in, token_in.decimals)?.to_string(),
                need: amount_in.to_string(),
            });
        }
        let quote = self.best_quote(in_address, out_address, amount_units).await?;
        let min_out = min_amount_out(quote.amount_out, self.config.slippage);
        info!(
            "[Uniswap] {} {} -> {}: fee {} quote {} min {}",
            amount_in, token_in.symbol, token_out.symbol, quote.fee, quote.amount_out, min_out
        );

        // APPROVE
        self.ensure_allowance(token_in, amount_units).await?;

        // BUILD
        let deadline = U256::from(chrono::Utc::now().timestamp() as u64 + self.config.deadline_seconds);
        let params = ISwapRouter::ExactInputSingleParams {
            tokenIn: in_address,
            tokenOut: out_address,
            fee: U24::from(quote.fee),
            recipient: self.owner,
            deadline,
            amountIn: amount_units,
            amountOutMinimum: min_out,
            sqrtPriceLimitX96: self.price_limit(in_address, out_address, quote.fee).await,
        };

        let balance_out_before = self.raw_balance(out_address).await?;
        let router = ISwapRouter::new(self.router, &self.provider);
        let call = router.exactInputSingle(params).from(self.owner);
        let estimate = match call.estimate_gas().await {
            Ok(gas) => Some(gas),
            Err(e) => {
                warn!("[Uniswap] Gas estimate failed, using fallback: {}", e);
                None
            }
        };
        let gas = gas_limit(estimate, self.config.gas_limit_multiplier, self.config.swap_gas_fallback);
        let (max_fee, tip) = self.current_fees().await?;

        // SIGN + SUBMIT
        let nonce = self.nonce.next();
        let pending = match call
            .nonce(nonce)
            .gas(gas)
            .max_fee_per_gas(max_fee)
            .max_priority_fee_per_gas(tip)
            .send()
            .await
        {
            Ok(pending) => pending,
            Err(e) => {
                let err = ExecutionError::Submission(format!("exactInputSingle: {}", e));
                return Err(self.rejected(nonce, err).await);
            }
        };
        let tx_hash = *pending.tx_hash();
        info!("[Uniswap] Swap sent: {} (nonce {}, gas {})", tx_hash, nonce, gas);

        // CONFIRM
        let receipt = self.wait_for_receipt(tx_hash).await?;
        let balance_out_after = self.raw_balance(out_address).await?;
        let received = balance_out_after.saturating_sub(balance_out_before);
        let amount_out = from_units(received, token_out.decimals)?;

        info!(
            "[Uniswap] Swap confirmed in block {:?}: received {} {}",
            receipt.block_number,
            amount_out,
            token_out.symbol
        );

        Ok(SwapReceipt {
            tx_hash: tx_hash.to_string(),
            fee: quote.fee,
            amount_in: from_units(amount_units, token_in.decimals)?,
            amount_out,
            gas_used: receipt.gas_used,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_unit_scaling() {
        assert_eq!(to_units(dec!(2.4), 6), U256::from(2_400_000u64));
        assert_eq!(to_units(dec!(0.0000001), 6), U256::ZERO);
        assert_eq!(to_units(dec!(1.5), 18), U256::from(1_500_000_000_000_000_000u128));
        assert_eq!(from_units(U256::from(2_400_000u64), 6).unwrap(), dec!(2.4));
        assert_eq!(from_units(U256::from(12_345u64), 8).unwrap(), dec!(0.00012345));
    }

    #[test]
    fn test_from_units_out_of_range() {
        assert!(matches!(
            from_units(U256::MAX, 18),
            Err(ExecutionError::AmountOverflow { decimals: 18, .. })
        ));
        // fits in u128 but not in a 96-bit Decimal mantissa
        assert!(from_units(U256::from(u128::MAX >> 1), 6).is_err());
    }

    #[test]
    fn test_min_amount_out() {
        let quote = U256::from(1_000_000u64);
        assert_eq!(min_amount_out(quote, dec!(0.003)), U256::from(997_000u64));
        assert_eq!(min_amount_out(quote, Decimal::ZERO), quote);
        // never above the quote
        assert_eq!(min_amount_out(quote, dec!(-0.1)), quote);
    }

    #[test]
    fn test_best_fee_tier() {
        let quotes = [
            (500, U256::from(990u64)),
            (3000, U256::from(1_000u64)),
            (10000, U256::from(950u64)),
        ];
        assert_eq!(select_best_quote(&quotes), Some((3000, U256::from(1_000u64))));

        let dry = [(500, U256::ZERO), (3000, U256::ZERO)];
        assert_eq!(select_best_quote(&dry), None);
        assert_eq!(select_best_quote(&[]), None);
    }

    #[test]
    fn test_gas_math() {
        assert_eq!(gas_limit(Some(200_000), 1.2, 350_000), 240_000);
        assert_eq!(gas_limit(None, 1.2, 350_000), 350_000);
        assert_eq!(gas_limit(Some(0), 1.2, 100_000), 100_000);

        // 30 gwei base, x2, +40 gwei tip
        let (max_fee, tip) = fee_params(30 * GWEI, 2, 40);
        assert_eq!(tip, 40 * GWEI);
        assert_eq!(max_fee, 100 * GWEI);
    }

    #[test]
    fn test_sqrt_price_limit() {
        let sqrt = U256::from(1_000_000_000_000u64);
        assert_eq!(sqrt_price_limit(sqrt, true, 0), U256::ZERO);

        let down = sqrt_price_limit(sqrt, true, 30);
        let up = sqrt_price_limit(sqrt, false, 30);
        assert!(down < sqrt && up > sqrt);
        // sqrt(0.997) ~ 0.998499
        assert!(down > U256::from(998_490_000_000u64) && down < U256::from(998_510_000_000u64));
    }

    #[test]
    fn test_nonce_tracker() {
        let nonces = NonceTracker::new(7);
        assert_eq!(nonces.next(), 7);
        assert_eq!(nonces.next(), 8);
        assert_eq!(nonces.peek(), 9);
        nonces.reset(8);
        assert_eq!(nonces.next(), 8);
    }

    #[test]
    fn test_nonce_recovery() {
        let drift = ExecutionError::Submission("server returned an error response: nonce too low".into());
        assert_eq!(nonce_recovery(&drift, 12), NonceRecovery::Resync);

        let underfunded = ExecutionError::Submission("insufficient funds for gas * price + value".into());
        assert_eq!(nonce_recovery(&underfunded, 12), NonceRecovery::Release(12));
    }
}
