//! Error types for the market data and execution adapters
//!
//! Classifies HTTP and RPC failures so callers can decide between retrying,
//! skipping an asset for the cycle, or surfacing the error.

use thiserror::Error;

/// Failures of the candle and ticker endpoints
#[derive(Debug, Clone, Error)]
pub enum MarketDataError {
    /// Timeframe not offered by the kline endpoint
    #[error("unsupported timeframe: {0}")]
    UnsupportedTimeframe(String),
    /// The endpoint answered but returned no rows
    #[error("empty response for {symbol} {timeframe}")]
    EmptyResponse { symbol: String, timeframe: String },
    /// Rate limited by the exchange
    #[error("rate limited by market data API")]
    RateLimited,
    /// Unknown or delisted symbol
    #[error("invalid symbol: {0}")]
    InvalidSymbol(String),
    /// Payload did not have the expected shape
    #[error("malformed market data: {0}")]
    Malformed(String),
    /// Network/connection error (timeout, DNS, etc.)
    #[error("network error: {0}")]
    NetworkError(String),
    /// Any other non-success status
    #[error("market data API error {status}: {body}")]
    Http { status: u16, body: String },
}

impl MarketDataError {
    /// Classify a non-success HTTP response
    pub fn from_response(status: u16, body: &str) -> Self {
        let msg_lower = body.to_lowercase();

        if status == 429 || status == 418 || msg_lower.contains("too many requests") {
            return MarketDataError::RateLimited;
        }

        // Binance answers unknown pairs with code -1121
        if status == 400 && (msg_lower.contains("-1121") || msg_lower.contains("invalid symbol")) {
            return MarketDataError::InvalidSymbol(body.to_string());
        }

        MarketDataError::Http {
            status,
            body: body.to_string(),
        }
    }

    /// Parse a network/reqwest error
    pub fn from_network_error(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            MarketDataError::NetworkError("Request timed out".to_string())
        } else if err.is_connect() {
            MarketDataError::NetworkError("Connection failed".to_string())
        } else if err.is_decode() {
            MarketDataError::Malformed(err.to_string())
        } else {
            MarketDataError::NetworkError(err.to_string())
        }
    }

    /// Whether this error is retryable with exponential backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            MarketDataError::RateLimited | MarketDataError::NetworkError(_) => true,
            MarketDataError::Http { status, .. } => *status >= 500,
            _ => false,
        }
    }
}

/// Failures of the on-chain swap pipeline
#[derive(Debug, Clone, Error)]
pub enum ExecutionError {
    /// No fee tier returned a non-zero quote
    #[error("no liquidity for {token_in} -> {token_out}")]
    NoLiquidity { token_in: String, token_out: String },
    /// Symbol not in the token registry
    #[error("unknown token: {0}")]
    UnknownToken(String),
    #[error("insufficient {token} balance: have {have}, need {need}")]
    InsufficientBalance {
        token: String,
        have: String,
        need: String,
    },
    /// Receipt came back with a failed status
    #[error("transaction reverted: {tx_hash}")]
    Reverted { tx_hash: String },
    /// No receipt within the confirmation window
    #[error("transaction {tx_hash} not confirmed after {waited_secs}s")]
    ConfirmationTimeout { tx_hash: String, waited_secs: u64 },
    /// Submission rejected by the node
    #[error("submission failed: {0}")]
    Submission(String),
    #[error("rpc error: {0}")]
    Rpc(String),
    #[error("signer error: {0}")]
    Signer(String),
    /// On-chain amount too large for a Decimal
    #[error("amount of {units} base units at {decimals} decimals is out of range")]
    AmountOverflow { units: String, decimals: u8 },
}

impl ExecutionError {
    /// Submission errors that indicate our local nonce drifted from the chain
    pub fn is_nonce_error(&self) -> bool {
        match self {
            ExecutionError::Submission(msg) | ExecutionError::Rpc(msg) => {
                let msg = msg.to_lowercase();
                msg.contains("nonce too low")
                    || msg.contains("nonce too high")
                    || msg.contains("replacement transaction underpriced")
                    || msg.contains("already known")
            }
            _ => false,
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, ExecutionError::Rpc(_)) || self.is_nonce_error()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limited() {
        let err = MarketDataError::from_response(429, "");
        assert!(err.is_retryable());
        assert!(matches!(err, MarketDataError::RateLimited));
    }

    #[test]
    fn test_invalid_symbol() {
        let err = MarketDataError::from_response(400, r#"{"code":-1121,"msg":"Invalid symbol."}"#);
        assert!(!err.is_retryable());
        assert!(matches!(err, MarketDataError::InvalidSymbol(_)));
    }

    #[test]
    fn test_server_error_is_retryable() {
        let err = MarketDataError::from_response(502, "Bad Gateway");
        assert!(err.is_retryable());
        assert!(matches!(err, MarketDataError::Http { status: 502, .. }));
    }

    #[test]
    fn test_nonce_errors() {
        let err = ExecutionError::Submission("server returned an error response: nonce too low".into());
        assert!(err.is_nonce_error());
        assert!(err.is_retryable());

        let reverted = ExecutionError::Reverted { tx_hash: "0x1".into() };
        assert!(!reverted.is_nonce_error());
        assert!(!reverted.is_retryable());
    }
}
