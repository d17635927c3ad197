//! Polygon token registry

use crate::services::errors::ExecutionError;
use alloy::primitives::Address;
use std::str::FromStr;

/// Stablecoin every pair is quoted against
pub const QUOTE_SYMBOL: &str = "USDC";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token {
    pub symbol: &'static str,
    pub address: &'static str,
    pub decimals: u8,
}

impl Token {
    pub fn address(&self) -> Result<Address, ExecutionError> {
        Address::from_str(self.address)
            .map_err(|e| ExecutionError::UnknownToken(format!("{} address: {}", self.symbol, e)))
    }

    pub fn pair_label(&self) -> String {
        format!("{}/{}", self.symbol, QUOTE_SYMBOL)
    }
}

/// Native USDC on Polygon PoS
pub const USDC: Token = Token {
    symbol: "USDC",
    address: "0x3c499c542cEF5E3811e1192ce70d8cC03d5c3359",
    decimals: 6,
};

pub const TOKENS: &[Token] = &[
    USDC,
    Token {
        symbol: "USDC.E",
        address: "0x2791Bca1f2de4661ED88A30C99A7a9449Aa84174",
        decimals: 6,
    },
    Token {
        symbol: "WETH",
        address: "0x7ceB23fD6bC0adD59E62ac25578270cFf1b9f619",
        decimals: 18,
    },
    Token {
        symbol: "WBTC",
        address: "0x1BFD67037B42Cf73acF2047067bd4F2C47D9BfD6",
        decimals: 8,
    },
    Token {
        symbol: "WMATIC",
        address: "0x0d500B1d8E8eF31E21C99d1Db9A6444d3ADf1270",
        decimals: 18,
    },
    Token {
        symbol: "LINK",
        address: "0x53E0bca35eC356BD5ddDFebbD1Fc0fD03FaBad39",
        decimals: 18,
    },
    Token {
        symbol: "AAVE",
        address: "0xD6DF932A45C0f255f85145f286eA0b292B21C90B",
        decimals: 18,
    },
];

/// Look a token up by symbol (case-insensitive)
pub fn by_symbol(symbol: &str) -> Option<&'static Token> {
    let upper = symbol.to_uppercase();
    TOKENS.iter().find(|t| t.symbol == upper)
}

/// Look a token up by contract address (case-insensitive)
pub fn by_address(address: &str) -> Option<&'static Token> {
    TOKENS.iter().find(|t| t.address.eq_ignore_ascii_case(address))
}

pub fn require(symbol: &str) -> Result<&'static Token, ExecutionError> {
    by_symbol(symbol).ok_or_else(|| ExecutionError::UnknownToken(symbol.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup() {
        assert_eq!(by_symbol("weth").unwrap().decimals, 18);
        assert_eq!(by_symbol("WBTC").unwrap().decimals, 8);
        assert!(by_symbol("DOGE").is_none());
        assert!(matches!(require("DOGE"), Err(ExecutionError::UnknownToken(_))));
        assert_eq!(
            by_address("0x7ceb23fd6bc0add59e62ac25578270cff1b9f619").unwrap().symbol,
            "WETH"
        );
    }

    #[test]
    fn test_registry_addresses_parse() {
        for token in TOKENS {
            assert!(token.address().is_ok(), "{} has a bad address", token.symbol);
        }
        assert_eq!(USDC.pair_label(), "USDC/USDC");
        assert_eq!(by_symbol("LINK").unwrap().pair_label(), "LINK/USDC");
    }
}
