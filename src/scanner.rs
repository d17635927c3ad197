//! Trading pair universe: the static token list or the Uniswap V3 subgraph

use crate::config::ScannerConfig;
use crate::services::market_data::is_stablecoin;
use crate::tokens::{self, Token};
use anyhow::{Context, Result};
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use tracing::{debug, info, warn};

/// A token tradable against USDC
#[derive(Debug, Clone, PartialEq)]
pub struct TradingPair {
    pub token: &'static Token,
    pub fee_tier: Option<u32>,
    pub tvl_usd: Option<f64>,
    pub volume_usd: Option<f64>,
}

impl TradingPair {
    pub fn symbol(&self) -> &'static str {
        self.token.symbol
    }
}

#[derive(Debug, Deserialize)]
struct GraphResponse {
    data: Option<GraphData>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct GraphData {
    pools: Vec<GraphPool>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphPool {
    #[serde(default)]
    fee_tier: Option<String>,
    #[serde(rename = "totalValueLockedUSD", default)]
    total_value_locked_usd: Option<String>,
    #[serde(rename = "volumeUSD", default)]
    volume_usd: Option<String>,
    token0: GraphToken,
    token1: GraphToken,
}

#[derive(Debug, Deserialize)]
struct GraphToken {
    id: String,
    symbol: String,
}

/// Scanner for the pairs the bot may enter
pub struct Scanner {
    client: Client,
    config: ScannerConfig,
}

impl Scanner {
    pub fn new(config: ScannerConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client, config })
    }

    /// Pairs from the subgraph when configured, otherwise the static list.
    /// A subgraph failure falls back to the static list.
    pub async fn pairs(&self) -> Vec<TradingPair> {
        if let Some(url) = &self.config.subgraph_url {
            match self.fetch_pools(url).await {
                Ok(pairs) if !pairs.is_empty() => return pairs,
                Ok(_) => warn!("[Scanner] Subgraph returned no eligible pools, using token list"),
                Err(e) => warn!("[Scanner] Subgraph query failed: {:#}, using token list", e),
            }
        }
        self.static_pairs()
    }

    /// Configured symbols that exist in the token registry
    pub fn static_pairs(&self) -> Vec<TradingPair> {
        let mut pairs = Vec::new();
        for symbol in &self.config.symbols {
            match tokens::by_symbol(symbol) {
                Some(token) if !is_stablecoin(token.symbol) => {
                    if !pairs.iter().any(|p: &TradingPair| p.token.symbol == token.symbol) {
                        pairs.push(TradingPair {
                            token,
                            fee_tier: None,
                            tvl_usd: None,
                            volume_usd: None,
                        });
                    }
                }
                Some(_) => debug!("[Scanner] Skipping stablecoin {}", symbol),
                None => warn!("[Scanner] {} is not in the token registry", symbol),
            }
        }
        pairs
    }

    /// Top pools by volume, filtered by TVL and volume floors
    pub async fn fetch_pools(&self, url: &str) -> Result<Vec<TradingPair>> {
        let query = format!(
            "{{ pools(first: {}, orderBy: volumeUSD, orderDirection: desc) {{ \
             feeTier totalValueLockedUSD volumeUSD \
             token0 {{ id symbol }} token1 {{ id symbol }} }} }}",
            self.config.top_pools
        );

        let response = self
            .client
            .post(url)
            .json(&json!({ "query": query }))
            .send()
            .await
            .context("Failed to query subgraph")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Subgraph error {}: {}", status, body);
        }

        let graph: GraphResponse = response.json().await.context("Failed to parse subgraph response")?;
        if let Some(errors) = graph.errors {
            anyhow::bail!("Subgraph returned errors: {}", errors);
        }
        let pools = graph.data.map(|d| d.pools).unwrap_or_default();
        debug!("[Scanner] Subgraph returned {} pools", pools.len());

        let mut pairs: Vec<TradingPair> = Vec::new();
        for pool in pools {
            let Some(pair) = self.pool_to_pair(&pool) else {
                continue;
            };
            if !pairs.iter().any(|p| p.token.symbol == pair.token.symbol) {
                pairs.push(pair);
            }
        }

        info!(
            "[Scanner] {} eligible pairs: {}",
            pairs.len(),
            pairs.iter().map(|p| p.symbol()).collect::<Vec<_>>().join(", ")
        );
        Ok(pairs)
    }

    fn pool_to_pair(&self, pool: &GraphPool) -> Option<TradingPair> {
        let tvl = parse_usd(pool.total_value_locked_usd.as_deref());
        let volume = parse_usd(pool.volume_usd.as_deref());
        if tvl < self.config.min_tvl_usd || volume < self.config.min_volume_usd {
            return None;
        }

        let registry = |t: &GraphToken| tokens::by_address(&t.id).or_else(|| tokens::by_symbol(&t.symbol));
        let (a, b) = (registry(&pool.token0)?, registry(&pool.token1)?);
        let token = match (is_stablecoin(a.symbol), is_stablecoin(b.symbol)) {
            (true, false) => b,
            (false, true) => a,
            _ => return None,
        };

        Some(TradingPair {
            token,
            fee_tier: pool.fee_tier.as_deref().and_then(|f| f.parse().ok()),
            tvl_usd: Some(tvl),
            volume_usd: Some(volume),
        })
    }
}

fn parse_usd(value: Option<&str>) -> f64 {
    value.and_then(|v| v.parse::<f64>().ok()).unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn pool(t0: (&str, &str), t1: (&str, &str), tvl: &str, volume: &str) -> serde_json::Value {
        json!({
            "feeTier": "500",
            "totalValueLockedUSD": tvl,
            "volumeUSD": volume,
            "token0": {"id": t0.0, "symbol": t0.1},
            "token1": {"id": t1.0, "symbol": t1.1}
        })
    }

    const USDC_ADDR: &str = "0x3c499c542cef5e3811e1192ce70d8cc03d5c3359";
    const WETH_ADDR: &str = "0x7ceb23fd6bc0add59e62ac25578270cff1b9f619";
    const WBTC_ADDR: &str = "0x1bfd67037b42cf73acf2047067bd4f2c47d9bfd6";

    #[test]
    fn test_static_pairs_skip_unknown_and_stable() {
        let scanner = Scanner::new(ScannerConfig {
            symbols: vec!["WETH".into(), "USDC".into(), "DOGE".into(), "weth".into(), "LINK".into()],
            ..ScannerConfig::default()
        })
        .unwrap();
        let symbols: Vec<_> = scanner.static_pairs().iter().map(|p| p.symbol()).collect();
        assert_eq!(symbols, vec!["WETH", "LINK"]);
    }

    #[tokio::test]
    async fn test_subgraph_pools_filtered() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "data": {"pools": [
                    pool((USDC_ADDR, "USDC"), (WETH_ADDR, "WETH"), "9000000", "2000000"),
                    pool((WBTC_ADDR, "WBTC"), (USDC_ADDR, "USDC"), "100000", "2000000"),
                    pool((WETH_ADDR, "WETH"), (WBTC_ADDR, "WBTC"), "9000000", "2000000"),
                    pool(("0xdead", "PEPE"), (USDC_ADDR, "USDC"), "9000000", "2000000"),
                    pool((WETH_ADDR, "WETH"), (USDC_ADDR, "USDC"), "8000000", "900000")
                ]}
            })))
            .mount(&server)
            .await;

        let scanner = Scanner::new(ScannerConfig {
            subgraph_url: Some(server.uri()),
            ..ScannerConfig::default()
        })
        .unwrap();

        let pairs = scanner.pairs().await;
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].symbol(), "WETH");
        assert_eq!(pairs[0].fee_tier, Some(500));
    }

    #[tokio::test]
    async fn test_subgraph_failure_falls_back_to_token_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let scanner = Scanner::new(ScannerConfig {
            subgraph_url: Some(server.uri()),
            ..ScannerConfig::default()
        })
        .unwrap();

        let pairs = scanner.pairs().await;
        assert_eq!(pairs.len(), ScannerConfig::default().symbols.len());
    }
}
