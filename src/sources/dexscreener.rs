//! DexScreener adapter: token-profile discovery plus pair-level market data
//!
//! Two endpoints are combined into one observation stream: the latest token
//! profiles feed supplies newly listed mints, and the batch pairs endpoint
//! supplies price/liquidity/volume/txn windows for those mints (up to 30
//! tokens per call, per the API constraint).

use super::{is_valid_mint, status_to_error, RateGate, RetryPolicy, SourceAdapter};
use crate::config::{RetryConfig, SourceConfig};
use crate::errors::{PipelineError, PipelineResult};
use crate::logger::{self, LogTag};
use crate::types::{DataSource, MarketFields, RawTokenObservation};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const SOURCE_NAME: &'static str = "dexscreener";

/// Maximum tokens per batch pairs call (DexScreener API constraint)
const MAX_TOKENS_PER_CALL: usize = 30;

#[derive(Debug, Deserialize)]
struct TokenProfile {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "tokenAddress")]
    token_address: String,
}

#[derive(Debug, Deserialize)]
struct PairsResponse {
    pairs: Option<Vec<DexPair>>,
}

#[derive(Debug, Deserialize)]
struct DexPair {
    #[serde(rename = "chainId")]
    chain_id: String,
    #[serde(rename = "baseToken")]
    base_token: BaseToken,
    #[serde(rename = "priceUsd")]
    price_usd: Option<String>,
    txns: Option<TxnWindows>,
    volume: Option<VolumeWindows>,
    liquidity: Option<Liquidity>,
    #[serde(rename = "marketCap")]
    market_cap: Option<f64>,
    #[serde(rename = "pairCreatedAt")]
    pair_created_at: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct BaseToken {
    address: String,
    name: Option<String>,
    symbol: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TxnWindows {
    h1: Option<TxnStats>,
    h6: Option<TxnStats>,
    h24: Option<TxnStats>,
}

#[derive(Debug, Deserialize)]
struct TxnStats {
    buys: Option<i64>,
    sells: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct VolumeWindows {
    h1: Option<f64>,
    h6: Option<f64>,
    h24: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Liquidity {
    usd: Option<f64>,
}

pub struct DexScreenerSource {
    client: Client,
    base_url: String,
    gate: RateGate,
    retry: RetryPolicy,
}

impl DexScreenerSource {
    pub fn new(client: Client, config: &SourceConfig, retry: &RetryConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            gate: RateGate::new(Duration::from_millis(config.min_request_interval_ms)),
            retry: RetryPolicy::new(retry),
        }
    }

    async fn fetch_profiles(&self) -> PipelineResult<Vec<TokenProfile>> {
        self.gate.acquire().await;
        let url = format!("{}/token-profiles/latest/v1", self.base_url);
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                source: SOURCE_NAME.to_string(),
                attempts: 1,
                last_error: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(status_to_error(SOURCE_NAME, response.status()));
        }
        let profiles: Vec<TokenProfile> =
            response
                .json()
                .await
                .map_err(|e| PipelineError::SourceUnavailable {
                    source: SOURCE_NAME.to_string(),
                    attempts: 1,
                    last_error: format!("profiles parse failed: {}", e),
                })?;
        Ok(profiles)
    }

    async fn fetch_pairs(&self, mints: &[String]) -> PipelineResult<Vec<DexPair>> {
        self.gate.acquire().await;
        let url = format!("{}/latest/dex/tokens/{}", self.base_url, mints.join(","));
        let response = self
            .client
            .get(&url)
            .header("Accept", "application/json")
            .send()
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                source: SOURCE_NAME.to_string(),
                attempts: 1,
                last_error: e.to_string(),
            })?;
        if !response.status().is_success() {
            return Err(status_to_error(SOURCE_NAME, response.status()));
        }
        let parsed: PairsResponse =
            response
                .json()
                .await
                .map_err(|e| PipelineError::SourceUnavailable {
                    source: SOURCE_NAME.to_string(),
                    attempts: 1,
                    last_error: format!("pairs parse failed: {}", e),
                })?;
        Ok(parsed.pairs.unwrap_or_default())
    }

    /// Fetch market fields for a single mint; used by the enrichment path
    /// through the market cache.
    pub async fn fetch_token_overview(&self, mint: &str) -> PipelineResult<MarketFields> {
        let mints = vec![mint.to_string()];
        let pairs = self
            .retry
            .run(SOURCE_NAME, || self.fetch_pairs(&mints))
            .await?;
        let observed_at = Utc::now();
        match aggregate_pairs(mint, &pairs, observed_at) {
            Some(observation) => Ok(observation.fields),
            None => Ok(MarketFields::default()),
        }
    }
}

/// Fold all of a token's pairs into one observation: liquidity, volume and
/// transaction counts sum across pools; price comes from the deepest pool.
fn aggregate_pairs(
    mint: &str,
    pairs: &[DexPair],
    observed_at: DateTime<Utc>,
) -> Option<RawTokenObservation> {
    let token_pairs: Vec<&DexPair> = pairs
        .iter()
        .filter(|p| p.chain_id == "solana" && p.base_token.address == mint)
        .collect();
    if token_pairs.is_empty() {
        return None;
    }

    let mut observation = RawTokenObservation::new(mint, DataSource::DexScreener);
    observation.observed_at = observed_at;

    let mut best_liquidity = f64::MIN;
    let mut liquidity_total: Option<f64> = None;
    for pair in &token_pairs {
        if observation.symbol.is_none() {
            observation.symbol = pair.base_token.symbol.clone();
        }
        if observation.name.is_none() {
            observation.name = pair.base_token.name.clone();
        }

        let pair_liquidity = pair.liquidity.as_ref().and_then(|l| l.usd);
        if let Some(liq) = pair_liquidity {
            liquidity_total = Some(liquidity_total.unwrap_or(0.0) + liq);
        }

        // Deepest pool wins for price, market cap and pair age
        if pair_liquidity.unwrap_or(0.0) > best_liquidity {
            best_liquidity = pair_liquidity.unwrap_or(0.0);
            if let Some(price) = pair.price_usd.as_ref().and_then(|p| p.parse::<f64>().ok()) {
                observation.fields.price_usd = Some(price);
            }
            if pair.market_cap.is_some() {
                observation.fields.market_cap = pair.market_cap;
            }
            if let Some(created_ms) = pair.pair_created_at {
                observation.fields.pair_created_at = Utc.timestamp_millis_opt(created_ms).single();
            }
        }

        if let Some(volume) = &pair.volume {
            add_opt(&mut observation.fields.volume_1h, volume.h1);
            add_opt(&mut observation.fields.volume_6h, volume.h6);
            add_opt(&mut observation.fields.volume_24h, volume.h24);
        }
        if let Some(txns) = &pair.txns {
            if let Some(h1) = &txns.h1 {
                add_opt_i64(&mut observation.fields.txns_1h_buys, h1.buys);
                add_opt_i64(&mut observation.fields.txns_1h_sells, h1.sells);
            }
            if let Some(h6) = &txns.h6 {
                add_opt_i64(&mut observation.fields.txns_6h_buys, h6.buys);
                add_opt_i64(&mut observation.fields.txns_6h_sells, h6.sells);
            }
            if let Some(h24) = &txns.h24 {
                add_opt_i64(&mut observation.fields.txns_24h_buys, h24.buys);
                add_opt_i64(&mut observation.fields.txns_24h_sells, h24.sells);
            }
        }
    }

    observation.fields.liquidity_usd = liquidity_total;
    observation.fields.pool_count = Some(token_pairs.len() as i64);
    Some(observation)
}

fn add_opt(target: &mut Option<f64>, value: Option<f64>) {
    if let Some(v) = value {
        *target = Some(target.unwrap_or(0.0) + v);
    }
}

fn add_opt_i64(target: &mut Option<i64>, value: Option<i64>) {
    if let Some(v) = value {
        *target = Some(target.unwrap_or(0) + v);
    }
}

#[async_trait]
impl SourceAdapter for DexScreenerSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_recent(
        &self,
        _since: DateTime<Utc>,
        limit: usize,
    ) -> PipelineResult<Vec<RawTokenObservation>> {
        let profiles = self
            .retry
            .run(SOURCE_NAME, || self.fetch_profiles())
            .await?;

        // Per-item validation: malformed entries are dropped, not fatal
        let mut mints: Vec<String> = Vec::new();
        for profile in profiles {
            if profile.chain_id != "solana" {
                continue;
            }
            if !is_valid_mint(&profile.token_address) {
                logger::warning(
                    LogTag::Source,
                    &format!(
                        "{}: dropping profile with invalid mint '{}'",
                        SOURCE_NAME, profile.token_address
                    ),
                );
                continue;
            }
            if !mints.contains(&profile.token_address) {
                mints.push(profile.token_address);
            }
            if mints.len() >= limit {
                break;
            }
        }

        let mut observations = Vec::new();
        for chunk in mints.chunks(MAX_TOKENS_PER_CALL) {
            let chunk_vec = chunk.to_vec();
            let pairs = match self
                .retry
                .run(SOURCE_NAME, || self.fetch_pairs(&chunk_vec))
                .await
            {
                Ok(pairs) => pairs,
                Err(e) => {
                    // A failed batch loses only its own chunk
                    logger::warning(
                        LogTag::Source,
                        &format!("{}: pairs batch failed: {}", SOURCE_NAME, e),
                    );
                    continue;
                }
            };
            let observed_at = Utc::now();
            for mint in chunk {
                if let Some(observation) = aggregate_pairs(mint, &pairs, observed_at) {
                    observations.push(observation);
                } else {
                    // Profile exists but no DEX pair yet; still worth tracking
                    let mut observation = RawTokenObservation::new(mint, DataSource::DexScreener);
                    observation.observed_at = observed_at;
                    observations.push(observation);
                }
            }
        }

        logger::debug(
            LogTag::Source,
            &format!("{}: {} observations", SOURCE_NAME, observations.len()),
        );
        Ok(observations)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pair(liq: f64, price: &str, vol24: f64) -> DexPair {
        DexPair {
            chain_id: "solana".to_string(),
            base_token: BaseToken {
                address: "So11111111111111111111111111111111111111112".to_string(),
                name: Some("Wrapped SOL".to_string()),
                symbol: Some("SOL".to_string()),
            },
            price_usd: Some(price.to_string()),
            txns: Some(TxnWindows {
                h1: Some(TxnStats {
                    buys: Some(5),
                    sells: Some(3),
                }),
                h6: None,
                h24: Some(TxnStats {
                    buys: Some(50),
                    sells: Some(40),
                }),
            }),
            volume: Some(VolumeWindows {
                h1: Some(100.0),
                h6: None,
                h24: Some(vol24),
            }),
            liquidity: Some(Liquidity { usd: Some(liq) }),
            market_cap: Some(1_000_000.0),
            pair_created_at: Some(1_700_000_000_000),
        }
    }

    #[test]
    fn aggregates_across_pools() {
        let mint = "So11111111111111111111111111111111111111112";
        let pairs = vec![pair(8_000.0, "1.00", 500.0), pair(2_000.0, "1.10", 300.0)];
        let observation = aggregate_pairs(mint, &pairs, Utc::now()).unwrap();

        assert_eq!(observation.fields.liquidity_usd, Some(10_000.0));
        assert_eq!(observation.fields.volume_24h, Some(800.0));
        assert_eq!(observation.fields.pool_count, Some(2));
        assert_eq!(observation.fields.txns_24h_buys, Some(100));
        // Price from the deepest pool, not the last one parsed
        assert_eq!(observation.fields.price_usd, Some(1.00));
        assert_eq!(observation.symbol.as_deref(), Some("SOL"));
    }

    #[test]
    fn other_chains_are_ignored() {
        let mint = "So11111111111111111111111111111111111111112";
        let mut foreign = pair(8_000.0, "1.00", 500.0);
        foreign.chain_id = "ethereum".to_string();
        assert!(aggregate_pairs(mint, &[foreign], Utc::now()).is_none());
    }
}
