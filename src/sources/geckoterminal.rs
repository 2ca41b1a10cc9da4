//! GeckoTerminal adapter: newly created Solana pools
//!
//! Complements DexScreener coverage; many young tokens show up in one feed
//! before the other. Pool attributes are normalized into the shared sparse
//! observation format, numeric values arrive as strings and are parsed
//! defensively (a malformed item is dropped, never fatal to the page).

use super::{is_valid_mint, status_to_error, RateGate, RetryPolicy, SourceAdapter};
use crate::config::{RetryConfig, SourceConfig};
use crate::errors::{PipelineError, PipelineResult};
use crate::logger::{self, LogTag};
use crate::types::{DataSource, RawTokenObservation};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

const SOURCE_NAME: &'static str = "geckoterminal";

#[derive(Debug, Deserialize)]
struct NewPoolsResponse {
    data: Option<Vec<PoolData>>,
}

#[derive(Debug, Deserialize)]
struct PoolData {
    attributes: Option<PoolAttributes>,
    relationships: Option<PoolRelationships>,
}

#[derive(Debug, Deserialize)]
struct PoolAttributes {
    name: Option<String>,
    base_token_price_usd: Option<String>,
    reserve_in_usd: Option<String>,
    market_cap_usd: Option<String>,
    pool_created_at: Option<String>,
    volume_usd: Option<VolumeUsd>,
    transactions: Option<Transactions>,
}

#[derive(Debug, Deserialize)]
struct VolumeUsd {
    h1: Option<String>,
    h6: Option<String>,
    h24: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Transactions {
    h1: Option<TxnCounts>,
    h6: Option<TxnCounts>,
    h24: Option<TxnCounts>,
}

#[derive(Debug, Deserialize)]
struct TxnCounts {
    buys: Option<i64>,
    sells: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct PoolRelationships {
    base_token: Option<RelationshipData>,
}

#[derive(Debug, Deserialize)]
struct RelationshipData {
    data: Option<RelationshipRef>,
}

#[derive(Debug, Deserialize)]
struct RelationshipRef {
    /// Formatted as "solana_<mint>"
    id: String,
}

pub struct GeckoTerminalSource {
    client: Client,
    base_url: String,
    gate: RateGate,
    retry: RetryPolicy,
}

impl GeckoTerminalSource {
    pub fn new(client: Client, config: &SourceConfig, retry: &RetryConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            gate: RateGate::new(Duration::from_millis(config.min_request_interval_ms)),
            retry: RetryPolicy::new(retry),
        }
    }

    async fn fetch_new_pools(&self) -> PipelineResult<Vec<PoolData>> {
        self.gate.acquire().await;
        let url = format!("{}/networks/solana/new_pools?page=1", self.base_url);
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
        let parsed: NewPoolsResponse =
            response
                .json()
                .await
                .map_err(|e| PipelineError::SourceUnavailable {
                    source: SOURCE_NAME.to_string(),
                    attempts: 1,
                    last_error: format!("new_pools parse failed: {}", e),
                })?;
        Ok(parsed.data.unwrap_or_default())
    }
}

fn parse_f64(value: &Option<String>) -> Option<f64> {
    value.as_ref().and_then(|v| v.parse::<f64>().ok())
}

/// Convert one pool entry into an observation, or None when the entry is
/// missing its token reference or carries an invalid mint
fn pool_to_observation(pool: &PoolData, observed_at: DateTime<Utc>) -> Option<RawTokenObservation> {
    let token_id = &pool
        .relationships
        .as_ref()?
        .base_token
        .as_ref()?
        .data
        .as_ref()?
        .id;
    let mint = token_id.strip_prefix("solana_")?;
    if !is_valid_mint(mint) {
        return None;
    }

    let mut observation = RawTokenObservation::new(mint, DataSource::GeckoTerminal);
    observation.observed_at = observed_at;

    if let Some(attrs) = &pool.attributes {
        // Pool names look like "TOKEN / SOL"
        observation.symbol = attrs
            .name
            .as_ref()
            .and_then(|n| n.split('/').next())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        observation.fields.price_usd = parse_f64(&attrs.base_token_price_usd);
        observation.fields.liquidity_usd = parse_f64(&attrs.reserve_in_usd);
        observation.fields.market_cap = parse_f64(&attrs.market_cap_usd);
        observation.fields.pool_count = Some(1);
        observation.fields.pair_created_at = attrs
            .pool_created_at
            .as_ref()
            .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            .map(|t| t.with_timezone(&Utc));

        if let Some(volume) = &attrs.volume_usd {
            observation.fields.volume_1h = parse_f64(&volume.h1);
            observation.fields.volume_6h = parse_f64(&volume.h6);
            observation.fields.volume_24h = parse_f64(&volume.h24);
        }
        if let Some(txns) = &attrs.transactions {
            if let Some(h1) = &txns.h1 {
                observation.fields.txns_1h_buys = h1.buys;
                observation.fields.txns_1h_sells = h1.sells;
            }
            if let Some(h6) = &txns.h6 {
                observation.fields.txns_6h_buys = h6.buys;
                observation.fields.txns_6h_sells = h6.sells;
            }
            if let Some(h24) = &txns.h24 {
                observation.fields.txns_24h_buys = h24.buys;
                observation.fields.txns_24h_sells = h24.sells;
            }
        }
    }

    Some(observation)
}

#[async_trait]
impl SourceAdapter for GeckoTerminalSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_recent(
        &self,
        _since: DateTime<Utc>,
        limit: usize,
    ) -> PipelineResult<Vec<RawTokenObservation>> {
        let pools = self
            .retry
            .run(SOURCE_NAME, || self.fetch_new_pools())
            .await?;
        let observed_at = Utc::now();

        let mut observations = Vec::new();
        let mut dropped = 0usize;
        for pool in &pools {
            match pool_to_observation(pool, observed_at) {
                Some(observation) => {
                    observations.push(observation);
                    if observations.len() >= limit {
                        break;
                    }
                }
                None => dropped += 1,
            }
        }
        if dropped > 0 {
            logger::warning(
                LogTag::Source,
                &format!("{}: dropped {} malformed pool entries", SOURCE_NAME, dropped),
            );
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

    fn pool(mint: &str) -> PoolData {
        PoolData {
            attributes: Some(PoolAttributes {
                name: Some("WIF / SOL".to_string()),
                base_token_price_usd: Some("0.0042".to_string()),
                reserve_in_usd: Some("12500.5".to_string()),
                market_cap_usd: None,
                pool_created_at: Some("2024-05-01T12:00:00Z".to_string()),
                volume_usd: Some(VolumeUsd {
                    h1: Some("150.0".to_string()),
                    h6: None,
                    h24: Some("900.0".to_string()),
                }),
                transactions: Some(Transactions {
                    h1: Some(TxnCounts {
                        buys: Some(12),
                        sells: Some(4),
                    }),
                    h6: None,
                    h24: None,
                }),
            }),
            relationships: Some(PoolRelationships {
                base_token: Some(RelationshipData {
                    data: Some(RelationshipRef {
                        id: format!("solana_{}", mint),
                    }),
                }),
            }),
        }
    }

    #[test]
    fn pool_entry_maps_to_sparse_observation() {
        let mint = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";
        let observation = pool_to_observation(&pool(mint), Utc::now()).unwrap();
        assert_eq!(observation.mint, mint);
        assert_eq!(observation.symbol.as_deref(), Some("WIF"));
        assert_eq!(observation.fields.price_usd, Some(0.0042));
        assert_eq!(observation.fields.liquidity_usd, Some(12500.5));
        assert_eq!(observation.fields.volume_6h, None);
        assert_eq!(observation.fields.txns_1h_buys, Some(12));
        // Missing attributes stay unknown, not zero
        assert_eq!(observation.fields.market_cap, None);
        assert_eq!(observation.fields.holder_count, None);
    }

    #[test]
    fn invalid_mint_is_dropped() {
        let bad = pool("not-a-mint");
        assert!(pool_to_observation(&bad, Utc::now()).is_none());
    }
}
