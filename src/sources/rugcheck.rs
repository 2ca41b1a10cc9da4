//! Rugcheck adapter: token-registry feed plus holder-distribution lookups
//!
//! The new-tokens feed is registry-style: it names fresh mints before any
//! DEX data exists, so its observations usually carry no market fields and
//! enter the pipeline as `no_dex_data`. The per-token report endpoint
//! supplies holder counts and top-holder concentration used by the scoring
//! enrichment path (always behind the risk cache, never called directly).

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

const SOURCE_NAME: &'static str = "rugcheck";

#[derive(Debug, Deserialize)]
struct NewToken {
    mint: String,
    symbol: Option<String>,
    #[serde(rename = "createAt")]
    create_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenReport {
    #[serde(rename = "totalHolders")]
    total_holders: Option<i64>,
    #[serde(rename = "topHolders")]
    top_holders: Option<Vec<ReportHolder>>,
}

#[derive(Debug, Deserialize)]
struct ReportHolder {
    pct: Option<f64>,
}

/// Holder distribution summary cached by the enrichment path
#[derive(Debug, Clone)]
pub struct HolderSummary {
    pub holder_count: i64,
    /// Combined share of the top ten holders, 0-100
    pub top_holder_pct: f64,
}

pub struct RugcheckSource {
    client: Client,
    base_url: String,
    api_key: Option<String>,
    gate: RateGate,
    retry: RetryPolicy,
}

impl RugcheckSource {
    pub fn new(client: Client, config: &SourceConfig, retry: &RetryConfig) -> Self {
        Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            gate: RateGate::new(Duration::from_millis(config.min_request_interval_ms)),
            retry: RetryPolicy::new(retry),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> PipelineResult<T> {
        self.gate.acquire().await;
        let mut request = self.client.get(url).header("accept", "application/json");
        if let Some(key) = &self.api_key {
            request = request.header("Authorization", format!("Bearer {}", key));
        }
        let response = request
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
        response
            .json()
            .await
            .map_err(|e| PipelineError::SourceUnavailable {
                source: SOURCE_NAME.to_string(),
                attempts: 1,
                last_error: format!("response parse failed: {}", e),
            })
    }

    /// Fetch the holder distribution for one mint.
    ///
    /// Callers go through the risk cache (`get_or_fetch`) so concurrent
    /// scoring passes share a single upstream call per mint per TTL.
    pub async fn fetch_holder_summary(&self, mint: &str) -> PipelineResult<HolderSummary> {
        if !is_valid_mint(mint) {
            return Err(PipelineError::malformed(
                SOURCE_NAME,
                mint,
                "invalid mint address",
            ));
        }
        let url = format!("{}/tokens/{}/report", self.base_url, mint);
        let report: TokenReport = self.retry.run(SOURCE_NAME, || self.get_json(&url)).await?;

        let top_holder_pct = report
            .top_holders
            .as_ref()
            .map(|holders| {
                holders
                    .iter()
                    .take(10)
                    .filter_map(|h| h.pct)
                    .sum::<f64>()
                    .min(100.0)
            })
            .unwrap_or(0.0);

        Ok(HolderSummary {
            holder_count: report.total_holders.unwrap_or(0),
            top_holder_pct,
        })
    }
}

#[async_trait]
impl SourceAdapter for RugcheckSource {
    fn name(&self) -> &'static str {
        SOURCE_NAME
    }

    async fn fetch_recent(
        &self,
        _since: DateTime<Utc>,
        limit: usize,
    ) -> PipelineResult<Vec<RawTokenObservation>> {
        let url = format!("{}/stats/new_tokens", self.base_url);
        let tokens: Vec<NewToken> = self.retry.run(SOURCE_NAME, || self.get_json(&url)).await?;

        let mut observations = Vec::new();
        let mut dropped = 0usize;
        for token in tokens {
            if !is_valid_mint(&token.mint) {
                dropped += 1;
                continue;
            }
            let mut observation = RawTokenObservation::new(&token.mint, DataSource::Rugcheck);
            observation.symbol = token.symbol.clone().filter(|s| !s.is_empty());
            // Registry timestamps are when the mint was created, which is a
            // better discovery time than "now" for very fresh tokens
            if let Some(created) = token
                .create_at
                .as_ref()
                .and_then(|t| DateTime::parse_from_rfc3339(t).ok())
            {
                let created = created.with_timezone(&Utc);
                if created <= Utc::now() {
                    observation.observed_at = created;
                }
            }
            observations.push(observation);
            if observations.len() >= limit {
                break;
            }
        }

        if dropped > 0 {
            logger::warning(
                LogTag::Source,
                &format!("{}: dropped {} invalid mints", SOURCE_NAME, dropped),
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

    #[test]
    fn holder_summary_sums_top_ten() {
        let report = TokenReport {
            total_holders: Some(420),
            top_holders: Some(
                (0..15)
                    .map(|_| ReportHolder { pct: Some(5.0) })
                    .collect::<Vec<_>>(),
            ),
        };
        // Mirrors the aggregation in fetch_holder_summary
        let pct: f64 = report
            .top_holders
            .as_ref()
            .unwrap()
            .iter()
            .take(10)
            .filter_map(|h| h.pct)
            .sum();
        assert_eq!(pct, 50.0);
    }
}
