//! Merge engine: folds raw observations into canonical tokens
//!
//! The only writer of canonical token state. Each observation is applied
//! under a per-mint lock so concurrent adapters never interleave partial
//! updates for the same token. Field overlay is recency-based per field:
//! a slow source can add fields a fast source does not carry, but can never
//! clobber a fresher value of the same field.

use crate::config::{ScannerConfig, ScoringConfig};
use crate::errors::{PipelineError, PipelineResult};
use crate::logger::{self, LogTag};
use crate::scoring::ScoringEngine;
use crate::sources::is_valid_mint;
use crate::store::TokenStore;
use crate::types::{
    CanonicalToken, MarketField, MergeOutcome, MergeResult, RawTokenObservation, SnapshotReason,
    TokenStatus,
};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Overlay one observed field onto the canonical record when the
/// observation is fresher than the last write of that field.
macro_rules! overlay_field {
    ($token:expr, $fields:expr, $at:expr, $( $field:ident => $key:expr ),+ $(,)?) => {
        $(
            if let Some(value) = $fields.$field {
                let fresher = match $token.field_seen_at.get(&$key) {
                    Some(seen) => $at > *seen,
                    None => true,
                };
                if fresher {
                    $token.market_fields.$field = Some(value);
                    $token.field_seen_at.insert($key, $at);
                }
            }
        )+
    };
}

pub struct MergeEngine {
    store: Arc<TokenStore>,
    scoring: ScoringEngine,
    scoring_config: ScoringConfig,
    scanner_config: ScannerConfig,
    // Per-mint write locks; the map itself is only held long enough to
    // clone the entry
    locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl MergeEngine {
    pub fn new(
        store: Arc<TokenStore>,
        scoring_config: ScoringConfig,
        scanner_config: ScannerConfig,
    ) -> Self {
        Self {
            store,
            scoring: ScoringEngine::new(scoring_config.clone()),
            scoring_config,
            scanner_config,
            locks: Mutex::new(HashMap::new()),
        }
    }

    async fn lock_for(&self, mint: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks
            .entry(mint.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Fold one observation into the canonical store.
    pub async fn apply(&self, observation: RawTokenObservation) -> PipelineResult<MergeOutcome> {
        if !is_valid_mint(&observation.mint) {
            return Err(PipelineError::malformed(
                observation.source.as_str(),
                &observation.mint,
                "invalid mint address",
            ));
        }

        let lock = self.lock_for(&observation.mint).await;
        let _guard = lock.lock().await;

        let existing = self.store.get_token(&observation.mint)?;
        let is_new = existing.is_none();
        let mut token = existing.unwrap_or_else(|| {
            let mut token =
                CanonicalToken::new(observation.mint.clone(), observation.observed_at);
            // Registry-only discoveries have no DEX data yet
            if observation.fields.is_empty() {
                token.status = TokenStatus::NoDexData;
            }
            token
        });

        let before_fields = token.market_fields.clone();
        let before_status = token.status;
        let before_identity = (token.symbol.clone(), token.name.clone());
        let previous_risk = token.risk_score;

        self.overlay(&mut token, &observation);

        let new_status = self.derive_status(&token);
        token.status = new_status;

        // Every merge counts as a sighting, even when nothing changed;
        // staleness maintenance keys off this timestamp
        token.updated_at = Utc::now();

        // Score against history; the full window back to discovery so the
        // rug check sees the liquidity peak
        let history = self
            .store
            .history(&token.mint, token.first_discovered_at - Duration::hours(1))?;
        let scores = self.scoring.score(&token, &history)?;
        token.risk_score = scores.risk_score;
        token.invest_score = scores.invest_score;

        // Blacklisting takes both signals: composite risk over the hard
        // threshold and a confirmed rug rule
        if token.status != TokenStatus::Blacklisted
            && token.risk_score >= self.scoring_config.blacklist_threshold
        {
            if let Some(reason) = self.scoring.confirm_rug(&token, &history) {
                token.status = token.status.advance(TokenStatus::Blacklisted);
                token.blacklist_reason = Some(reason.clone());
                logger::warning(
                    LogTag::Merge,
                    &format!("{} blacklisted: {}", token.mint, reason),
                );
            }
        }

        let changed = is_new
            || token.market_fields != before_fields
            || token.status != before_status
            || (token.symbol.clone(), token.name.clone()) != before_identity;

        self.upsert_with_retry(&token).await?;

        let status_change = if token.status != before_status && !is_new {
            Some((before_status, token.status))
        } else {
            None
        };

        if status_change.is_some() {
            self.store
                .append_snapshot(&token, SnapshotReason::StatusChange)?;
        } else if !is_new
            && (token.risk_score - previous_risk).abs() >= self.scoring_config.snapshot_risk_delta
        {
            self.store.append_snapshot(&token, SnapshotReason::Threshold)?;
        }

        let result = if is_new {
            logger::info(
                LogTag::Merge,
                &format!(
                    "new token {} via {} ({})",
                    token.mint,
                    observation.source,
                    token.status
                ),
            );
            MergeResult::Created
        } else if changed {
            MergeResult::Updated
        } else {
            MergeResult::Unchanged
        };

        Ok(MergeOutcome {
            result,
            status_change,
            token,
        })
    }

    fn overlay(&self, token: &mut CanonicalToken, observation: &RawTokenObservation) {
        let at = observation.observed_at;

        // Discovery time only moves backwards: a source that saw the token
        // earlier wins
        if at < token.first_discovered_at {
            token.first_discovered_at = at;
        }

        if let Some(symbol) = &observation.symbol {
            let fresher = match token.field_seen_at.get(&MarketField::Symbol) {
                Some(seen) => at > *seen,
                None => true,
            };
            if fresher {
                token.symbol = Some(symbol.clone());
                token.field_seen_at.insert(MarketField::Symbol, at);
            }
        }
        if let Some(name) = &observation.name {
            let fresher = match token.field_seen_at.get(&MarketField::Name) {
                Some(seen) => at > *seen,
                None => true,
            };
            if fresher {
                token.name = Some(name.clone());
                token.field_seen_at.insert(MarketField::Name, at);
            }
        }

        overlay_field!(token, observation.fields, at,
            price_usd => MarketField::PriceUsd,
            liquidity_usd => MarketField::LiquidityUsd,
            volume_1h => MarketField::Volume1h,
            volume_6h => MarketField::Volume6h,
            volume_24h => MarketField::Volume24h,
            market_cap => MarketField::MarketCap,
            txns_1h_buys => MarketField::Txns1hBuys,
            txns_1h_sells => MarketField::Txns1hSells,
            txns_6h_buys => MarketField::Txns6hBuys,
            txns_6h_sells => MarketField::Txns6hSells,
            txns_24h_buys => MarketField::Txns24hBuys,
            txns_24h_sells => MarketField::Txns24hSells,
            holder_count => MarketField::HolderCount,
            top_holder_pct => MarketField::TopHolderPct,
            pool_count => MarketField::PoolCount,
            bonding_curve_progress => MarketField::BondingCurveProgress,
            pair_created_at => MarketField::PairCreatedAt,
        );
    }

    /// Walk the forward chain as far as the merged fields support.
    ///
    /// Each `advance` call moves at most one step, so the ladder is walked
    /// in order and stops at the first state without evidence.
    fn derive_status(&self, token: &CanonicalToken) -> TokenStatus {
        let fields = &token.market_fields;
        let mut status = token.status;

        if !fields.is_empty() {
            status = status.advance(TokenStatus::Created);
        }
        let trading = fields.txns_24h_total().map(|t| t > 0).unwrap_or(false)
            || fields.volume_24h.map(|v| v > 0.0).unwrap_or(false)
            || fields.liquidity_usd.map(|l| l > 0.0).unwrap_or(false);
        if trading {
            status = status.advance(TokenStatus::Active);
        }
        let curve_done = fields
            .bonding_curve_progress
            .map(|p| p >= 100.0)
            .unwrap_or(false);
        if curve_done {
            status = status.advance(TokenStatus::Completed);
        }
        if curve_done && fields.pool_count.map(|p| p >= 1).unwrap_or(false) {
            status = status.advance(TokenStatus::Migrated);
        }
        status
    }

    async fn upsert_with_retry(&self, token: &CanonicalToken) -> PipelineResult<()> {
        match self.store.upsert_canonical(token) {
            Err(PipelineError::StoreWriteConflict { .. }) => {
                // WAL writers back off briefly; one retry covers the
                // transient busy case
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                self.store.upsert_canonical(token)
            }
            other => other,
        }
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    /// Archive tokens with no updates since `cutoff`. Returns how many moved.
    pub async fn archive_stale(&self, cutoff: DateTime<Utc>) -> PipelineResult<u64> {
        let mut archived = 0u64;
        for mint in self.store.list_stale(cutoff)? {
            let lock = self.lock_for(&mint).await;
            let _guard = lock.lock().await;
            let Some(mut token) = self.store.get_token(&mint)? else {
                continue;
            };
            let next = token.status.advance(TokenStatus::Archived);
            if next == token.status {
                continue;
            }
            token.status = next;
            token.updated_at = Utc::now();
            self.upsert_with_retry(&token).await?;
            self.store
                .append_snapshot(&token, SnapshotReason::StatusChange)?;
            archived += 1;
        }
        if archived > 0 {
            logger::info(LogTag::Merge, &format!("archived {} stale tokens", archived));
        }
        Ok(archived)
    }

    /// Terminate tokens that never produced DEX data within the abandonment
    /// window. Only pre-active states qualify.
    pub async fn terminate_abandoned(&self, cutoff: DateTime<Utc>) -> PipelineResult<u64> {
        let mut terminated = 0u64;
        for status in [TokenStatus::NoDexData, TokenStatus::Created] {
            let query = crate::store::TokenQuery {
                status: Some(status),
                ..Default::default()
            };
            for token in self.store.query(&query)?.items {
                if token.first_discovered_at >= cutoff {
                    continue;
                }
                let lock = self.lock_for(&token.mint).await;
                let _guard = lock.lock().await;
                let Some(mut token) = self.store.get_token(&token.mint)? else {
                    continue;
                };
                let next = token.status.advance(TokenStatus::Terminated);
                if next == token.status {
                    continue;
                }
                token.status = next;
                token.updated_at = Utc::now();
                self.upsert_with_retry(&token).await?;
                self.store
                    .append_snapshot(&token, SnapshotReason::StatusChange)?;
                terminated += 1;
            }
        }
        if terminated > 0 {
            logger::info(
                LogTag::Merge,
                &format!("terminated {} abandoned tokens", terminated),
            );
        }
        Ok(terminated)
    }

    /// Drop per-mint locks nobody currently holds.
    ///
    /// The map only grows during merging; a lock with no outstanding clone
    /// cannot be contended, so it is safe to forget and recreate on demand.
    pub async fn prune_locks(&self) -> usize {
        let mut locks = self.locks.lock().await;
        let before = locks.len();
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        let pruned = before - locks.len();
        if pruned > 0 {
            logger::debug(
                LogTag::Merge,
                &format!("pruned {} idle mint locks", pruned),
            );
        }
        pruned
    }

    /// Periodic snapshot pass over all live tokens
    pub async fn snapshot_live(&self) -> PipelineResult<u64> {
        let mut written = 0u64;
        for mint in self.store.list_live()? {
            let Some(token) = self.store.get_token(&mint)? else {
                continue;
            };
            if self.store.append_snapshot(&token, SnapshotReason::Periodic)? {
                written += 1;
            }
        }
        Ok(written)
    }

    pub fn archive_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.scanner_config.archive_after_days as i64)
    }

    pub fn terminate_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::hours(self.scanner_config.terminate_after_hours as i64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::{DataSource, MarketFields};

    const MINT: &str = "So11111111111111111111111111111111111111112";
    const MINT_B: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    fn engine() -> MergeEngine {
        let config = Config::default();
        let store = Arc::new(TokenStore::open_in_memory().unwrap());
        MergeEngine::new(store, config.scoring, config.scanner)
    }

    fn observation(mint: &str, fields: MarketFields) -> RawTokenObservation {
        let mut obs = RawTokenObservation::new(mint, DataSource::DexScreener);
        obs.fields = fields;
        obs
    }

    #[tokio::test]
    async fn registry_discovery_enters_as_no_dex_data() {
        let engine = engine();
        let obs = RawTokenObservation::new(MINT, DataSource::Rugcheck);
        let outcome = engine.apply(obs).await.unwrap();
        assert_eq!(outcome.result, MergeResult::Created);
        assert_eq!(outcome.token.status, TokenStatus::NoDexData);
    }

    #[tokio::test]
    async fn dex_discovery_walks_to_active() {
        let engine = engine();
        let fields = MarketFields {
            price_usd: Some(0.001),
            liquidity_usd: Some(20_000.0),
            volume_24h: Some(5_000.0),
            txns_24h_buys: Some(40),
            txns_24h_sells: Some(25),
            ..MarketFields::default()
        };
        let outcome = engine.apply(observation(MINT, fields)).await.unwrap();
        assert_eq!(outcome.token.status, TokenStatus::Active);
    }

    #[tokio::test]
    async fn reapplying_same_observation_is_unchanged() {
        let engine = engine();
        let fields = MarketFields {
            price_usd: Some(0.5),
            liquidity_usd: Some(30_000.0),
            ..MarketFields::default()
        };
        let obs = observation(MINT, fields);
        let first = engine.apply(obs.clone()).await.unwrap();
        assert_eq!(first.result, MergeResult::Created);
        let second = engine.apply(obs).await.unwrap();
        assert_eq!(second.result, MergeResult::Unchanged);
        assert!(second.status_change.is_none());
    }

    #[tokio::test]
    async fn stale_observation_cannot_clobber_fresh_field() {
        let engine = engine();

        let mut fresh = observation(
            MINT,
            MarketFields {
                price_usd: Some(2.0),
                ..MarketFields::default()
            },
        );
        fresh.observed_at = Utc::now();
        engine.apply(fresh).await.unwrap();

        let mut stale = observation(
            MINT,
            MarketFields {
                price_usd: Some(1.0),
                liquidity_usd: Some(9_000.0),
                ..MarketFields::default()
            },
        );
        stale.observed_at = Utc::now() - Duration::minutes(10);
        let outcome = engine.apply(stale).await.unwrap();

        // Stale price rejected, but the field the fresh source never
        // carried still lands
        assert_eq!(outcome.token.market_fields.price_usd, Some(2.0));
        assert_eq!(outcome.token.market_fields.liquidity_usd, Some(9_000.0));
    }

    #[tokio::test]
    async fn status_never_moves_backwards() {
        let engine = engine();
        let active = MarketFields {
            liquidity_usd: Some(25_000.0),
            volume_24h: Some(8_000.0),
            ..MarketFields::default()
        };
        engine.apply(observation(MINT, active)).await.unwrap();

        // A later observation with no activity must not demote the token
        let mut quiet = observation(MINT, MarketFields::default());
        quiet.fields.price_usd = Some(0.002);
        let outcome = engine.apply(quiet).await.unwrap();
        assert_eq!(outcome.token.status, TokenStatus::Active);
    }

    #[tokio::test]
    async fn completion_cannot_skip_steps() {
        let engine = engine();
        // First sighting already claims a finished curve; the walk still
        // has to pass through created and active
        let fields = MarketFields {
            liquidity_usd: Some(40_000.0),
            volume_24h: Some(15_000.0),
            bonding_curve_progress: Some(100.0),
            pool_count: Some(2),
            ..MarketFields::default()
        };
        let outcome = engine.apply(observation(MINT, fields)).await.unwrap();
        assert_eq!(outcome.token.status, TokenStatus::Migrated);
        assert!(outcome.status_change.is_none());
    }

    #[tokio::test]
    async fn blacklist_is_sticky() {
        let engine = engine();

        // Build a liquidity peak, then drain it into a concentrated wreck
        // so the composite risk clears the threshold too
        let rich = MarketFields {
            liquidity_usd: Some(100_000.0),
            volume_24h: Some(20_000.0),
            ..MarketFields::default()
        };
        let outcome = engine.apply(observation(MINT, rich)).await.unwrap();
        engine
            .store
            .append_snapshot(&outcome.token, SnapshotReason::Manual)
            .unwrap();

        let mut drained = observation(
            MINT,
            MarketFields {
                liquidity_usd: Some(500.0),
                holder_count: Some(5),
                top_holder_pct: Some(92.0),
                ..MarketFields::default()
            },
        );
        drained.observed_at = Utc::now() + Duration::seconds(1);
        let outcome = engine.apply(drained).await.unwrap();
        assert_eq!(outcome.token.status, TokenStatus::Blacklisted);
        assert!(outcome.token.blacklist_reason.is_some());

        // Liquidity coming back does not clear the flag
        let mut recovered = observation(
            MINT,
            MarketFields {
                liquidity_usd: Some(150_000.0),
                ..MarketFields::default()
            },
        );
        recovered.observed_at = Utc::now() + Duration::seconds(2);
        let outcome = engine.apply(recovered).await.unwrap();
        assert_eq!(outcome.token.status, TokenStatus::Blacklisted);
    }

    #[tokio::test]
    async fn rug_rule_alone_does_not_blacklist() {
        let engine = engine();

        // Same liquidity collapse, but the token is otherwise healthy:
        // thousands of holders, well-spread supply
        let rich = MarketFields {
            liquidity_usd: Some(120_000.0),
            volume_24h: Some(30_000.0),
            ..MarketFields::default()
        };
        let outcome = engine.apply(observation(MINT, rich)).await.unwrap();
        engine
            .store
            .append_snapshot(&outcome.token, SnapshotReason::Manual)
            .unwrap();

        let mut drained = observation(
            MINT,
            MarketFields {
                liquidity_usd: Some(4_000.0),
                holder_count: Some(5_000),
                top_holder_pct: Some(12.0),
                ..MarketFields::default()
            },
        );
        drained.observed_at = Utc::now() + Duration::seconds(1);
        let outcome = engine.apply(drained).await.unwrap();

        // Composite risk stays under the threshold, so the confirmed
        // collapse on its own must not blacklist
        assert!(outcome.token.risk_score < engine.scoring_config.blacklist_threshold);
        assert_eq!(outcome.token.status, TokenStatus::Active);
        assert!(outcome.token.blacklist_reason.is_none());
    }

    #[tokio::test]
    async fn unchanged_merge_still_refreshes_updated_at() {
        let engine = engine();
        let fields = MarketFields {
            price_usd: Some(0.25),
            liquidity_usd: Some(12_000.0),
            ..MarketFields::default()
        };
        let obs = observation(MINT, fields);
        let first = engine.apply(obs.clone()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        let second = engine.apply(obs).await.unwrap();

        // The record did not change, but the sighting itself must still
        // count or staleness maintenance would archive a live token
        assert_eq!(second.result, MergeResult::Unchanged);
        assert!(second.token.updated_at > first.token.updated_at);
    }

    #[tokio::test]
    async fn invalid_mint_rejected() {
        let engine = engine();
        let obs = RawTokenObservation::new("zzz", DataSource::GeckoTerminal);
        let err = engine.apply(obs).await.unwrap_err();
        assert!(matches!(err, PipelineError::MalformedObservation { .. }));
    }

    #[tokio::test]
    async fn idle_mint_locks_are_pruned() {
        let engine = engine();
        for mint in [MINT, MINT_B] {
            let fields = MarketFields {
                price_usd: Some(0.1),
                ..MarketFields::default()
            };
            engine.apply(observation(mint, fields)).await.unwrap();
        }
        assert_eq!(engine.locks.lock().await.len(), 2);

        // A lock some task still holds survives the prune
        let held = engine.lock_for(MINT).await;
        let pruned = engine.prune_locks().await;
        assert_eq!(pruned, 1);
        {
            let remaining = engine.locks.lock().await;
            assert_eq!(remaining.len(), 1);
            assert!(remaining.contains_key(MINT));
        }
        drop(held);
        assert_eq!(engine.prune_locks().await, 1);
    }

    #[tokio::test]
    async fn maintenance_terminates_and_archives() {
        let engine = engine();

        // Abandoned registry discovery, far past the window
        let mut obs = RawTokenObservation::new(MINT, DataSource::Rugcheck);
        obs.observed_at = Utc::now() - Duration::days(10);
        engine.apply(obs).await.unwrap();

        // Active token that went quiet for a month
        let fields = MarketFields {
            liquidity_usd: Some(15_000.0),
            volume_24h: Some(3_000.0),
            ..MarketFields::default()
        };
        engine.apply(observation(MINT_B, fields)).await.unwrap();

        let now = Utc::now();
        let terminated = engine
            .terminate_abandoned(engine.terminate_cutoff(now))
            .await
            .unwrap();
        assert_eq!(terminated, 1);
        assert_eq!(
            engine.store.get_token(MINT).unwrap().unwrap().status,
            TokenStatus::Terminated
        );

        // Nothing is stale yet for archiving
        let archived = engine.archive_stale(engine.archive_cutoff(now)).await.unwrap();
        assert_eq!(archived, 0);
        assert_eq!(
            engine.store.get_token(MINT_B).unwrap().unwrap().status,
            TokenStatus::Active
        );
    }
}
