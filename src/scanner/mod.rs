//! Pipeline orchestration
//!
//! `Pipeline` is the public surface: one-shot scans, token queries, risk
//! reports and the health check. `Scanner` is the daemon around it: one
//! recurring task per enabled adapter feeding a bounded queue, a merge
//! worker pool draining it, and a maintenance task for cache sweeps,
//! periodic snapshots and the staleness passes.

use crate::cache::TtlCache;
use crate::config::Config;
use crate::errors::{PipelineError, PipelineResult};
use crate::events::{EventBus, LogSink, NotificationSink, PipelineEvent};
use crate::logger::{self, LogTag};
use crate::merge::MergeEngine;
use crate::scoring::ScoringEngine;
use crate::sources::{
    DexScreenerSource, GeckoTerminalSource, HolderSummary, RugcheckSource, SourceAdapter,
};
use crate::store::{QueryResult, TokenQuery, TokenStore};
use crate::types::{
    CanonicalToken, DataSource, MergeOutcome, MergeResult, PipelineHealth, RawTokenObservation,
    ScanSummary, ScoreResult, Snapshot, SourceError, SourceHealth, TokenStatus,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, Mutex, Notify};

/// Consecutive failures before a source counts against pipeline health
const FAILURE_BUDGET: u32 = 3;

/// Upper bound on enrichment lookups per scan pass
const ENRICH_BATCH: usize = 25;

pub struct Pipeline {
    config: Config,
    store: Arc<TokenStore>,
    merge: Arc<MergeEngine>,
    scoring: ScoringEngine,
    events: EventBus,
    adapters: Vec<Arc<dyn SourceAdapter>>,
    /// Enrichment handles, present when the matching source is enabled
    dexscreener: Option<Arc<DexScreenerSource>>,
    rugcheck: Option<Arc<RugcheckSource>>,
    market_cache: TtlCache<crate::types::MarketFields>,
    holder_cache: TtlCache<HolderSummary>,
    source_health: RwLock<HashMap<String, SourceHealth>>,
    last_scan: RwLock<Option<DateTime<Utc>>>,
}

impl Pipeline {
    pub fn new(config: Config) -> PipelineResult<Arc<Self>> {
        let store = Arc::new(TokenStore::open(std::path::Path::new(
            &config.database.path,
        ))?);

        let mut adapters: Vec<Arc<dyn SourceAdapter>> = Vec::new();
        let mut dexscreener = None;
        let mut rugcheck = None;

        if config.sources.dexscreener.enabled {
            let source = Arc::new(DexScreenerSource::new(
                build_client(config.sources.dexscreener.timeout_seconds)?,
                &config.sources.dexscreener,
                &config.retry,
            ));
            dexscreener = Some(source.clone());
            adapters.push(source);
        }
        if config.sources.geckoterminal.enabled {
            adapters.push(Arc::new(GeckoTerminalSource::new(
                build_client(config.sources.geckoterminal.timeout_seconds)?,
                &config.sources.geckoterminal,
                &config.retry,
            )));
        }
        if config.sources.rugcheck.enabled {
            let source = Arc::new(RugcheckSource::new(
                build_client(config.sources.rugcheck.timeout_seconds)?,
                &config.sources.rugcheck,
                &config.retry,
            ));
            rugcheck = Some(source.clone());
            adapters.push(source);
        }

        Ok(Self::assemble(
            config,
            store,
            adapters,
            dexscreener,
            rugcheck,
            vec![Arc::new(LogSink)],
        ))
    }

    /// Assemble a pipeline from explicit parts. Used by tests to inject
    /// stub adapters and an in-memory store.
    pub fn with_parts(
        config: Config,
        store: Arc<TokenStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Arc<Self> {
        Self::assemble(config, store, adapters, None, None, sinks)
    }

    fn assemble(
        config: Config,
        store: Arc<TokenStore>,
        adapters: Vec<Arc<dyn SourceAdapter>>,
        dexscreener: Option<Arc<DexScreenerSource>>,
        rugcheck: Option<Arc<RugcheckSource>>,
        sinks: Vec<Arc<dyn NotificationSink>>,
    ) -> Arc<Self> {
        let merge = Arc::new(MergeEngine::new(
            store.clone(),
            config.scoring.clone(),
            config.scanner.clone(),
        ));
        let max_entries = config.cache.max_entries;
        Arc::new(Self {
            scoring: ScoringEngine::new(config.scoring.clone()),
            merge,
            events: EventBus::new(sinks),
            adapters,
            dexscreener,
            rugcheck,
            market_cache: TtlCache::new("market", max_entries),
            holder_cache: TtlCache::new("holders", max_entries),
            source_health: RwLock::new(HashMap::new()),
            last_scan: RwLock::new(None),
            store,
            config,
        })
    }

    // ========================================================================
    // SCANNING
    // ========================================================================

    /// Run one pass over every adapter and fold the results into the store.
    ///
    /// Source failures land in the summary instead of failing the pass;
    /// one bad source must not hide the others' data.
    pub async fn scan_all_sources(&self) -> ScanSummary {
        let mut summary = ScanSummary::start();
        let since =
            (*self.last_scan.read()).unwrap_or_else(|| Utc::now() - ChronoDuration::hours(1));
        let limit = self.config.scanner.fetch_limit;

        let fetches = self.adapters.iter().map(|adapter| {
            let adapter = adapter.clone();
            async move {
                let result = adapter.fetch_recent(since, limit).await;
                (adapter.name(), result)
            }
        });
        let results = futures::future::join_all(fetches).await;

        let mut new_mints: Vec<String> = Vec::new();
        for (source, result) in results {
            match result {
                Ok(observations) => {
                    self.record_source_success(source);
                    for observation in observations {
                        match self.apply_observation(observation).await {
                            Ok(outcome) => {
                                if outcome.result == MergeResult::Created {
                                    new_mints.push(outcome.token.mint.clone());
                                }
                                summary.record(outcome.result);
                            }
                            Err(PipelineError::MalformedObservation { mint, reason, .. }) => {
                                summary.dropped_count += 1;
                                logger::debug(
                                    LogTag::Scanner,
                                    &format!("dropped {} from {}: {}", mint, source, reason),
                                );
                            }
                            Err(e) => {
                                summary.errors.push(SourceError {
                                    source: source.to_string(),
                                    message: e.to_string(),
                                });
                            }
                        }
                    }
                }
                Err(e) => {
                    self.record_source_failure(source, &e);
                    summary.errors.push(SourceError {
                        source: source.to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }

        self.enrich_new_tokens(&new_mints, &mut summary).await;

        *self.last_scan.write() = Some(Utc::now());
        summary.finished_at = Utc::now();
        logger::info(
            LogTag::Scanner,
            &format!(
                "scan done: {} new, {} updated, {} unchanged, {} dropped, {} errors",
                summary.new_count,
                summary.updated_count,
                summary.unchanged_count,
                summary.dropped_count,
                summary.error_count()
            ),
        );
        summary
    }

    /// Merge one observation and emit the events it produced
    pub async fn apply_observation(
        &self,
        observation: RawTokenObservation,
    ) -> PipelineResult<MergeOutcome> {
        let outcome = self.merge.apply(observation).await?;

        if outcome.result == MergeResult::Created {
            self.events.emit(PipelineEvent::NewToken {
                mint: outcome.token.mint.clone(),
                symbol: outcome.token.symbol.clone(),
                status: outcome.token.status,
            });
        }
        if let Some((from, to)) = outcome.status_change {
            if to == TokenStatus::Blacklisted {
                self.events.emit(PipelineEvent::Blacklisted {
                    mint: outcome.token.mint.clone(),
                    reason: outcome
                        .token
                        .blacklist_reason
                        .clone()
                        .unwrap_or_else(|| "risk threshold exceeded".to_string()),
                });
            } else {
                self.events.emit(PipelineEvent::StatusChange {
                    mint: outcome.token.mint.clone(),
                    from,
                    to,
                });
            }
        }
        Ok(outcome)
    }

    /// Fill gaps for freshly discovered tokens: holder distributions for
    /// mints with DEX data, and a market overview for registry-only
    /// discoveries. Both lookups go through the caches so repeated scans
    /// within a TTL never refetch.
    async fn enrich_new_tokens(&self, mints: &[String], summary: &mut ScanSummary) {
        for mint in mints.iter().take(ENRICH_BATCH) {
            let Ok(Some(token)) = self.store.get_token(mint) else {
                continue;
            };

            if token.status == TokenStatus::NoDexData {
                if let Some(dex) = &self.dexscreener {
                    let ttl = Duration::from_secs(self.config.cache.market_ttl_secs);
                    let dex = dex.clone();
                    let lookup = mint.clone();
                    let fetched = self
                        .market_cache
                        .get_or_fetch(mint, ttl, move || async move {
                            dex.fetch_token_overview(&lookup).await
                        })
                        .await;
                    match fetched {
                        Ok(fields) if !fields.is_empty() => {
                            let mut obs =
                                RawTokenObservation::new(mint.clone(), DataSource::DexScreener);
                            obs.fields = fields;
                            if let Ok(outcome) = self.apply_observation(obs).await {
                                summary.record(outcome.result);
                            }
                        }
                        Ok(_) => {}
                        Err(e) => logger::debug(
                            LogTag::Scanner,
                            &format!("market enrichment failed for {}: {}", mint, e),
                        ),
                    }
                }
            } else if token.market_fields.holder_count.is_none() {
                if let Some(rugcheck) = &self.rugcheck {
                    let ttl = Duration::from_secs(self.config.cache.risk_ttl_secs);
                    let rugcheck = rugcheck.clone();
                    let lookup = mint.clone();
                    let fetched = self
                        .holder_cache
                        .get_or_fetch(mint, ttl, move || async move {
                            rugcheck.fetch_holder_summary(&lookup).await
                        })
                        .await;
                    match fetched {
                        Ok(holders) => {
                            let mut obs =
                                RawTokenObservation::new(mint.clone(), DataSource::Rugcheck);
                            obs.fields.holder_count = Some(holders.holder_count);
                            obs.fields.top_holder_pct = Some(holders.top_holder_pct);
                            if let Ok(outcome) = self.apply_observation(obs).await {
                                summary.record(outcome.result);
                            }
                        }
                        Err(e) => logger::debug(
                            LogTag::Scanner,
                            &format!("holder enrichment failed for {}: {}", mint, e),
                        ),
                    }
                }
            }
        }
    }

    // ========================================================================
    // READ API
    // ========================================================================

    pub fn get_token(&self, mint: &str) -> PipelineResult<Option<CanonicalToken>> {
        self.store.get_token(mint)
    }

    pub fn query_tokens(&self, query: &TokenQuery) -> PipelineResult<QueryResult> {
        self.store.query(query)
    }

    pub fn get_history(
        &self,
        mint: &str,
        since: DateTime<Utc>,
    ) -> PipelineResult<Vec<Snapshot>> {
        self.store.history(mint, since)
    }

    /// Full factor breakdown for one token, scored against its history
    pub fn get_risk_report(&self, mint: &str) -> PipelineResult<Option<ScoreResult>> {
        let Some(token) = self.store.get_token(mint)? else {
            return Ok(None);
        };
        let history = self.store.history(mint, token.first_discovered_at)?;
        Ok(Some(self.scoring.score(&token, &history)?))
    }

    pub fn health(&self) -> PipelineResult<PipelineHealth> {
        let failing: Vec<String> = self
            .source_health
            .read()
            .iter()
            .filter(|(_, h)| h.consecutive_failures >= FAILURE_BUDGET)
            .map(|(name, _)| name.clone())
            .collect();
        if !failing.is_empty() {
            return Ok(PipelineHealth::Degraded {
                failing_sources: failing,
            });
        }
        let count = self.store.count_tokens()?;
        if count == 0 && self.last_scan.read().is_none() {
            return Ok(PipelineHealth::ColdStart);
        }
        Ok(PipelineHealth::Healthy { token_count: count })
    }

    pub fn source_health(&self, source: &str) -> Option<SourceHealth> {
        self.source_health.read().get(source).cloned()
    }

    // ========================================================================
    // MAINTENANCE
    // ========================================================================

    pub async fn run_maintenance(&self, include_snapshots: bool) -> PipelineResult<()> {
        self.market_cache.sweep().await;
        self.holder_cache.sweep().await;
        self.merge.prune_locks().await;

        let now = Utc::now();
        self.merge
            .terminate_abandoned(self.merge.terminate_cutoff(now))
            .await?;
        self.merge
            .archive_stale(self.merge.archive_cutoff(now))
            .await?;

        if include_snapshots {
            let written = self.merge.snapshot_live().await?;
            logger::debug(
                LogTag::Scanner,
                &format!("periodic snapshots: {} written", written),
            );
        }
        Ok(())
    }

    fn record_source_success(&self, source: &str) {
        let mut health = self.source_health.write();
        let entry = health.entry(source.to_string()).or_default();
        entry.consecutive_failures = 0;
        entry.last_success = Some(Utc::now());
        entry.last_error = None;
    }

    fn record_source_failure(&self, source: &str, error: &PipelineError) {
        let mut health = self.source_health.write();
        let entry = health.entry(source.to_string()).or_default();
        entry.consecutive_failures += 1;
        entry.last_error = Some(error.to_string());
        logger::warning(
            LogTag::Scanner,
            &format!(
                "{} failed ({} consecutive): {}",
                source, entry.consecutive_failures, error
            ),
        );
    }

    fn interval_for(&self, source: &str) -> Duration {
        let seconds = match source {
            "dexscreener" => self.config.sources.dexscreener.interval_seconds,
            "geckoterminal" => self.config.sources.geckoterminal.interval_seconds,
            "rugcheck" => self.config.sources.rugcheck.interval_seconds,
            _ => 60,
        };
        Duration::from_secs(seconds)
    }
}

fn build_client(timeout_seconds: u64) -> PipelineResult<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_seconds))
        .build()
        .map_err(|e| PipelineError::Config(format!("http client build failed: {}", e)))
}

// ============================================================================
// DAEMON
// ============================================================================

/// Shared shutdown switch handed to signal handlers
#[derive(Clone)]
pub struct ShutdownHandle {
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }
}

pub struct Scanner {
    pipeline: Arc<Pipeline>,
    running: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl Scanner {
    pub fn new(pipeline: Arc<Pipeline>) -> Self {
        Self {
            pipeline,
            running: Arc::new(AtomicBool::new(true)),
            notify: Arc::new(Notify::new()),
        }
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            running: self.running.clone(),
            notify: self.notify.clone(),
        }
    }

    /// Run until shutdown: source tasks feed the queue, workers drain it,
    /// maintenance runs on its own cadence. On shutdown the source tasks
    /// stop first, then the workers drain whatever is left in the queue.
    pub async fn run(&self) -> PipelineResult<()> {
        let scanner_config = self.pipeline.config.scanner.clone();
        let (tx, rx) = mpsc::channel::<RawTokenObservation>(scanner_config.queue_depth);
        let rx = Arc::new(Mutex::new(rx));

        logger::info(
            LogTag::Scanner,
            &format!(
                "starting: {} sources, {} workers, queue depth {}",
                self.pipeline.adapters.len(),
                scanner_config.worker_count,
                scanner_config.queue_depth
            ),
        );

        let mut source_handles = Vec::new();
        for adapter in self.pipeline.adapters.iter().cloned() {
            let pipeline = self.pipeline.clone();
            let running = self.running.clone();
            let notify = self.notify.clone();
            let tx = tx.clone();
            let interval = self.pipeline.interval_for(adapter.name());
            let limit = scanner_config.fetch_limit;

            source_handles.push(tokio::spawn(async move {
                let mut since = Utc::now() - ChronoDuration::hours(1);
                while running.load(Ordering::SeqCst) {
                    let fetched_at = Utc::now();
                    match adapter.fetch_recent(since, limit).await {
                        Ok(observations) => {
                            pipeline.record_source_success(adapter.name());
                            since = fetched_at;
                            for observation in observations {
                                if tx.send(observation).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(e) => pipeline.record_source_failure(adapter.name(), &e),
                    }
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = notify.notified() => {}
                    }
                }
                logger::debug(
                    LogTag::Scanner,
                    &format!("{} source task stopped", adapter.name()),
                );
            }));
        }

        let mut worker_handles = Vec::new();
        for worker_id in 0..scanner_config.worker_count.max(1) {
            let pipeline = self.pipeline.clone();
            let rx = rx.clone();
            worker_handles.push(tokio::spawn(async move {
                loop {
                    let observation = {
                        let mut rx = rx.lock().await;
                        rx.recv().await
                    };
                    let Some(observation) = observation else {
                        break;
                    };
                    if let Err(e) = pipeline.apply_observation(observation).await {
                        logger::warning(
                            LogTag::Scanner,
                            &format!("worker {}: merge failed: {}", worker_id, e),
                        );
                    }
                }
            }));
        }

        let maintenance_handle = {
            let pipeline = self.pipeline.clone();
            let running = self.running.clone();
            let notify = self.notify.clone();
            let interval = Duration::from_secs(scanner_config.maintenance_interval_secs.max(1));
            let snapshot_every = scanner_config
                .snapshot_interval_secs
                .max(scanner_config.maintenance_interval_secs.max(1));
            tokio::spawn(async move {
                let mut since_snapshot = Duration::ZERO;
                while running.load(Ordering::SeqCst) {
                    tokio::select! {
                        _ = tokio::time::sleep(interval) => {}
                        _ = notify.notified() => continue,
                    }
                    since_snapshot += interval;
                    let include_snapshots = since_snapshot.as_secs() >= snapshot_every;
                    if include_snapshots {
                        since_snapshot = Duration::ZERO;
                    }
                    if let Err(e) = pipeline.run_maintenance(include_snapshots).await {
                        logger::warning(
                            LogTag::Scanner,
                            &format!("maintenance pass failed: {}", e),
                        );
                    }
                }
            })
        };

        // Source tasks exit on shutdown; dropping the last sender lets the
        // workers drain the queue and stop
        for handle in source_handles {
            let _ = handle.await;
        }
        drop(tx);
        for handle in worker_handles {
            let _ = handle.await;
        }
        let _ = maintenance_handle.await;

        logger::info(LogTag::Scanner, "stopped");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::types::MarketFields;
    use async_trait::async_trait;

    const MINT_A: &str = "So11111111111111111111111111111111111111112";
    const MINT_B: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    struct StubSource {
        name: &'static str,
        observations: Vec<RawTokenObservation>,
        fail: bool,
    }

    #[async_trait]
    impl SourceAdapter for StubSource {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn fetch_recent(
            &self,
            _since: DateTime<Utc>,
            _limit: usize,
        ) -> PipelineResult<Vec<RawTokenObservation>> {
            if self.fail {
                return Err(PipelineError::SourceUnavailable {
                    source: self.name.to_string(),
                    attempts: 3,
                    last_error: "connection refused".to_string(),
                });
            }
            Ok(self.observations.clone())
        }
    }

    fn observation(mint: &str) -> RawTokenObservation {
        let mut obs = RawTokenObservation::new(mint, DataSource::DexScreener);
        obs.fields = MarketFields {
            price_usd: Some(0.01),
            liquidity_usd: Some(25_000.0),
            volume_24h: Some(4_000.0),
            ..MarketFields::default()
        };
        obs
    }

    fn pipeline_with(adapters: Vec<Arc<dyn SourceAdapter>>) -> Arc<Pipeline> {
        let store = Arc::new(TokenStore::open_in_memory().unwrap());
        Pipeline::with_parts(Config::default(), store, adapters, vec![])
    }

    #[tokio::test]
    async fn scan_counts_new_and_duplicate_tokens() {
        // Two sources report the same mint; one row, one created, one update
        let pipeline = pipeline_with(vec![
            Arc::new(StubSource {
                name: "alpha",
                observations: vec![observation(MINT_A)],
                fail: false,
            }),
            Arc::new(StubSource {
                name: "beta",
                observations: vec![observation(MINT_A), observation(MINT_B)],
                fail: false,
            }),
        ]);
        let summary = pipeline.scan_all_sources().await;
        assert_eq!(summary.new_count, 2);
        assert_eq!(summary.new_count + summary.updated_count + summary.unchanged_count, 3);
        assert!(summary.errors.is_empty());
        assert_eq!(pipeline.store.count_tokens().unwrap(), 2);
    }

    #[tokio::test]
    async fn scan_is_idempotent() {
        let pipeline = pipeline_with(vec![Arc::new(StubSource {
            name: "alpha",
            observations: vec![observation(MINT_A)],
            fail: false,
        })]);
        let first = pipeline.scan_all_sources().await;
        assert_eq!(first.new_count, 1);
        let second = pipeline.scan_all_sources().await;
        assert_eq!(second.new_count, 0);
        assert_eq!(second.unchanged_count, 1);
    }

    #[tokio::test]
    async fn failing_source_does_not_hide_the_others() {
        let pipeline = pipeline_with(vec![
            Arc::new(StubSource {
                name: "alpha",
                observations: vec![],
                fail: true,
            }),
            Arc::new(StubSource {
                name: "beta",
                observations: vec![observation(MINT_B)],
                fail: false,
            }),
        ]);
        let summary = pipeline.scan_all_sources().await;
        assert_eq!(summary.new_count, 1);
        assert_eq!(summary.error_count(), 1);
        assert_eq!(summary.errors[0].source, "alpha");
    }

    #[tokio::test]
    async fn health_walks_cold_start_to_degraded_to_healthy() {
        let failing = Arc::new(StubSource {
            name: "alpha",
            observations: vec![],
            fail: true,
        });
        let pipeline = pipeline_with(vec![failing]);

        assert_eq!(pipeline.health().unwrap(), PipelineHealth::ColdStart);

        for _ in 0..FAILURE_BUDGET {
            pipeline.scan_all_sources().await;
        }
        assert!(matches!(
            pipeline.health().unwrap(),
            PipelineHealth::Degraded { .. }
        ));

        let healthy = pipeline_with(vec![Arc::new(StubSource {
            name: "beta",
            observations: vec![observation(MINT_A)],
            fail: false,
        })]);
        healthy.scan_all_sources().await;
        assert_eq!(
            healthy.health().unwrap(),
            PipelineHealth::Healthy { token_count: 1 }
        );
    }

    #[tokio::test]
    async fn risk_report_covers_missing_token() {
        let pipeline = pipeline_with(vec![]);
        assert!(pipeline.get_risk_report(MINT_A).unwrap().is_none());

        pipeline
            .apply_observation(observation(MINT_A))
            .await
            .unwrap();
        let report = pipeline.get_risk_report(MINT_A).unwrap().unwrap();
        assert!(!report.factors.is_empty());
        assert!(report.risk_score >= 0.0 && report.risk_score <= 100.0);
    }
}
