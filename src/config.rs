use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level configuration, loaded from a TOML file.
///
/// Every section has serde defaults so a partial file is enough to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub scanner: ScannerConfig,
    #[serde(default)]
    pub sources: SourcesConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GeneralConfig {
    pub log_level: String,
    /// Module names with debug logging force-enabled (e.g. "merge")
    #[serde(default)]
    pub debug_modules: Vec<String>,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            debug_modules: vec![],
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "mintradar.db".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Merge workers draining the observation queue
    pub worker_count: usize,
    /// Bounded work queue depth between adapters and workers
    pub queue_depth: usize,
    /// Periodic snapshot interval for live tokens
    pub snapshot_interval_secs: u64,
    /// Cache sweep / stale archiving cadence
    pub maintenance_interval_secs: u64,
    /// Tokens without updates for this long are archived
    pub archive_after_days: i64,
    /// Created/active tokens with no activity for this long are terminated
    pub terminate_after_hours: i64,
    /// Observations per source per pass
    pub fetch_limit: usize,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            worker_count: 4,
            queue_depth: 512,
            snapshot_interval_secs: 300,
            maintenance_interval_secs: 60,
            archive_after_days: 30,
            terminate_after_hours: 48,
            fetch_limit: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    #[serde(default = "default_source_enabled")]
    pub enabled: bool,
    /// Empty means "use the built-in URL for this source"
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
    /// Poll interval for the recurring scan task
    #[serde(default = "default_source_interval")]
    pub interval_seconds: u64,
    /// Per-request timeout
    #[serde(default = "default_source_timeout")]
    pub timeout_seconds: u64,
    /// Minimum spacing between consecutive requests to this source
    #[serde(default = "default_source_min_gap")]
    pub min_request_interval_ms: u64,
}

fn default_source_enabled() -> bool {
    true
}

fn default_source_interval() -> u64 {
    60
}

fn default_source_timeout() -> u64 {
    20
}

fn default_source_min_gap() -> u64 {
    500
}

impl SourceConfig {
    fn new(base_url: &str, interval_seconds: u64, min_request_interval_ms: u64) -> Self {
        Self {
            enabled: true,
            base_url: base_url.to_string(),
            api_key: None,
            interval_seconds,
            timeout_seconds: 20,
            min_request_interval_ms,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub dexscreener: SourceConfig,
    pub geckoterminal: SourceConfig,
    pub rugcheck: SourceConfig,
}

impl Default for SourcesConfig {
    fn default() -> Self {
        Self {
            dexscreener: SourceConfig::new("https://api.dexscreener.com", 60, 500),
            geckoterminal: SourceConfig::new("https://api.geckoterminal.com/api/v2", 120, 1000),
            rugcheck: SourceConfig::new("https://api.rugcheck.xyz/v1", 180, 1000),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: f64,
    pub max_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay_ms: 1000,
            multiplier: 2.0,
            max_delay_ms: 30_000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// TTL for live market field lookups
    pub market_ttl_secs: u64,
    /// TTL for risk analysis data (holder distributions etc.)
    pub risk_ttl_secs: u64,
    /// Bound on entries per cache before oldest-insert eviction
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            market_ttl_secs: 300,
            risk_ttl_secs: 3600,
            max_entries: 5000,
        }
    }
}

/// Scoring weights and thresholds.
///
/// The exact weighting is heuristic and deliberately tunable; the defaults
/// here are a starting point, not business logic baked into the analyzers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub liquidity_weight: f64,
    pub holders_weight: f64,
    pub patterns_weight: f64,
    pub maturity_weight: f64,

    /// Liquidity below this is flagged as rug-prone (USD)
    pub min_liquidity_usd: f64,
    /// Liquidity considered healthy (USD)
    pub target_liquidity_usd: f64,

    /// Top holders controlling more than this share is concentrated (0-100)
    pub max_top_holder_pct: f64,
    /// Holder counts below this are thin
    pub min_holder_count: i64,

    /// Below this many 24h transactions the pattern analyzer stays neutral
    pub min_txn_samples: i64,
    /// 24h volume above liquidity * this ratio looks like wash trading
    pub max_volume_liquidity_ratio: f64,

    /// Tokens younger than this carry an immaturity penalty (hours)
    pub young_age_hours: f64,

    /// Risk at or above this is blacklistable when a rug rule confirms
    pub blacklist_threshold: f64,
    /// Invest score cap applied when risk is blacklistable; must sit below
    /// any "investable" preset threshold used by dashboards
    pub blacklisted_invest_cap: f64,
    /// Risk score jump that triggers a threshold snapshot
    pub snapshot_risk_delta: f64,

    /// Liquidity drop from its recent peak that confirms a rug (percent)
    pub rug_liquidity_drop_pct: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            liquidity_weight: 0.30,
            holders_weight: 0.25,
            patterns_weight: 0.30,
            maturity_weight: 0.15,
            min_liquidity_usd: 5_000.0,
            target_liquidity_usd: 50_000.0,
            max_top_holder_pct: 40.0,
            min_holder_count: 50,
            min_txn_samples: 10,
            max_volume_liquidity_ratio: 10.0,
            young_age_hours: 6.0,
            blacklist_threshold: 80.0,
            blacklisted_invest_cap: 25.0,
            snapshot_risk_delta: 15.0,
            rug_liquidity_drop_pct: 80.0,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            database: DatabaseConfig::default(),
            scanner: ScannerConfig::default(),
            sources: SourcesConfig::default(),
            retry: RetryConfig::default(),
            cache: CacheConfig::default(),
            scoring: ScoringConfig::default(),
        }
    }
}

impl Config {
    /// Load config from a TOML file, or defaults when the file is absent
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file {}", path.display()))?;
        config.fill_source_urls();
        config.validate()?;
        Ok(config)
    }

    /// A partial `[sources.*]` section may omit `base_url`; restore the
    /// built-in URL for that source
    fn fill_source_urls(&mut self) {
        let defaults = SourcesConfig::default();
        if self.sources.dexscreener.base_url.is_empty() {
            self.sources.dexscreener.base_url = defaults.dexscreener.base_url;
        }
        if self.sources.geckoterminal.base_url.is_empty() {
            self.sources.geckoterminal.base_url = defaults.geckoterminal.base_url;
        }
        if self.sources.rugcheck.base_url.is_empty() {
            self.sources.rugcheck.base_url = defaults.rugcheck.base_url;
        }
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file {}", path.display()))?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        let weights = self.scoring.liquidity_weight
            + self.scoring.holders_weight
            + self.scoring.patterns_weight
            + self.scoring.maturity_weight;
        if weights <= 0.0 {
            anyhow::bail!("scoring weights must sum to a positive value");
        }
        if self.scanner.worker_count == 0 {
            anyhow::bail!("scanner.worker_count must be at least 1");
        }
        if self.scanner.queue_depth == 0 {
            anyhow::bail!("scanner.queue_depth must be at least 1");
        }
        if !(0.0..=100.0).contains(&self.scoring.blacklist_threshold) {
            anyhow::bail!("scoring.blacklist_threshold must be within 0-100");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let config = Config::default();
        assert!(config.validate().is_ok());
        assert!(config.sources.dexscreener.enabled);
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let config: Config = toml::from_str(
            r#"
            [general]
            log_level = "debug"

            [scoring]
            blacklist_threshold = 75.0
            "#,
        )
        .unwrap();
        assert_eq!(config.general.log_level, "debug");
        assert_eq!(config.scoring.blacklist_threshold, 75.0);
        // Untouched sections keep their defaults
        assert_eq!(config.scanner.worker_count, 4);
        assert_eq!(config.cache.market_ttl_secs, 300);
    }

    #[test]
    fn partial_source_section_fills_defaults() {
        let mut config: Config = toml::from_str(
            r#"
            [sources.dexscreener]
            interval_seconds = 30
            "#,
        )
        .unwrap();
        config.fill_source_urls();

        // The overridden key lands, everything else stays stock
        assert_eq!(config.sources.dexscreener.interval_seconds, 30);
        assert!(config.sources.dexscreener.enabled);
        assert_eq!(
            config.sources.dexscreener.base_url,
            "https://api.dexscreener.com"
        );
        assert_eq!(config.sources.dexscreener.min_request_interval_ms, 500);
        // Sibling sources keep their own defaults
        assert_eq!(config.sources.rugcheck.interval_seconds, 180);
        assert_eq!(config.sources.rugcheck.base_url, "https://api.rugcheck.xyz/v1");
    }
}
