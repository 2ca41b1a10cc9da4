/// Core types for the token discovery and scoring pipeline
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Data source identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DataSource {
    DexScreener,
    GeckoTerminal,
    Rugcheck,
}

impl DataSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DataSource::DexScreener => "dexscreener",
            DataSource::GeckoTerminal => "geckoterminal",
            DataSource::Rugcheck => "rugcheck",
        }
    }

    pub fn from_str(value: &str) -> Option<Self> {
        match value {
            "dexscreener" => Some(DataSource::DexScreener),
            "geckoterminal" => Some(DataSource::GeckoTerminal),
            "rugcheck" => Some(DataSource::Rugcheck),
            _ => None,
        }
    }
}

impl std::fmt::Display for DataSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// SPARSE MARKET FIELDS
// ============================================================================

/// Identifier for a single market attribute. Used as the key of the
/// per-field freshness map so that a stale source can never clobber a
/// fresher value delivered by a faster source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MarketField {
    PriceUsd,
    LiquidityUsd,
    Volume1h,
    Volume6h,
    Volume24h,
    MarketCap,
    Txns1hBuys,
    Txns1hSells,
    Txns6hBuys,
    Txns6hSells,
    Txns24hBuys,
    Txns24hSells,
    HolderCount,
    TopHolderPct,
    PoolCount,
    BondingCurveProgress,
    PairCreatedAt,
    Symbol,
    Name,
}

/// Latest known market attributes for a token.
///
/// Every field is optional: different sources populate disjoint subsets and
/// "unknown" must stay distinguishable from zero, otherwise the scoring
/// engine would treat missing data as bad data.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MarketFields {
    pub price_usd: Option<f64>,
    pub liquidity_usd: Option<f64>,
    pub volume_1h: Option<f64>,
    pub volume_6h: Option<f64>,
    pub volume_24h: Option<f64>,
    pub market_cap: Option<f64>,
    pub txns_1h_buys: Option<i64>,
    pub txns_1h_sells: Option<i64>,
    pub txns_6h_buys: Option<i64>,
    pub txns_6h_sells: Option<i64>,
    pub txns_24h_buys: Option<i64>,
    pub txns_24h_sells: Option<i64>,
    pub holder_count: Option<i64>,
    /// Supply share controlled by the top holders, 0-100
    pub top_holder_pct: Option<f64>,
    pub pool_count: Option<i64>,
    /// Bonding curve completion, 0-100
    pub bonding_curve_progress: Option<f64>,
    pub pair_created_at: Option<DateTime<Utc>>,
}

impl MarketFields {
    /// True when the observation carried no market data at all
    pub fn is_empty(&self) -> bool {
        self.price_usd.is_none()
            && self.liquidity_usd.is_none()
            && self.volume_1h.is_none()
            && self.volume_6h.is_none()
            && self.volume_24h.is_none()
            && self.market_cap.is_none()
            && self.txns_1h_buys.is_none()
            && self.txns_1h_sells.is_none()
            && self.txns_6h_buys.is_none()
            && self.txns_6h_sells.is_none()
            && self.txns_24h_buys.is_none()
            && self.txns_24h_sells.is_none()
            && self.holder_count.is_none()
            && self.top_holder_pct.is_none()
            && self.pool_count.is_none()
            && self.bonding_curve_progress.is_none()
            && self.pair_created_at.is_none()
    }

    /// Total transactions over the 24h window, if both sides are known
    pub fn txns_24h_total(&self) -> Option<i64> {
        match (self.txns_24h_buys, self.txns_24h_sells) {
            (Some(b), Some(s)) => Some(b + s),
            _ => None,
        }
    }
}

// ============================================================================
// RAW OBSERVATION - ephemeral, produced by one adapter call
// ============================================================================

/// A single observation of a token from one external source.
///
/// Observations are ephemeral: they exist only on the path between an
/// adapter and the merge engine, which folds them into the canonical record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawTokenObservation {
    pub mint: String,
    pub source: DataSource,
    pub observed_at: DateTime<Utc>,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub fields: MarketFields,
}

impl RawTokenObservation {
    pub fn new(mint: impl Into<String>, source: DataSource) -> Self {
        Self {
            mint: mint.into(),
            source,
            observed_at: Utc::now(),
            symbol: None,
            name: None,
            fields: MarketFields::default(),
        }
    }
}

// ============================================================================
// TOKEN STATUS STATE MACHINE
// ============================================================================

/// Lifecycle status of a canonical token.
///
/// Forward states form a total order (created < active < completed <
/// migrated). Terminated and archived are side branches; blacklisted wins
/// over everything and is never auto-exited. Invalid transitions are not
/// errors, they are simply ignored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenStatus {
    NoDexData,
    Created,
    Active,
    Completed,
    Migrated,
    Terminated,
    Archived,
    Blacklisted,
}

impl TokenStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::NoDexData => "no_dex_data",
            TokenStatus::Created => "created",
            TokenStatus::Active => "active",
            TokenStatus::Completed => "completed",
            TokenStatus::Migrated => "migrated",
            TokenStatus::Terminated => "terminated",
            TokenStatus::Archived => "archived",
            TokenStatus::Blacklisted => "blacklisted",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "created" => TokenStatus::Created,
            "active" => TokenStatus::Active,
            "completed" => TokenStatus::Completed,
            "migrated" => TokenStatus::Migrated,
            "terminated" => TokenStatus::Terminated,
            "archived" => TokenStatus::Archived,
            "blacklisted" => TokenStatus::Blacklisted,
            _ => TokenStatus::NoDexData,
        }
    }

    /// Position along the forward chain, None for side branches
    fn forward_rank(&self) -> Option<u8> {
        match self {
            TokenStatus::NoDexData => Some(0),
            TokenStatus::Created => Some(1),
            TokenStatus::Active => Some(2),
            TokenStatus::Completed => Some(3),
            TokenStatus::Migrated => Some(4),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TokenStatus::Terminated | TokenStatus::Archived | TokenStatus::Blacklisted
        )
    }

    /// Apply a proposed transition, returning the resulting status.
    ///
    /// Forward movement happens one step at a time so a token can never
    /// skip from created straight to migrated. Side branches override any
    /// non-blacklisted state; blacklisted is sticky.
    pub fn advance(self, proposed: TokenStatus) -> TokenStatus {
        if self == TokenStatus::Blacklisted {
            return self;
        }
        if proposed == TokenStatus::Blacklisted {
            return TokenStatus::Blacklisted;
        }
        match proposed {
            TokenStatus::Archived => return TokenStatus::Archived,
            TokenStatus::Terminated => {
                // Only abandonable states can terminate
                if matches!(
                    self,
                    TokenStatus::NoDexData | TokenStatus::Created | TokenStatus::Active
                ) {
                    return TokenStatus::Terminated;
                }
                return self;
            }
            _ => {}
        }
        match (self.forward_rank(), proposed.forward_rank()) {
            (Some(current), Some(next)) if next == current + 1 => proposed,
            _ => self,
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// ============================================================================
// CANONICAL TOKEN - the durable entity, owned by the merge engine
// ============================================================================

/// The single authoritative record for a token, keyed by mint address.
///
/// Mutated only through the merge engine. Scores are derived values,
/// recomputed from `market_fields` on every merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CanonicalToken {
    pub mint: String,
    pub symbol: Option<String>,
    pub name: Option<String>,
    pub first_discovered_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub status: TokenStatus,
    pub market_fields: MarketFields,
    /// When each field was last set, for field-level recency merging
    pub field_seen_at: HashMap<MarketField, DateTime<Utc>>,
    /// 0-100, lower = safer
    pub risk_score: f64,
    /// 0-100, higher = more attractive
    pub invest_score: f64,
    pub blacklist_reason: Option<String>,
}

impl CanonicalToken {
    pub fn new(mint: impl Into<String>, discovered_at: DateTime<Utc>) -> Self {
        Self {
            mint: mint.into(),
            symbol: None,
            name: None,
            first_discovered_at: discovered_at,
            updated_at: discovered_at,
            status: TokenStatus::Created,
            market_fields: MarketFields::default(),
            field_seen_at: HashMap::new(),
            risk_score: 0.0,
            invest_score: 0.0,
            blacklist_reason: None,
        }
    }

    /// Age since first discovery, recomputed at read time
    pub fn age_hours(&self, now: DateTime<Utc>) -> f64 {
        let age = now.signed_duration_since(self.first_discovered_at);
        (age.num_seconds().max(0) as f64) / 3600.0
    }
}

// ============================================================================
// SNAPSHOTS - append-only history
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SnapshotReason {
    Periodic,
    Threshold,
    Manual,
    StatusChange,
}

impl SnapshotReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            SnapshotReason::Periodic => "periodic",
            SnapshotReason::Threshold => "threshold",
            SnapshotReason::Manual => "manual",
            SnapshotReason::StatusChange => "status_change",
        }
    }

    pub fn from_str(value: &str) -> Self {
        match value {
            "threshold" => SnapshotReason::Threshold,
            "manual" => SnapshotReason::Manual,
            "status_change" => SnapshotReason::StatusChange,
            _ => SnapshotReason::Periodic,
        }
    }
}

/// Immutable point-in-time capture of a token's market state and scores
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub mint: String,
    pub snapshot_timestamp: DateTime<Utc>,
    pub market_fields: MarketFields,
    pub risk_score: f64,
    pub invest_score: f64,
    pub reason: SnapshotReason,
}

// ============================================================================
// MERGE AND SCAN RESULTS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeResult {
    Created,
    Updated,
    Unchanged,
}

/// Result of folding one observation into the canonical store
#[derive(Debug, Clone)]
pub struct MergeOutcome {
    pub result: MergeResult,
    /// Set when the merge moved the token to a new status (from, to)
    pub status_change: Option<(TokenStatus, TokenStatus)>,
    pub token: CanonicalToken,
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceError {
    pub source: String,
    pub message: String,
}

/// Summary of one pass across all adapters
#[derive(Debug, Clone, Serialize)]
pub struct ScanSummary {
    pub new_count: u64,
    pub updated_count: u64,
    pub unchanged_count: u64,
    pub dropped_count: u64,
    pub errors: Vec<SourceError>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl ScanSummary {
    pub fn start() -> Self {
        let now = Utc::now();
        Self {
            new_count: 0,
            updated_count: 0,
            unchanged_count: 0,
            dropped_count: 0,
            errors: Vec::new(),
            started_at: now,
            finished_at: now,
        }
    }

    pub fn record(&mut self, result: MergeResult) {
        match result {
            MergeResult::Created => self.new_count += 1,
            MergeResult::Updated => self.updated_count += 1,
            MergeResult::Unchanged => self.unchanged_count += 1,
        }
    }

    pub fn error_count(&self) -> usize {
        self.errors.len()
    }
}

// ============================================================================
// SCORING RESULTS
// ============================================================================

/// One sub-analyzer's contribution to the composite score
#[derive(Debug, Clone, Serialize)]
pub struct Factor {
    pub name: String,
    /// Relative weight used when combining into the composite score
    pub weight: f64,
    /// 0.0 (clean) to 1.0 (maximum suspicion)
    pub score: f64,
    /// True when the analyzer had no usable data and emitted its neutral value
    pub neutral: bool,
    pub detail: String,
}

/// Composite scoring result with per-analyzer explainability
#[derive(Debug, Clone, Serialize)]
pub struct ScoreResult {
    pub risk_score: f64,
    pub invest_score: f64,
    pub factors: Vec<Factor>,
}

impl ScoreResult {
    pub fn factor(&self, name: &str) -> Option<&Factor> {
        self.factors.iter().find(|f| f.name == name)
    }
}

// ============================================================================
// HEALTH
// ============================================================================

/// Pipeline health as seen by downstream consumers.
///
/// Lets the dashboard distinguish "no data yet" from "sources failing"
/// from an ordinary empty query result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum PipelineHealth {
    /// Store is empty and no scan has completed yet
    ColdStart,
    /// At least one source has exceeded its consecutive failure budget
    Degraded { failing_sources: Vec<String> },
    Healthy { token_count: u64 },
}

/// Rolling per-source failure tracking used by the health check
#[derive(Debug, Clone, Default)]
pub struct SourceHealth {
    pub consecutive_failures: u32,
    pub last_success: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}
