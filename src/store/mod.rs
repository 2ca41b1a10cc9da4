//! Persistent snapshot store over SQLite
//!
//! Two tables: `tokens` (one row per mint, current canonical state) and
//! `snapshots` (append-only history). `upsert_canonical` is the only
//! mutation path for canonical state; the merge engine serializes writers
//! per mint, and busy/locked errors surface as `StoreWriteConflict` so
//! callers can retry once.
//!
//! Query filtering runs in memory over status-narrowed rows, the same shape
//! as the dashboard filtering engine this replaces.

pub mod filters;
mod schema;

pub use filters::{QueryResult, SortDirection, TokenQuery, TokenSortKey};

use crate::errors::{PipelineError, PipelineResult};
use crate::logger::{self, LogTag};
use crate::types::{
    CanonicalToken, MarketField, MarketFields, Snapshot, SnapshotReason, TokenStatus,
};
use chrono::{DateTime, TimeZone, Utc};
use rusqlite::{params, Connection, Row};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

pub struct TokenStore {
    db: Arc<Mutex<Connection>>,
}

impl TokenStore {
    pub fn open(path: &Path) -> PipelineResult<Self> {
        let db = Connection::open(path)
            .map_err(|e| PipelineError::Database(format!("failed to open store: {}", e)))?;
        schema::create_tables(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    /// In-memory store for tests and one-shot runs
    pub fn open_in_memory() -> PipelineResult<Self> {
        let db = Connection::open_in_memory()
            .map_err(|e| PipelineError::Database(format!("failed to open store: {}", e)))?;
        schema::create_tables(&db)?;
        Ok(Self {
            db: Arc::new(Mutex::new(db)),
        })
    }

    // ========================================================================
    // CANONICAL TOKENS
    // ========================================================================

    /// Write the full canonical row for a token. The only mutation path:
    /// partial field writes from outside the merge engine do not exist.
    pub fn upsert_canonical(&self, token: &CanonicalToken) -> PipelineResult<()> {
        let db = self.lock_db();
        let freshness = serde_json::to_string(&token.field_seen_at)?;
        let fields = &token.market_fields;
        db.execute(
            "INSERT OR REPLACE INTO tokens (
                mint, symbol, name, status, first_discovered_at, updated_at,
                price_usd, liquidity_usd, volume_1h, volume_6h, volume_24h, market_cap,
                txns_1h_buys, txns_1h_sells, txns_6h_buys, txns_6h_sells,
                txns_24h_buys, txns_24h_sells,
                holder_count, top_holder_pct, pool_count, bonding_curve_progress,
                pair_created_at, field_seen_at, risk_score, invest_score, blacklist_reason
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                      ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23, ?24, ?25, ?26, ?27)",
            params![
                token.mint,
                token.symbol,
                token.name,
                token.status.as_str(),
                token.first_discovered_at.timestamp_millis(),
                token.updated_at.timestamp_millis(),
                fields.price_usd,
                fields.liquidity_usd,
                fields.volume_1h,
                fields.volume_6h,
                fields.volume_24h,
                fields.market_cap,
                fields.txns_1h_buys,
                fields.txns_1h_sells,
                fields.txns_6h_buys,
                fields.txns_6h_sells,
                fields.txns_24h_buys,
                fields.txns_24h_sells,
                fields.holder_count,
                fields.top_holder_pct,
                fields.pool_count,
                fields.bonding_curve_progress,
                fields.pair_created_at.map(|t| t.timestamp_millis()),
                freshness,
                token.risk_score,
                token.invest_score,
                token.blacklist_reason,
            ],
        )
        .map_err(|e| self.write_error(&token.mint, e))?;
        Ok(())
    }

    pub fn get_token(&self, mint: &str) -> PipelineResult<Option<CanonicalToken>> {
        let db = self.lock_db();
        let mut stmt = db.prepare("SELECT * FROM tokens WHERE mint = ?1")?;
        let result = stmt.query_row(params![mint], row_to_token);
        match result {
            Ok(token) => Ok(Some(token)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(PipelineError::from(e)),
        }
    }

    /// Filtered, sorted, paged token listing for dashboard views
    pub fn query(&self, query: &TokenQuery) -> PipelineResult<QueryResult> {
        let now = Utc::now();
        let mut tokens = {
            let db = self.lock_db();
            // Status narrows in SQL; the remaining filters run in memory
            let (sql, status_param) = match query.status {
                Some(status) => (
                    "SELECT * FROM tokens WHERE status = ?1".to_string(),
                    Some(status.as_str().to_string()),
                ),
                None => ("SELECT * FROM tokens".to_string(), None),
            };
            let mut stmt = db.prepare(&sql)?;
            let rows: Vec<CanonicalToken> = match status_param {
                Some(status) => stmt
                    .query_map(params![status], row_to_token)?
                    .filter_map(log_bad_row)
                    .collect(),
                None => stmt
                    .query_map([], row_to_token)?
                    .filter_map(log_bad_row)
                    .collect(),
            };
            rows
        };

        tokens.retain(|t| query.matches(t, now));
        tokens.sort_by(|a, b| query.compare(a, b, now));

        let total = tokens.len();
        let items: Vec<CanonicalToken> = tokens
            .into_iter()
            .skip(query.offset)
            .take(query.limit.unwrap_or(usize::MAX))
            .collect();

        Ok(QueryResult {
            items,
            total,
            offset: query.offset,
        })
    }

    pub fn count_tokens(&self) -> PipelineResult<u64> {
        let db = self.lock_db();
        let count: i64 = db.query_row("SELECT COUNT(*) FROM tokens", [], |row| row.get(0))?;
        Ok(count as u64)
    }

    /// Mints of non-terminal tokens with no updates since `cutoff`;
    /// candidates for the archive maintenance pass
    pub fn list_stale(&self, cutoff: DateTime<Utc>) -> PipelineResult<Vec<String>> {
        let db = self.lock_db();
        let mut stmt = db.prepare(
            "SELECT mint FROM tokens
             WHERE updated_at < ?1
               AND status NOT IN ('terminated', 'archived', 'blacklisted')",
        )?;
        let mints = stmt
            .query_map(params![cutoff.timestamp_millis()], |row| {
                row.get::<_, String>(0)
            })?
            .filter_map(|r| r.ok())
            .collect();
        Ok(mints)
    }

    /// Mints of live tokens, for the periodic snapshot pass
    pub fn list_live(&self) -> PipelineResult<Vec<String>> {
        let db = self.lock_db();
        let mut stmt = db.prepare(
            "SELECT mint FROM tokens
             WHERE status IN ('created', 'active', 'completed', 'migrated')",
        )?;
        let mints = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .collect();
        Ok(mints)
    }

    // ========================================================================
    // SNAPSHOTS
    // ========================================================================

    /// Append a point-in-time snapshot of the token's current state.
    ///
    /// Snapshot timestamps strictly increase per mint: an append at or
    /// before the latest stored timestamp is dropped as a duplicate and
    /// returns false.
    pub fn append_snapshot(
        &self,
        token: &CanonicalToken,
        reason: SnapshotReason,
    ) -> PipelineResult<bool> {
        let now = Utc::now();
        let db = self.lock_db();

        let last: Option<i64> = db
            .query_row(
                "SELECT MAX(snapshot_timestamp) FROM snapshots WHERE mint = ?1",
                params![token.mint],
                |row| row.get(0),
            )
            .unwrap_or(None);
        let ts = now.timestamp_millis();
        if let Some(last) = last {
            if ts <= last {
                logger::debug(
                    LogTag::Store,
                    &format!("{}: dropping non-increasing snapshot", token.mint),
                );
                return Ok(false);
            }
        }

        let fields = &token.market_fields;
        db.execute(
            "INSERT INTO snapshots (
                mint, snapshot_timestamp, reason,
                price_usd, liquidity_usd, volume_1h, volume_6h, volume_24h, market_cap,
                txns_24h_buys, txns_24h_sells, holder_count, top_holder_pct,
                bonding_curve_progress, risk_score, invest_score
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)",
            params![
                token.mint,
                ts,
                reason.as_str(),
                fields.price_usd,
                fields.liquidity_usd,
                fields.volume_1h,
                fields.volume_6h,
                fields.volume_24h,
                fields.market_cap,
                fields.txns_24h_buys,
                fields.txns_24h_sells,
                fields.holder_count,
                fields.top_holder_pct,
                fields.bonding_curve_progress,
                token.risk_score,
                token.invest_score,
            ],
        )
        .map_err(|e| self.write_error(&token.mint, e))?;
        Ok(true)
    }

    /// Snapshot history for one mint since a point in time, oldest first
    pub fn history(&self, mint: &str, since: DateTime<Utc>) -> PipelineResult<Vec<Snapshot>> {
        let db = self.lock_db();
        let mut stmt = db.prepare(
            "SELECT mint, snapshot_timestamp, reason,
                    price_usd, liquidity_usd, volume_1h, volume_6h, volume_24h, market_cap,
                    txns_24h_buys, txns_24h_sells, holder_count, top_holder_pct,
                    bonding_curve_progress, risk_score, invest_score
             FROM snapshots
             WHERE mint = ?1 AND snapshot_timestamp >= ?2
             ORDER BY snapshot_timestamp ASC",
        )?;
        let snapshots = stmt
            .query_map(params![mint, since.timestamp_millis()], row_to_snapshot)?
            .filter_map(log_bad_row)
            .collect();
        Ok(snapshots)
    }

    // ========================================================================
    // HEALTH
    // ========================================================================

    /// Most recent canonical update across all tokens
    pub fn last_update(&self) -> PipelineResult<Option<DateTime<Utc>>> {
        let db = self.lock_db();
        let ts: Option<i64> = db
            .query_row("SELECT MAX(updated_at) FROM tokens", [], |row| row.get(0))
            .unwrap_or(None);
        Ok(ts.and_then(millis_to_datetime))
    }

    fn lock_db(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned mutex means a writer panicked mid-statement; the
        // connection itself is still usable
        match self.db.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write_error(&self, mint: &str, err: rusqlite::Error) -> PipelineError {
        match PipelineError::from(err) {
            PipelineError::StoreWriteConflict { .. } => PipelineError::StoreWriteConflict {
                mint: mint.to_string(),
            },
            other => other,
        }
    }
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_millis_opt(ms).single()
}

fn log_bad_row<T>(result: Result<T, rusqlite::Error>) -> Option<T> {
    match result {
        Ok(value) => Some(value),
        Err(e) => {
            logger::warning(LogTag::Store, &format!("skipping unreadable row: {}", e));
            None
        }
    }
}

fn row_to_token(row: &Row) -> rusqlite::Result<CanonicalToken> {
    let freshness_json: String = row.get("field_seen_at")?;
    let field_seen_at: HashMap<MarketField, DateTime<Utc>> =
        serde_json::from_str(&freshness_json).unwrap_or_default();
    let status: String = row.get("status")?;

    Ok(CanonicalToken {
        mint: row.get("mint")?,
        symbol: row.get("symbol")?,
        name: row.get("name")?,
        status: TokenStatus::from_str(&status),
        first_discovered_at: millis_to_datetime(row.get("first_discovered_at")?)
            .unwrap_or_else(Utc::now),
        updated_at: millis_to_datetime(row.get("updated_at")?).unwrap_or_else(Utc::now),
        market_fields: MarketFields {
            price_usd: row.get("price_usd")?,
            liquidity_usd: row.get("liquidity_usd")?,
            volume_1h: row.get("volume_1h")?,
            volume_6h: row.get("volume_6h")?,
            volume_24h: row.get("volume_24h")?,
            market_cap: row.get("market_cap")?,
            txns_1h_buys: row.get("txns_1h_buys")?,
            txns_1h_sells: row.get("txns_1h_sells")?,
            txns_6h_buys: row.get("txns_6h_buys")?,
            txns_6h_sells: row.get("txns_6h_sells")?,
            txns_24h_buys: row.get("txns_24h_buys")?,
            txns_24h_sells: row.get("txns_24h_sells")?,
            holder_count: row.get("holder_count")?,
            top_holder_pct: row.get("top_holder_pct")?,
            pool_count: row.get("pool_count")?,
            bonding_curve_progress: row.get("bonding_curve_progress")?,
            pair_created_at: row
                .get::<_, Option<i64>>("pair_created_at")?
                .and_then(millis_to_datetime),
        },
        field_seen_at,
        risk_score: row.get("risk_score")?,
        invest_score: row.get("invest_score")?,
        blacklist_reason: row.get("blacklist_reason")?,
    })
}

fn row_to_snapshot(row: &Row) -> rusqlite::Result<Snapshot> {
    let reason: String = row.get("reason")?;
    Ok(Snapshot {
        mint: row.get("mint")?,
        snapshot_timestamp: millis_to_datetime(row.get("snapshot_timestamp")?)
            .unwrap_or_else(Utc::now),
        market_fields: MarketFields {
            price_usd: row.get("price_usd")?,
            liquidity_usd: row.get("liquidity_usd")?,
            volume_1h: row.get("volume_1h")?,
            volume_6h: row.get("volume_6h")?,
            volume_24h: row.get("volume_24h")?,
            market_cap: row.get("market_cap")?,
            txns_1h_buys: None,
            txns_1h_sells: None,
            txns_6h_buys: None,
            txns_6h_sells: None,
            txns_24h_buys: row.get("txns_24h_buys")?,
            txns_24h_sells: row.get("txns_24h_sells")?,
            holder_count: row.get("holder_count")?,
            top_holder_pct: row.get("top_holder_pct")?,
            pool_count: None,
            bonding_curve_progress: row.get("bonding_curve_progress")?,
            pair_created_at: None,
        },
        risk_score: row.get("risk_score")?,
        invest_score: row.get("invest_score")?,
        reason: SnapshotReason::from_str(&reason),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::NamedTempFile;

    fn token(mint: &str, liquidity: Option<f64>) -> CanonicalToken {
        let mut token = CanonicalToken::new(mint, Utc::now());
        token.symbol = Some(format!("T{}", &mint[..2]));
        token.market_fields.liquidity_usd = liquidity;
        token
    }

    const MINT_A: &str = "So11111111111111111111111111111111111111112";
    const MINT_B: &str = "EPjFWdd5AufqSSqeM2qN1xzybapC8G4wEGGkZwyTDt1v";

    #[test]
    fn upsert_and_get_roundtrip() {
        let file = NamedTempFile::new().unwrap();
        let store = TokenStore::open(file.path()).unwrap();

        let mut original = token(MINT_A, Some(8_000.0));
        original.market_fields.holder_count = Some(120);
        original
            .field_seen_at
            .insert(MarketField::LiquidityUsd, original.updated_at);
        original.risk_score = 42.5;
        store.upsert_canonical(&original).unwrap();

        let loaded = store.get_token(MINT_A).unwrap().unwrap();
        assert_eq!(loaded.mint, original.mint);
        assert_eq!(loaded.market_fields.liquidity_usd, Some(8_000.0));
        assert_eq!(loaded.market_fields.holder_count, Some(120));
        // Unknown fields survive as unknown, not zero
        assert_eq!(loaded.market_fields.volume_24h, None);
        assert_eq!(loaded.risk_score, 42.5);
        assert!(loaded.field_seen_at.contains_key(&MarketField::LiquidityUsd));

        assert!(store.get_token(MINT_B).unwrap().is_none());
    }

    #[test]
    fn query_filters_sorts_and_pages() {
        let store = TokenStore::open_in_memory().unwrap();
        let mints = [
            (MINT_A, Some(8_000.0)),
            (MINT_B, Some(60_000.0)),
            ("7xKXtg2CW87d97TXJSDpbD5jBkheTqA83TZRuJosgAsU", None),
        ];
        for (mint, liq) in mints {
            store.upsert_canonical(&token(mint, liq)).unwrap();
        }

        // Numeric bound excludes the unknown-liquidity token
        let query = TokenQuery {
            min_liquidity_usd: Some(1_000.0),
            sort_key: Some(TokenSortKey::LiquidityUsd),
            sort_direction: Some(SortDirection::Desc),
            ..TokenQuery::default()
        };
        let result = store.query(&query).unwrap();
        assert_eq!(result.total, 2);
        assert_eq!(result.items[0].mint, MINT_B);

        // Paging
        let query = TokenQuery {
            limit: Some(1),
            offset: 1,
            sort_key: Some(TokenSortKey::Mint),
            sort_direction: Some(SortDirection::Asc),
            ..TokenQuery::default()
        };
        let result = store.query(&query).unwrap();
        assert_eq!(result.total, 3);
        assert_eq!(result.items.len(), 1);
    }

    #[test]
    fn archived_hidden_unless_requested() {
        let store = TokenStore::open_in_memory().unwrap();
        let mut archived = token(MINT_A, Some(5_000.0));
        archived.status = TokenStatus::Archived;
        store.upsert_canonical(&archived).unwrap();
        store.upsert_canonical(&token(MINT_B, Some(5_000.0))).unwrap();

        let default_view = store.query(&TokenQuery::default()).unwrap();
        assert_eq!(default_view.total, 1);

        let explicit = store
            .query(&TokenQuery {
                status: Some(TokenStatus::Archived),
                ..TokenQuery::default()
            })
            .unwrap();
        assert_eq!(explicit.total, 1);
        assert_eq!(explicit.items[0].mint, MINT_A);
    }

    #[test]
    fn snapshot_timestamps_strictly_increase() {
        let store = TokenStore::open_in_memory().unwrap();
        let token = token(MINT_A, Some(9_000.0));
        store.upsert_canonical(&token).unwrap();

        assert!(store
            .append_snapshot(&token, SnapshotReason::Periodic)
            .unwrap());
        // Same-millisecond append is dropped as a duplicate
        let second = store.append_snapshot(&token, SnapshotReason::Manual).unwrap();
        let history = store
            .history(MINT_A, Utc::now() - chrono::Duration::hours(1))
            .unwrap();
        if second {
            assert_eq!(history.len(), 2);
            assert!(history[0].snapshot_timestamp < history[1].snapshot_timestamp);
        } else {
            assert_eq!(history.len(), 1);
        }
    }

    #[test]
    fn history_respects_since() {
        let store = TokenStore::open_in_memory().unwrap();
        let token = token(MINT_A, Some(9_000.0));
        store.upsert_canonical(&token).unwrap();
        store
            .append_snapshot(&token, SnapshotReason::Periodic)
            .unwrap();

        let future = Utc::now() + chrono::Duration::hours(1);
        assert!(store.history(MINT_A, future).unwrap().is_empty());
    }

    #[test]
    fn stale_listing_skips_terminal_states() {
        let store = TokenStore::open_in_memory().unwrap();
        let mut old = token(MINT_A, None);
        old.updated_at = Utc::now() - chrono::Duration::days(60);
        store.upsert_canonical(&old).unwrap();

        let mut blacklisted = token(MINT_B, None);
        blacklisted.updated_at = Utc::now() - chrono::Duration::days(60);
        blacklisted.status = TokenStatus::Blacklisted;
        store.upsert_canonical(&blacklisted).unwrap();

        let stale = store
            .list_stale(Utc::now() - chrono::Duration::days(30))
            .unwrap();
        assert_eq!(stale, vec![MINT_A.to_string()]);
    }
}
