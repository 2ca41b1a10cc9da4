//! Table definitions for the snapshot store

use rusqlite::Connection;

/// Create tables and indexes if missing. Idempotent, run at startup.
pub fn create_tables(db: &Connection) -> rusqlite::Result<()> {
    db.execute_batch("PRAGMA journal_mode=WAL;")?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS tokens (
            mint TEXT PRIMARY KEY,
            symbol TEXT,
            name TEXT,
            status TEXT NOT NULL,
            first_discovered_at INTEGER NOT NULL,
            updated_at INTEGER NOT NULL,
            price_usd REAL,
            liquidity_usd REAL,
            volume_1h REAL,
            volume_6h REAL,
            volume_24h REAL,
            market_cap REAL,
            txns_1h_buys INTEGER,
            txns_1h_sells INTEGER,
            txns_6h_buys INTEGER,
            txns_6h_sells INTEGER,
            txns_24h_buys INTEGER,
            txns_24h_sells INTEGER,
            holder_count INTEGER,
            top_holder_pct REAL,
            pool_count INTEGER,
            bonding_curve_progress REAL,
            pair_created_at INTEGER,
            field_seen_at TEXT NOT NULL DEFAULT '{}',
            risk_score REAL NOT NULL DEFAULT 0,
            invest_score REAL NOT NULL DEFAULT 0,
            blacklist_reason TEXT
        )",
        [],
    )?;

    db.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            mint TEXT NOT NULL,
            snapshot_timestamp INTEGER NOT NULL,
            reason TEXT NOT NULL,
            price_usd REAL,
            liquidity_usd REAL,
            volume_1h REAL,
            volume_6h REAL,
            volume_24h REAL,
            market_cap REAL,
            txns_24h_buys INTEGER,
            txns_24h_sells INTEGER,
            holder_count INTEGER,
            top_holder_pct REAL,
            bonding_curve_progress REAL,
            risk_score REAL NOT NULL,
            invest_score REAL NOT NULL,
            UNIQUE(mint, snapshot_timestamp)
        )",
        [],
    )?;

    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_tokens_status ON tokens(status)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_tokens_updated ON tokens(updated_at)",
        [],
    )?;
    db.execute(
        "CREATE INDEX IF NOT EXISTS idx_snapshots_mint_ts ON snapshots(mint, snapshot_timestamp)",
        [],
    )?;

    Ok(())
}
