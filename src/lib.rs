//! mintradar: Solana token discovery and risk scoring pipeline
//!
//! Polls public token sources, dedups observations into one canonical
//! record per mint with field-level recency, scores every token for rug
//! risk and investability, and keeps an append-only snapshot history in
//! SQLite. `scanner::Pipeline` is the public entry point.

pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod logger;
pub mod merge;
pub mod scanner;
pub mod scoring;
pub mod sources;
pub mod store;
pub mod types;

pub use config::Config;
pub use errors::{PipelineError, PipelineResult};
pub use scanner::{Pipeline, Scanner, ShutdownHandle};
pub use store::{QueryResult, TokenQuery, TokenSortKey, TokenStore};
pub use types::{
    CanonicalToken, DataSource, MarketFields, MergeOutcome, MergeResult, PipelineHealth,
    RawTokenObservation, ScanSummary, ScoreResult, Snapshot, SnapshotReason, TokenStatus,
};
