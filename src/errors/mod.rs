/// Structured error handling for the discovery and scoring pipeline
use chrono::{DateTime, Utc};

// =============================================================================
// MAIN ERROR TYPE
// =============================================================================

#[derive(Debug, Clone)]
pub enum PipelineError {
    /// Upstream exhausted its retry budget; the scan continues with other
    /// sources and the summary records the failure.
    SourceUnavailable {
        source: String,
        attempts: u32,
        last_error: String,
    },

    /// The source's own quota is exhausted; caller must back off.
    RateLimited {
        source: String,
        retry_after: Option<DateTime<Utc>>,
    },

    /// A single item in an adapter batch failed validation. Dropped and
    /// logged, never fatal to the batch.
    MalformedObservation {
        source: String,
        mint: String,
        reason: String,
    },

    /// Programmer error: a malformed mint address reached the scoring
    /// engine. Fatal to that single operation only.
    InvalidTokenState {
        mint: String,
        reason: String,
    },

    /// Two merges raced on the same key despite serialization; retried once
    /// automatically before surfacing.
    StoreWriteConflict {
        mint: String,
    },

    /// Persistence backend failure.
    Database(String),

    /// Configuration file missing or invalid.
    Config(String),
}

impl std::fmt::Display for PipelineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineError::SourceUnavailable {
                source,
                attempts,
                last_error,
            } => {
                write!(
                    f,
                    "Source '{}' unavailable after {} attempts: {}",
                    source, attempts, last_error
                )
            }
            PipelineError::RateLimited {
                source,
                retry_after,
            } => match retry_after {
                Some(at) => write!(f, "Source '{}' rate limited until {}", source, at),
                None => write!(f, "Source '{}' rate limited", source),
            },
            PipelineError::MalformedObservation {
                source,
                mint,
                reason,
            } => {
                write!(
                    f,
                    "Malformed observation from '{}' for mint '{}': {}",
                    source, mint, reason
                )
            }
            PipelineError::InvalidTokenState { mint, reason } => {
                write!(f, "Invalid token state for '{}': {}", mint, reason)
            }
            PipelineError::StoreWriteConflict { mint } => {
                write!(f, "Store write conflict on mint '{}'", mint)
            }
            PipelineError::Database(msg) => write!(f, "Database error: {}", msg),
            PipelineError::Config(msg) => write!(f, "Configuration error: {}", msg),
        }
    }
}

impl std::error::Error for PipelineError {}

impl PipelineError {
    pub fn database(err: impl std::fmt::Display) -> Self {
        PipelineError::Database(err.to_string())
    }

    pub fn malformed(
        source: impl Into<String>,
        mint: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        PipelineError::MalformedObservation {
            source: source.into(),
            mint: mint.into(),
            reason: reason.into(),
        }
    }
}

impl From<rusqlite::Error> for PipelineError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::DatabaseBusy)
            | Some(rusqlite::ErrorCode::DatabaseLocked) => PipelineError::StoreWriteConflict {
                mint: String::new(),
            },
            _ => PipelineError::Database(err.to_string()),
        }
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        PipelineError::Database(format!("JSON encoding failed: {}", err))
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
