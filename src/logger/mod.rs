//! Structured tagged logging for the pipeline
//!
//! Provides level-specific functions gated by a process-wide minimum level
//! and optional per-tag debug flags:
//!
//! ```rust
//! use mintradar::logger::{self, LogTag};
//!
//! logger::info(LogTag::Scanner, "scan pass complete");
//! logger::debug(LogTag::Merge, "field overlay details"); // only if debug enabled
//! ```
//!
//! Call `logger::init(&config.general)` once at startup before any logging.

mod format;
mod levels;
mod tags;

pub use levels::LogLevel;
pub use tags::LogTag;

use crate::config::GeneralConfig;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashSet;

#[derive(Debug, Clone)]
pub struct LoggerConfig {
    pub min_level: LogLevel,
    /// Tags with debug logging enabled; empty set means none
    pub debug_tags: HashSet<String>,
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            min_level: LogLevel::Info,
            debug_tags: HashSet::new(),
        }
    }
}

static LOGGER_CONFIG: Lazy<RwLock<LoggerConfig>> =
    Lazy::new(|| RwLock::new(LoggerConfig::default()));

/// Initialize the logger from the general config section
pub fn init(config: &GeneralConfig) {
    let min_level = LogLevel::from_str(&config.log_level).unwrap_or(LogLevel::Info);
    let debug_tags = config
        .debug_modules
        .iter()
        .map(|m| m.to_lowercase())
        .collect();
    *LOGGER_CONFIG.write() = LoggerConfig {
        min_level,
        debug_tags,
    };
}

fn should_log(tag: &LogTag, level: LogLevel) -> bool {
    // Errors always log
    if level == LogLevel::Error {
        return true;
    }
    let config = LOGGER_CONFIG.read();
    if level == LogLevel::Debug {
        return config.min_level == LogLevel::Debug
            || config.debug_tags.contains(&tag.to_debug_key());
    }
    level <= config.min_level
}

fn log_internal(tag: LogTag, level: LogLevel, message: &str) {
    if !should_log(&tag, level) {
        return;
    }
    format::format_and_log(tag, level, message);
}

/// Log at ERROR level (always shown)
pub fn error(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Error, message);
}

/// Log at WARNING level
pub fn warning(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Warning, message);
}

/// Log at INFO level
pub fn info(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Info, message);
}

/// Log at DEBUG level (gated by log_level or debug_modules)
pub fn debug(tag: LogTag, message: &str) {
    log_internal(tag, LogLevel::Debug, message);
}
