//! Log formatting and console output with ANSI colors

use super::levels::LogLevel;
use super::tags::LogTag;
use chrono::Local;
use colored::*;

/// Fixed column widths for aligned output
const TAG_WIDTH: usize = 8;
const LEVEL_WIDTH: usize = 7;

/// Format and print a log line: `HH:MM:SS [TAG    ] [LEVEL ] message`
pub fn format_and_log(tag: LogTag, level: LogLevel, message: &str) {
    let time = Local::now().format("%H:%M:%S").to_string();

    let tag_str = format!("{:<width$}", tag.as_str(), width = TAG_WIDTH);
    let tag_str = match tag {
        LogTag::Scanner => tag_str.cyan(),
        LogTag::Source => tag_str.blue(),
        LogTag::Merge => tag_str.magenta(),
        LogTag::Score => tag_str.yellow(),
        LogTag::Store => tag_str.green(),
        LogTag::Cache => tag_str.bright_black(),
        LogTag::Events => tag_str.bright_blue(),
        LogTag::Config | LogTag::System => tag_str.white(),
    };

    let level_str = format!("{:<width$}", level.as_str(), width = LEVEL_WIDTH);
    let level_str = match level {
        LogLevel::Error => level_str.red().bold(),
        LogLevel::Warning => level_str.yellow(),
        LogLevel::Info => level_str.normal(),
        LogLevel::Debug => level_str.dimmed(),
    };

    let line = format!(
        "{} [{}] [{}] {}",
        time.dimmed(),
        tag_str,
        level_str,
        message
    );

    if level == LogLevel::Error {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
    }
}
