// src/logging.rs

//! Logging setup using `tracing` + `tracing-subscriber`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `CRM_FILE_EVENTS_LOG` environment variable (e.g. "info", "debug")
//! 3. `log_level` from the config file
//! 4. default to `info`
//!
//! Logs are sent to STDERR so that stdout stays free for `--dry-run` output.

use anyhow::Result;
use tracing_subscriber::fmt;

use crate::cli::LogLevel;

pub const LOG_ENV_VAR: &str = "CRM_FILE_EVENTS_LOG";

/// Initialise global logging subscriber.
///
/// Safe to call once at startup.
pub fn init_logging(cli_level: Option<LogLevel>, config_level: Option<&str>) -> Result<()> {
    let level = resolve_level(
        cli_level,
        std::env::var(LOG_ENV_VAR).ok().as_deref(),
        config_level,
    );

    fmt()
        .with_max_level(level)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .init();

    Ok(())
}

/// First usable level in priority order; unparseable values are skipped.
pub fn resolve_level(
    cli_level: Option<LogLevel>,
    env_level: Option<&str>,
    config_level: Option<&str>,
) -> tracing::Level {
    cli_level
        .map(level_from_log_level)
        .or_else(|| env_level.and_then(parse_level_str))
        .or_else(|| config_level.and_then(parse_level_str))
        .unwrap_or(tracing::Level::INFO)
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

fn parse_level_str(s: &str) -> Option<tracing::Level> {
    match s.trim().to_lowercase().as_str() {
        "error" | "critical" => Some(tracing::Level::ERROR),
        "warn" | "warning" => Some(tracing::Level::WARN),
        "info" => Some(tracing::Level::INFO),
        "debug" => Some(tracing::Level::DEBUG),
        "trace" => Some(tracing::Level::TRACE),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_flag_beats_env_and_config() {
        let level = resolve_level(Some(LogLevel::Warn), Some("debug"), Some("trace"));
        assert_eq!(level, tracing::Level::WARN);
    }

    #[test]
    fn config_level_used_when_env_is_garbage() {
        let level = resolve_level(None, Some("loud"), Some("DEBUG"));
        assert_eq!(level, tracing::Level::DEBUG);
    }

    #[test]
    fn defaults_to_info() {
        assert_eq!(resolve_level(None, None, None), tracing::Level::INFO);
    }
}
