// src/cli.rs

//! CLI argument parsing using `clap`.

use clap::{Parser, ValueEnum};

/// Command-line arguments for `crm-file-events`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "crm-file-events",
    version,
    about = "Watch directories and record file events for the CRM.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the config file (TOML, or JSON by extension).
    ///
    /// Default: `$CRM_SERVICE_CONFIG`, else `config.toml` in the current
    /// working directory.
    #[arg(long, value_name = "PATH")]
    pub config: Option<String>,

    /// Run one detection cycle per directory, flush, and exit.
    #[arg(long)]
    pub once: bool,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `CRM_FILE_EVENTS_LOG`, then `log_level` from the config,
    /// then `info` is used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse + validate the config and print the effective targets, without
    /// opening the store or watching anything.
    #[arg(long)]
    pub dry_run: bool,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}
