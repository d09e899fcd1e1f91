// src/errors.rs

//! Crate-wide error aliases and helpers.
//!
//! The variants follow the failure classes of the service:
//! - `Config`: fatal at startup only.
//! - `Store`: fatal to the whole service (nothing can be recorded).
//! - `Backend`: isolated to one watched directory.
//! - everything else is plumbing (`Io`, parse errors, `Other`).

use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum FileEventsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    TomlError(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Event store error: {0}")]
    Store(#[from] rusqlite::Error),

    #[error("Watch backend failed for {target:?}: {reason}")]
    Backend { target: PathBuf, reason: String },

    #[error("Shutdown error: {0}")]
    Shutdown(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

pub type Result<T> = std::result::Result<T, FileEventsError>;
