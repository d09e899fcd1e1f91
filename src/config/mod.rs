// src/config/mod.rs

//! Configuration loading and validation.
//!
//! Responsibilities:
//! - Define the TOML/JSON-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate startup invariants and apply defaults (`validate.rs`).

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, resolve_config_path};
pub use model::{
    BroadcastConfig, ConfigFile, DatabaseConfig, DatabaseSettings, DirectoryConfig,
    RawConfigFile, ScalarValue, ServiceSettings, WatchTarget,
};
