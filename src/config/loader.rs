// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable consulted when no `--config` flag is given.
pub const CONFIG_ENV_VAR: &str = "CRM_SERVICE_CONFIG";

/// Load a configuration file from a given path and return the raw
/// `RawConfigFile`.
///
/// Files ending in `.json` are parsed as JSON; everything else as TOML.
/// Relative `database.path` and `directories[].path` values are resolved
/// against the directory holding the config file.
///
/// This performs no semantic validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));

    let mut config: RawConfigFile = if is_json {
        serde_json::from_str(&contents)?
    } else {
        toml::from_str(&contents)?
    };

    let base = config_root_dir(path);
    resolve_relative_paths(&mut config, &base);

    Ok(config)
}

/// Load a configuration file from path and run validation.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML or JSON.
/// - Applies defaults (handled by `serde` + the validation step).
/// - Checks for:
///   - at least one watched directory,
///   - consistent size bounds,
///   - compilable include/exclude globs,
///   - non-zero batch and queue sizes.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// File names tried, in order, when neither the flag nor the environment
/// names a config file.
pub const DEFAULT_CONFIG_NAMES: [&str; 2] = ["config.toml", "config.json"];

/// Resolve the config path: explicit flag, then `CRM_SERVICE_CONFIG`, then
/// `config.toml` or `config.json` in the current working directory.
pub fn resolve_config_path(explicit: Option<&str>) -> PathBuf {
    if let Some(p) = explicit {
        return PathBuf::from(p);
    }
    match std::env::var(CONFIG_ENV_VAR) {
        Ok(p) if !p.trim().is_empty() => PathBuf::from(p),
        _ => default_config_path_in(Path::new("")),
    }
}

/// First of [`DEFAULT_CONFIG_NAMES`] that exists in `dir`. When none does,
/// the TOML name is returned so the error names the preferred file.
pub fn default_config_path_in(dir: &Path) -> PathBuf {
    DEFAULT_CONFIG_NAMES
        .iter()
        .map(|name| dir.join(name))
        .find(|candidate| candidate.is_file())
        .unwrap_or_else(|| dir.join(DEFAULT_CONFIG_NAMES[0]))
}

/// Directory relative paths in a config file are anchored to.
///
/// A bare filename like `config.toml` has an empty parent, in which case we
/// fall back to the current working directory.
fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

fn resolve_relative_paths(config: &mut RawConfigFile, base: &Path) {
    if config.database.path.is_relative() {
        config.database.path = base.join(&config.database.path);
    }
    for dir in config.directories.iter_mut() {
        if dir.path.is_relative() && !dir.path.as_os_str().is_empty() {
            dir.path = base.join(&dir.path);
        }
    }
}
