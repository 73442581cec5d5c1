//! Configuration file resolution
//!
//! Bootstrap configuration lives in a TOML file. Its location is resolved in
//! priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. Per-user config directory (`<config_dir>/cadence/config.toml`)
//! 4. System config file (`/etc/cadence/config.toml`, Linux only)
//!
//! When none exists the caller runs on built-in defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Environment variable naming the config file
pub const CONFIG_ENV_VAR: &str = "CADENCE_CONFIG";

/// Resolve which config file to read, if any
///
/// An explicitly requested file (CLI or environment) must exist; implicit
/// locations are skipped when missing.
pub fn resolve_config_path(cli_arg: Option<&Path>, env_var_name: &str) -> Result<Option<PathBuf>> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return require_exists(path.to_path_buf()).map(Some);
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return require_exists(PathBuf::from(path)).map(Some);
        }
    }

    // Priority 3/4: Platform locations
    let found = default_config_locations().into_iter().find(|p| p.exists());
    match &found {
        Some(path) => debug!("Using config file {}", path.display()),
        None => debug!("No config file found, using built-in defaults"),
    }
    Ok(found)
}

/// Read and deserialize a TOML file
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)?;
    let parsed = toml::from_str(&content)?;
    info!("Loaded configuration from {}", path.display());
    Ok(parsed)
}

/// Resolve and load a config file, falling back to `T::default()`
pub fn load_or_default<T: DeserializeOwned + Default>(cli_arg: Option<&Path>) -> Result<T> {
    match resolve_config_path(cli_arg, CONFIG_ENV_VAR)? {
        Some(path) => load_toml(&path),
        None => Ok(T::default()),
    }
}

fn require_exists(path: PathBuf) -> Result<PathBuf> {
    if path.exists() {
        Ok(path)
    } else {
        Err(Error::Config(format!(
            "Config file not found: {}",
            path.display()
        )))
    }
}

/// Candidate config file locations for the platform, highest priority first
fn default_config_locations() -> Vec<PathBuf> {
    let mut locations = Vec::new();
    if let Some(dir) = dirs::config_dir() {
        locations.push(dir.join("cadence").join("config.toml"));
    }
    if cfg!(target_os = "linux") {
        locations.push(PathBuf::from("/etc/cadence/config.toml"));
    }
    locations
}
