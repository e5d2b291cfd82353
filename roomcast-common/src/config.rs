//! Configuration file resolution and TOML loading
//!
//! Config file lookup follows a fixed priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. User config directory (`<config_dir>/roomcast/config.toml`)
//! 4. System config (`/etc/roomcast/config.toml`, Linux only)
//!
//! A missing config file is not an error: callers fall back to compiled defaults.

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Directory name used under the platform config directory
pub const CONFIG_DIR_NAME: &str = "roomcast";

/// Config file name
pub const CONFIG_FILE_NAME: &str = "config.toml";

/// Resolve which config file (if any) should be loaded
pub fn resolve_config_file(cli_arg: Option<&Path>, env_var_name: &str) -> Option<PathBuf> {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(env_var_name) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    // Priority 3: User config directory
    if let Some(path) = dirs::config_dir().map(|d| d.join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME)) {
        if path.exists() {
            return Some(path);
        }
    }

    // Priority 4: System config
    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc").join(CONFIG_DIR_NAME).join(CONFIG_FILE_NAME);
        if system.exists() {
            return Some(system);
        }
    }

    None
}

/// Parse a TOML config file into `T`
pub fn load_toml<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&content).map_err(|source| Error::ConfigParse {
        path: path.to_path_buf(),
        source,
    })
}

/// Load `T` from the resolved config file, or `T::default()` when none exists
///
/// An explicitly requested file (CLI or env) that cannot be parsed is an error;
/// everything else degrades to defaults with a warning.
pub fn load_or_default<T: DeserializeOwned + Default>(
    cli_arg: Option<&Path>,
    env_var_name: &str,
) -> Result<T> {
    let explicit = cli_arg.is_some() || std::env::var(env_var_name).is_ok_and(|v| !v.is_empty());

    match resolve_config_file(cli_arg, env_var_name) {
        Some(path) => match load_toml(&path) {
            Ok(config) => {
                info!("Loaded configuration from {}", path.display());
                Ok(config)
            }
            Err(e) if explicit => Err(e),
            Err(e) => {
                warn!("{}; using compiled defaults", e);
                Ok(T::default())
            }
        },
        None => {
            debug!("No config file found; using compiled defaults");
            Ok(T::default())
        }
    }
}
