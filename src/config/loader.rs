// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Environment variable naming the config file when `--config` is absent.
pub const CONFIG_PATH_ENV: &str = "FRAGLET_CONFIG_PATH";

/// Load a configuration file and return the raw, unvalidated model.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file and validate it.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let raw_config = load_from_path(&path)?;
    let config = ConfigFile::try_from(raw_config)?;
    Ok(config)
}

/// Load the config the CLI should use.
///
/// An explicit path must exist. Without one, `FRAGLET_CONFIG_PATH` is
/// consulted, then `Fraglet.toml` in the working directory; if neither
/// yields a file, built-in defaults are used.
pub fn load_or_default(explicit: Option<&Path>) -> Result<ConfigFile> {
    if let Some(path) = explicit {
        return load_and_validate(path);
    }

    let candidate = std::env::var_os(CONFIG_PATH_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(default_config_path);

    if candidate.is_file() {
        debug!(path = %candidate.display(), "loading config");
        load_and_validate(&candidate)
    } else {
        debug!(path = %candidate.display(), "no config file; using defaults");
        Ok(ConfigFile::default())
    }
}

/// `Fraglet.toml` in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Fraglet.toml")
}
