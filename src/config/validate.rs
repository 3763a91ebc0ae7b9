// src/config/validate.rs

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::{FragletError, Result};

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FragletError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.runner, raw.vein))
    }
}

/// Check semantic invariants that serde cannot express.
pub fn validate_config(cfg: &RawConfigFile) -> Result<()> {
    validate_runner_section(cfg)?;
    validate_veins(cfg)?;
    Ok(())
}

fn validate_runner_section(cfg: &RawConfigFile) -> Result<()> {
    let runner = &cfg.runner;

    if runner.container_runtime.trim().is_empty() {
        return Err(FragletError::config(
            "[runner].container_runtime must not be empty",
        ));
    }

    if runner.platform.trim().is_empty() {
        return Err(FragletError::config("[runner].platform must not be empty"));
    }

    if !runner.fraglet_path.starts_with('/') {
        return Err(FragletError::config(format!(
            "[runner].fraglet_path must be an absolute container path (got '{}')",
            runner.fraglet_path
        )));
    }

    Ok(())
}

fn validate_veins(cfg: &RawConfigFile) -> Result<()> {
    for (name, vein) in cfg.vein.iter() {
        if vein.container.trim().is_empty() {
            return Err(FragletError::config(format!(
                "vein '{}' must name a container image",
                name
            )));
        }
        if vein.extensions.iter().any(|ext| ext.trim_start_matches('.').is_empty()) {
            return Err(FragletError::config(format!(
                "vein '{}' has an empty entry in `extensions`",
                name
            )));
        }
    }
    Ok(())
}
