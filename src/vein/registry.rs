// src/vein/registry.rs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use serde::Deserialize;
use tracing::debug;

use crate::config::{ConfigFile, VeinConfig};
use crate::errors::{FragletError, Result};

/// Directory of extra vein files (`*.toml`, each with `[vein.<name>]` tables).
pub const VEINS_DIR_ENV: &str = "FRAGLET_VEINS_DIR";

/// A named execution environment backed by a container image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Vein {
    pub name: String,
    pub container: String,
    pub extensions: Vec<String>,
}

impl Vein {
    pub fn new(name: impl Into<String>, container: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            container: container.into(),
            extensions: Vec::new(),
        }
    }

    pub fn with_extension(mut self, ext: impl Into<String>) -> Self {
        self.extensions.push(ext.into());
        self
    }

    fn from_config(name: &str, cfg: &VeinConfig) -> Self {
        Self {
            name: name.to_string(),
            container: cfg.container.clone(),
            extensions: cfg.extensions.clone(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct VeinFile {
    #[serde(default)]
    vein: BTreeMap<String, VeinConfig>,
}

/// Veins by name. Names are unique; adding a duplicate is an error.
#[derive(Debug, Clone, Default)]
pub struct VeinRegistry {
    veins: BTreeMap<String, Vein>,
}

impl VeinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, vein: Vein) -> Result<()> {
        if vein.name.trim().is_empty() {
            return Err(FragletError::config("vein name is required"));
        }
        if vein.container.trim().is_empty() {
            return Err(FragletError::config(format!(
                "vein '{}' requires a container image",
                vein.name
            )));
        }
        if self.veins.contains_key(&vein.name) {
            return Err(FragletError::config(format!(
                "duplicate vein name: {}",
                vein.name
            )));
        }
        self.veins.insert(vein.name.clone(), vein);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Vein> {
        self.veins.get(name)
    }

    /// Look a vein up, failing with [`FragletError::VeinNotFound`].
    pub fn require(&self, name: &str) -> Result<&Vein> {
        self.get(name)
            .ok_or_else(|| FragletError::VeinNotFound(name.to_string()))
    }

    /// Vein names in sorted order.
    pub fn list(&self) -> Vec<&str> {
        self.veins.keys().map(String::as_str).collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Vein> {
        self.veins.values()
    }

    pub fn len(&self) -> usize {
        self.veins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.veins.is_empty()
    }

    /// Veins declared in the config file.
    pub fn from_config(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::new();
        for (name, vein) in cfg.vein.iter() {
            registry.add(Vein::from_config(name, vein))?;
        }
        Ok(registry)
    }

    /// Add every vein from the `*.toml` files in `dir`.
    pub fn extend_from_dir(&mut self, dir: &Path) -> Result<()> {
        let mut files: Vec<_> = fs::read_dir(dir)
            .map_err(|e| FragletError::config(format!("reading veins dir {}: {e}", dir.display())))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| p.is_file() && p.extension().is_some_and(|ext| ext == "toml"))
            .collect();
        files.sort();

        if files.is_empty() {
            return Err(FragletError::config(format!(
                "no vein files (*.toml) found in {}",
                dir.display()
            )));
        }

        for file in files {
            let contents = fs::read_to_string(&file)?;
            let parsed: VeinFile = toml::from_str(&contents)?;
            debug!(file = %file.display(), count = parsed.vein.len(), "loading veins");
            for (name, vein) in parsed.vein.iter() {
                self.add(Vein::from_config(name, vein)).map_err(|e| {
                    FragletError::config(format!("{}: {e}", file.display()))
                })?;
            }
        }
        Ok(())
    }

    /// Config veins plus, when `FRAGLET_VEINS_DIR` is set, that directory's.
    pub fn load(cfg: &ConfigFile) -> Result<Self> {
        let mut registry = Self::from_config(cfg)?;
        if let Some(dir) = std::env::var_os(VEINS_DIR_ENV) {
            registry.extend_from_dir(Path::new(&dir))?;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_rejects_invalid_and_duplicate_veins() {
        let mut reg = VeinRegistry::new();
        assert!(reg.add(Vein::new("", "img")).is_err());
        assert!(reg.add(Vein::new("py", "")).is_err());
        reg.add(Vein::new("py", "img")).unwrap();
        let err = reg.add(Vein::new("py", "other")).unwrap_err();
        assert!(err.to_string().contains("duplicate vein name"));
    }

    #[test]
    fn list_is_sorted() {
        let mut reg = VeinRegistry::new();
        reg.add(Vein::new("ruby", "r")).unwrap();
        reg.add(Vein::new("ada", "a")).unwrap();
        reg.add(Vein::new("c", "c")).unwrap();
        assert_eq!(reg.list(), vec!["ada", "c", "ruby"]);
    }

    #[test]
    fn require_reports_missing_vein() {
        let reg = VeinRegistry::new();
        assert!(matches!(reg.require("nope"), Err(FragletError::VeinNotFound(n)) if n == "nope"));
    }
}
