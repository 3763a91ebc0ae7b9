// src/vein/extensions.rs

use std::collections::BTreeMap;
use std::path::Path;

use tracing::warn;

use crate::errors::{FragletError, Result};
use crate::vein::registry::VeinRegistry;

/// File extension → vein name lookup.
///
/// When several veins claim an extension, the alphabetically first one wins
/// and lookups log a warning naming all claimants.
#[derive(Debug, Clone, Default)]
pub struct ExtensionMap {
    ext_to_vein: BTreeMap<String, String>,
    conflicts: BTreeMap<String, Vec<String>>,
}

impl ExtensionMap {
    pub fn new(registry: &VeinRegistry) -> Self {
        let mut claims: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for vein in registry.iter() {
            for ext in &vein.extensions {
                if let Some(normalized) = normalize_extension(ext) {
                    let owners = claims.entry(normalized).or_default();
                    if !owners.contains(&vein.name) {
                        owners.push(vein.name.clone());
                    }
                }
            }
        }

        let mut map = Self::default();
        for (ext, mut owners) in claims {
            owners.sort();
            map.ext_to_vein.insert(ext.clone(), owners[0].clone());
            if owners.len() > 1 {
                map.conflicts.insert(ext, owners);
            }
        }
        map
    }

    pub fn vein_for_extension(&self, ext: &str) -> Result<&str> {
        let normalized = normalize_extension(ext).unwrap_or_default();
        let vein = self.ext_to_vein.get(&normalized).ok_or_else(|| {
            FragletError::config(format!("unknown extension {ext}, use --vein to specify"))
        })?;

        if let Some(owners) = self.conflicts.get(&normalized) {
            warn!(
                extension = %ext,
                candidates = %owners.join(", "),
                chosen = %vein,
                "ambiguous extension; specify --vein to override"
            );
        }
        Ok(vein.as_str())
    }

    pub fn vein_for_file(&self, path: &Path) -> Result<&str> {
        let ext = path.extension().and_then(|e| e.to_str()).ok_or_else(|| {
            FragletError::config(format!(
                "no extension found in {}, use --vein to specify",
                path.display()
            ))
        })?;
        self.vein_for_extension(ext)
    }

    /// Extensions claimed by more than one vein.
    pub fn conflicts(&self) -> impl Iterator<Item = (&str, &[String])> {
        self.conflicts.iter().map(|(k, v)| (k.as_str(), v.as_slice()))
    }
}

/// Lowercase with a single leading dot; `None` for empty input.
pub fn normalize_extension(ext: &str) -> Option<String> {
    let trimmed = ext.trim().trim_start_matches('.');
    if trimmed.is_empty() {
        return None;
    }
    Some(format!(".{}", trimmed.to_lowercase()))
}
