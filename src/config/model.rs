// src/config/model.rs

use std::collections::BTreeMap;

use serde::Deserialize;

use crate::runner::docker::DEFAULT_RUNTIME;
use crate::runner::DEFAULT_PLATFORM;

/// In-container path the CLI mounts fragment code at.
pub const DEFAULT_FRAGLET_PATH: &str = "/FRAGLET";

/// Configuration as read from a TOML file, before validation.
///
/// ```toml
/// [runner]
/// container_runtime = "docker"
/// platform = "linux/amd64"
/// fraglet_path = "/FRAGLET"
///
/// [vein.python]
/// container = "registry.example/python:3.12"
/// extensions = [".py"]
/// ```
///
/// All sections are optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    #[serde(default)]
    pub runner: RunnerSection,

    /// Veins keyed by name, from `[vein.<name>]`.
    #[serde(default)]
    pub vein: BTreeMap<String, VeinConfig>,
}

/// Validated configuration.
///
/// Only obtainable through `TryFrom<RawConfigFile>` (see `validate.rs`) or
/// [`ConfigFile::default`].
#[derive(Debug, Clone, Default)]
pub struct ConfigFile {
    pub runner: RunnerSection,
    pub vein: BTreeMap<String, VeinConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(runner: RunnerSection, vein: BTreeMap<String, VeinConfig>) -> Self {
        Self { runner, vein }
    }
}

/// `[runner]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RunnerSection {
    /// Program driving the container backend (`docker`, `podman`, ...).
    #[serde(default = "default_container_runtime")]
    pub container_runtime: String,

    /// Platform images are pulled and run for.
    #[serde(default = "default_platform")]
    pub platform: String,

    /// Where the CLI mounts fragment code inside the container.
    #[serde(default = "default_fraglet_path")]
    pub fraglet_path: String,
}

fn default_container_runtime() -> String {
    DEFAULT_RUNTIME.to_string()
}

fn default_platform() -> String {
    DEFAULT_PLATFORM.to_string()
}

fn default_fraglet_path() -> String {
    DEFAULT_FRAGLET_PATH.to_string()
}

impl Default for RunnerSection {
    fn default() -> Self {
        Self {
            container_runtime: default_container_runtime(),
            platform: default_platform(),
            fraglet_path: default_fraglet_path(),
        }
    }
}

/// `[vein.<name>]` section.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct VeinConfig {
    /// Container image reference.
    pub container: String,

    /// File extensions mapped to this vein, with or without the leading dot.
    #[serde(default)]
    pub extensions: Vec<String>,
}
