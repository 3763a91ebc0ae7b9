#![allow(dead_code)]

use std::collections::BTreeMap;
use fraglet::config::{ConfigFile, RawConfigFile, RunnerSection, VeinConfig};

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                runner: RunnerSection::default(),
                vein: BTreeMap::new(),
            },
        }
    }

    pub fn with_vein(mut self, name: &str, vein: VeinConfig) -> Self {
        self.config.vein.insert(name.to_string(), vein);
        self
    }

    pub fn with_runtime(mut self, runtime: &str) -> Self {
        self.config.runner.container_runtime = runtime.to_string();
        self
    }

    pub fn with_platform(mut self, platform: &str) -> Self {
        self.config.runner.platform = platform.to_string();
        self
    }

    pub fn with_fraglet_path(mut self, path: &str) -> Self {
        self.config.runner.fraglet_path = path.to_string();
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }
}

impl Default for ConfigFileBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `VeinConfig`.
pub struct VeinConfigBuilder {
    vein: VeinConfig,
}

impl VeinConfigBuilder {
    pub fn new(container: &str) -> Self {
        Self {
            vein: VeinConfig {
                container: container.to_string(),
                extensions: vec![],
            },
        }
    }

    pub fn extension(mut self, ext: &str) -> Self {
        self.vein.extensions.push(ext.to_string());
        self
    }

    pub fn build(self) -> VeinConfig {
        self.vein
    }
}
