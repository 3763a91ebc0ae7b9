// src/config/mod.rs

//! Configuration loading and validation for fraglet.
//!
//! - `model.rs` defines the TOML-backed data model.
//! - `loader.rs` finds and reads the config file.
//! - `validate.rs` checks invariants and produces a [`ConfigFile`].

pub mod loader;
pub mod model;
pub mod validate;

pub use loader::{load_and_validate, load_from_path, load_or_default};
pub use model::{ConfigFile, RawConfigFile, RunnerSection, VeinConfig, DEFAULT_FRAGLET_PATH};
pub use validate::validate_config;
