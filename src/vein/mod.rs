// src/vein/mod.rs

//! Named execution environments ("veins") and extension-based lookup.

pub mod extensions;
pub mod registry;

pub use extensions::{normalize_extension, ExtensionMap};
pub use registry::{Vein, VeinRegistry, VEINS_DIR_ENV};
