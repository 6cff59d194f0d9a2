//! Configuration Management
//!
//! Hierarchical resolution:
//! 1. Built-in defaults
//! 2. Global config (~/.config/marksort/config.toml)
//! 3. Project config (.marksort/config.toml)
//! 4. Environment variables (MARKSORT_*)

mod loader;
mod types;

pub use loader::ConfigLoader;
pub use types::*;
