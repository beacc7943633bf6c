//! CLI command implementations.

pub mod manual;
pub mod sweep;

use anyhow::{Context, Result};
use std::path::Path;
use sweep_runner::Config;

/// Load and validate the configuration file.
pub fn load_config(path: &Path) -> Result<Config> {
    Config::from_file(path).with_context(|| format!("Failed to load {}", path.display()))
}
