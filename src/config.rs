// src/config.rs

//! Configuration loading utilities.
//!
//! This module provides convenience functions for loading the run
//! configuration the way the CLI does.

use std::path::Path;

use crate::error::Result;
use crate::models::Config;

/// Load `config.toml` (or defaults when it is missing), apply environment
/// overrides and validate the result.
pub fn load_config(path: impl AsRef<Path>) -> Result<Config> {
    let path = path.as_ref();
    let mut config = if path.exists() {
        Config::load(path)?
    } else {
        log::warn!("{} not found; using built-in defaults", path.display());
        Config::default()
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}
