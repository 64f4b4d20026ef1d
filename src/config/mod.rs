/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Configuration module
//!
//! Handles loading and parsing of YAML configuration files: logging
//! settings plus the plugin list the registry is built from.

use crate::config::types::Config;
use crate::core::error::Result;
use std::fs;
use std::path::PathBuf;

pub mod types;

/// Load and parse configuration from a YAML file.
///
/// # Errors
/// Returns an error if the file cannot be read, if YAML parsing fails, or
/// if structural validation fails.
pub fn init(file: &PathBuf) -> Result<Config> {
    let raw = fs::read_to_string(file)?;
    let config: Config = serde_yml::from_str(&raw)?;
    config.validate()?;
    Ok(config)
}
