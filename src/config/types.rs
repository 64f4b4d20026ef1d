/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Configuration structure definitions
//!
//! Defines the schema for pipedns configuration files (YAML format).

use serde::Deserialize;
use serde_yml::Value;
use std::net::SocketAddr;
use std::str::FromStr;
use thiserror::Error;

/// Configuration validation errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Plugin tag cannot be empty")]
    EmptyPluginTag,

    #[error("Plugin tag '{0}' is declared more than once")]
    DuplicatePluginTag(String),

    #[error("Plugin tags starting with '_' are reserved for presets: {0}")]
    ReservedPluginTag(String),

    #[error("Invalid listen address: {0}")]
    InvalidListenAddr(String),

    #[error("Invalid log level: {0}")]
    InvalidLogLevel(String),

    #[error("Plugin type cannot be empty")]
    EmptyPluginType,
}

/// Main server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Logging configuration (level, file output)
    #[serde(default)]
    pub log: LogConfig,

    /// List of plugins to load and their configurations
    pub plugins: Vec<PluginConfig>,
}

impl Config {
    /// Validate structural properties of the configuration.
    ///
    /// Plugin-specific validation (upstream specs, pipeline trees) is
    /// delegated to each plugin factory during initialization.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.log.level.to_lowercase().as_str() {
            "off" | "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => return Err(ConfigError::InvalidLogLevel(self.log.level.clone())),
        }

        let mut seen = std::collections::HashSet::new();
        for plugin in &self.plugins {
            if plugin.tag.is_empty() {
                return Err(ConfigError::EmptyPluginTag);
            }
            if plugin.plugin_type.is_empty() {
                return Err(ConfigError::EmptyPluginType);
            }
            if plugin.tag.starts_with('_') {
                return Err(ConfigError::ReservedPluginTag(plugin.tag.clone()));
            }
            if !seen.insert(plugin.tag.as_str()) {
                return Err(ConfigError::DuplicatePluginTag(plugin.tag.clone()));
            }

            // Server listen addresses must parse before any socket is built.
            if plugin.plugin_type == "udp_server" || plugin.plugin_type == "tcp_server" {
                if let Some(listen) = plugin
                    .args
                    .as_ref()
                    .and_then(|args| args.get("listen"))
                    .and_then(|listen| listen.as_str())
                {
                    if SocketAddr::from_str(listen).is_err() {
                        return Err(ConfigError::InvalidListenAddr(listen.to_string()));
                    }
                }
            }
        }

        Ok(())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level: off, trace, debug, info, warn, error
    #[serde(default = "default_level")]
    pub level: String,

    /// Optional file path for log output (in addition to console)
    pub file: Option<String>,
}

impl Default for LogConfig {
    fn default() -> LogConfig {
        LogConfig {
            level: default_level(),
            file: None,
        }
    }
}

fn default_level() -> String {
    "info".to_string()
}

/// Plugin configuration entry
#[derive(Debug, Clone, Deserialize)]
pub struct PluginConfig {
    /// Unique identifier for this plugin instance
    pub tag: String,

    /// Plugin type (e.g., "udp_server", "forward", "sequence")
    #[serde(rename = "type")]
    pub plugin_type: String,

    /// Plugin-specific arguments (parsed by the plugin factory)
    pub args: Option<Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(tag: &str, plugin_type: &str) -> PluginConfig {
        PluginConfig {
            tag: tag.to_string(),
            plugin_type: plugin_type.to_string(),
            args: None,
        }
    }

    #[test]
    fn duplicate_tags_are_rejected() {
        let config = Config {
            log: LogConfig::default(),
            plugins: vec![plugin("fwd", "forward"), plugin("fwd", "forward")],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::DuplicatePluginTag(_))
        ));
    }

    #[test]
    fn preset_namespace_is_reserved() {
        let config = Config {
            log: LogConfig::default(),
            plugins: vec![plugin("_mine", "forward")],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::ReservedPluginTag(_))
        ));
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        let mut server = plugin("srv", "udp_server");
        server.args = Some(serde_yml::from_str("listen: not-an-addr\nentry: seq").unwrap());
        let config = Config {
            log: LogConfig::default(),
            plugins: vec![server],
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidListenAddr(_))
        ));
    }
}
