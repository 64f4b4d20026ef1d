/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Listener plugins. Each server owns a socket, builds one query context
//! per incoming message and hands it to its entry executor.

use crate::config::types::PluginConfig;
use crate::core::error::{DnsError, Result};
use serde::Deserialize;

pub mod tcp;
pub mod udp;

/// Shared listener configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Entry executor plugin tag to process incoming requests
    pub entry: String,

    /// Listen address (e.g. "0.0.0.0:53")
    pub listen: String,
}

pub(crate) fn parse_server_config(plugin_config: &PluginConfig, kind: &str) -> Result<ServerConfig> {
    let config: ServerConfig = serde_yml::from_value(
        plugin_config
            .args
            .clone()
            .ok_or_else(|| DnsError::plugin(format!("{} requires 'listen' and 'entry'", kind)))?,
    )
    .map_err(|e| DnsError::plugin(format!("{} config parsing failed: {}", kind, e)))?;

    if config.entry.trim().is_empty() {
        return Err(DnsError::plugin(format!("{} 'entry' cannot be empty", kind)));
    }
    Ok(config)
}

pub(crate) fn server_dependencies(plugin_config: &PluginConfig) -> Vec<String> {
    plugin_config
        .args
        .as_ref()
        .and_then(|args| serde_yml::from_value::<ServerConfig>(args.clone()).ok())
        .map(|config| vec![config.entry])
        .unwrap_or_default()
}
