/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plugin registry for managing plugin factories and instances.
//!
//! Holds the factory map built from link-time registrations and the runtime
//! instance map. Both are populated during startup; the query path only ever
//! reads them.

use crate::config::types::PluginConfig;
use crate::core::error::{DnsError, Result};
use crate::plugin::{
    dependency, FactoryRegistration, PluginFactory, PluginInfo, PresetRegistration,
};
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, info};

pub struct PluginRegistry {
    /// Map of plugin type names to their factory implementations
    factories: HashMap<String, Box<dyn PluginFactory>>,

    /// Map of plugin tags to their runtime instances
    ///
    /// DashMap gives interior mutability so plugins can be registered while
    /// the registry is already shared behind an Arc.
    plugins: DashMap<String, Arc<PluginInfo>>,
}

impl std::fmt::Debug for PluginRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginRegistry")
            .field("factories", &self.factories.keys().collect::<Vec<_>>())
            .field("plugins", &self.plugins.len())
            .finish()
    }
}

impl PluginRegistry {
    /// Create a registry with every factory registered at link time.
    pub fn new() -> Self {
        let mut factories: HashMap<String, Box<dyn PluginFactory>> = HashMap::new();
        for registration in inventory::iter::<FactoryRegistration> {
            factories.insert(registration.plugin_type.to_string(), (registration.construct)());
        }
        Self {
            factories,
            plugins: DashMap::new(),
        }
    }

    /// Instantiate every preset plugin (`_`-prefixed tags).
    ///
    /// Presets carry no configuration and must exist before any user plugin
    /// references them from a pipeline tree.
    pub async fn install_presets(self: &Arc<Self>) {
        for registration in inventory::iter::<PresetRegistration> {
            let uninitialized = (registration.construct)(registration.tag);
            let plugin_type = uninitialized.plugin_type();
            let handle = uninitialized.init_and_wrap().await;
            self.plugins.insert(
                registration.tag.to_string(),
                Arc::new(PluginInfo {
                    tag: registration.tag.to_string(),
                    plugin_type,
                    args: None,
                    handle,
                }),
            );
            debug!("Preset plugin installed: {}", registration.tag);
        }
    }

    /// Initialize all plugins from configuration.
    ///
    /// Validates every config, resolves references into an initialization
    /// order, then creates and initializes plugins one by one.
    pub async fn init_plugins(self: &Arc<Self>, configs: Vec<PluginConfig>) -> Result<()> {
        for config in &configs {
            let factory = self.factory(&config.plugin_type)?;
            factory.validate_config(config)?;
        }

        let get_deps = |config: &PluginConfig| {
            self.factories
                .get(&config.plugin_type)
                .map(|f| f.get_dependencies(config))
                .unwrap_or_default()
        };
        let sorted = dependency::resolve_dependencies(configs, &get_deps)?;

        info!("Initializing {} plugins in dependency order", sorted.len());

        for (idx, plugin_config) in sorted.iter().enumerate() {
            info!(
                "  [{}/{}] Initializing plugin: {} (type: {})",
                idx + 1,
                sorted.len(),
                plugin_config.tag,
                plugin_config.plugin_type
            );

            let factory = self.factory(&plugin_config.plugin_type)?;
            let uninitialized = factory.create(plugin_config, self.clone())?;
            let plugin_type = uninitialized.plugin_type();
            let handle = uninitialized.init_and_wrap().await;

            self.plugins.insert(
                plugin_config.tag.clone(),
                Arc::new(PluginInfo {
                    tag: plugin_config.tag.clone(),
                    plugin_type,
                    args: plugin_config.args.clone(),
                    handle,
                }),
            );
        }

        info!("All plugins initialized successfully");
        Ok(())
    }

    /// Run every plugin's `destroy` hook at shutdown.
    pub async fn destroy_plugins(&self) {
        // Snapshot first; destroy hooks must not run under a shard guard.
        let plugins: Vec<Arc<PluginInfo>> =
            self.plugins.iter().map(|entry| entry.value().clone()).collect();
        for plugin in plugins {
            plugin.destroy().await;
        }
    }

    /// Get a plugin instance by tag
    pub fn get_plugin(&self, tag: &str) -> Option<Arc<PluginInfo>> {
        self.plugins.get(tag).map(|entry| entry.clone())
    }

    /// Get all registered plugin tags
    pub fn plugin_tags(&self) -> Vec<String> {
        self.plugins.iter().map(|entry| entry.key().clone()).collect()
    }

    /// Get the number of registered plugins
    pub fn plugin_count(&self) -> usize {
        self.plugins.len()
    }

    /// Insert an already-built plugin instance. Test seam.
    #[cfg(test)]
    pub fn insert_plugin(&self, info: PluginInfo) {
        self.plugins.insert(info.tag.clone(), Arc::new(info));
    }

    fn factory(&self, plugin_type: &str) -> Result<&dyn PluginFactory> {
        self.factories
            .get(plugin_type)
            .map(|factory| factory.as_ref())
            .ok_or_else(|| DnsError::config(format!("Unknown plugin type: {}", plugin_type)))
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn registry_starts_empty_of_instances() {
        let registry = PluginRegistry::new();
        assert_eq!(registry.plugin_count(), 0);
        assert!(registry.get_plugin("nonexistent").is_none());
    }

    #[test]
    fn builtin_factories_are_collected() {
        let registry = PluginRegistry::new();
        for plugin_type in ["sequence", "forward", "udp_server"] {
            assert!(
                registry.factories.contains_key(plugin_type),
                "missing factory: {}",
                plugin_type
            );
        }
    }

    #[tokio::test]
    async fn presets_are_installed() {
        let registry = Arc::new(PluginRegistry::new());
        registry.install_presets().await;
        for tag in ["_return", "_pad_query", "_reject_any", "_valid_answer"] {
            assert!(registry.get_plugin(tag).is_some(), "missing preset: {}", tag);
        }
    }
}
