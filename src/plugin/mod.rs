/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plugin system: capabilities, factories and instance bookkeeping.
//!
//! Every pipeline feature is a plugin. A plugin instance satisfies exactly
//! one runtime capability: executor (advances the pipeline), matcher
//! (boolean over the query context) or server (owns a listener): and the
//! logic-tree builder is the single place that understands how capabilities
//! compose.
//!
//! Factories are registered at link time through `register_plugin_factory!`
//! and looked up by the config `type` field. Preset plugins (tags starting
//! with `_`) are stateless instances installed before any user plugin.

use crate::config::types::PluginConfig;
use crate::core::error::Result;
use crate::plugin::executor::Executor;
use crate::plugin::matcher::Matcher;
use async_trait::async_trait;
use serde_yml::Value;
use std::fmt::{self, Debug, Formatter};
use std::sync::Arc;

pub mod dependency;
pub mod executor;
pub mod matcher;
pub mod registry;
pub mod server;

pub use registry::PluginRegistry;

/// Base capability shared by all plugin instances.
#[async_trait]
pub trait Plugin: Debug + Send + Sync + 'static {
    fn tag(&self) -> &str;

    async fn init(&mut self);

    async fn destroy(&self);
}

/// Runtime capability of a plugin instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PluginType {
    Executor,
    Matcher,
    Server,
}

impl fmt::Display for PluginType {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let name = match self {
            PluginType::Executor => "executor",
            PluginType::Matcher => "matcher",
            PluginType::Server => "server",
        };
        f.write_str(name)
    }
}

/// A freshly created plugin, before `init` has run.
pub enum UninitializedPlugin {
    Executor(Box<dyn Executor>),
    Matcher(Box<dyn Matcher>),
    Server(Box<dyn Plugin>),
}

impl UninitializedPlugin {
    pub fn plugin_type(&self) -> PluginType {
        match self {
            UninitializedPlugin::Executor(_) => PluginType::Executor,
            UninitializedPlugin::Matcher(_) => PluginType::Matcher,
            UninitializedPlugin::Server(_) => PluginType::Server,
        }
    }

    /// Run `init` and freeze the instance behind an `Arc`.
    pub async fn init_and_wrap(self) -> PluginHandle {
        match self {
            UninitializedPlugin::Executor(mut plugin) => {
                plugin.init().await;
                PluginHandle::Executor(Arc::from(plugin))
            }
            UninitializedPlugin::Matcher(mut plugin) => {
                plugin.init().await;
                PluginHandle::Matcher(Arc::from(plugin))
            }
            UninitializedPlugin::Server(mut plugin) => {
                plugin.init().await;
                PluginHandle::Server(Arc::from(plugin))
            }
        }
    }
}

/// Initialized, shareable plugin instance.
#[derive(Debug, Clone)]
pub enum PluginHandle {
    Executor(Arc<dyn Executor>),
    Matcher(Arc<dyn Matcher>),
    Server(Arc<dyn Plugin>),
}

/// Registry entry for one plugin instance.
#[derive(Debug)]
pub struct PluginInfo {
    pub tag: String,
    pub plugin_type: PluginType,
    pub args: Option<Value>,
    pub handle: PluginHandle,
}

impl PluginInfo {
    pub fn executor(&self) -> Option<Arc<dyn Executor>> {
        match &self.handle {
            PluginHandle::Executor(executor) => Some(executor.clone()),
            _ => None,
        }
    }

    pub fn matcher(&self) -> Option<Arc<dyn Matcher>> {
        match &self.handle {
            PluginHandle::Matcher(matcher) => Some(matcher.clone()),
            _ => None,
        }
    }

    pub async fn destroy(&self) {
        match &self.handle {
            PluginHandle::Executor(plugin) => plugin.destroy().await,
            PluginHandle::Matcher(plugin) => plugin.destroy().await,
            PluginHandle::Server(plugin) => plugin.destroy().await,
        }
    }
}

/// Plugin construction factory, one per config `type`.
pub trait PluginFactory: Send + Sync {
    /// Check the plugin arguments before anything is constructed.
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()>;

    /// Tags of other plugins this one references; used to order
    /// initialization. References outside the config set (presets) are
    /// resolved later and may be listed freely.
    fn get_dependencies(&self, _plugin_config: &PluginConfig) -> Vec<String> {
        Vec::new()
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin>;
}

/// Link-time factory registration record, submitted by
/// `register_plugin_factory!`.
pub struct FactoryRegistration {
    pub plugin_type: &'static str,
    pub construct: fn() -> Box<dyn PluginFactory>,
}

inventory::collect!(FactoryRegistration);

/// Link-time preset registration record, submitted by
/// `register_preset_plugin!`. Presets are instantiated once at startup under
/// their reserved `_`-prefixed tag.
pub struct PresetRegistration {
    pub tag: &'static str,
    pub construct: fn(&str) -> UninitializedPlugin,
}

inventory::collect!(PresetRegistration);

/// Register a plugin factory under a config `type` name.
#[macro_export]
macro_rules! register_plugin_factory {
    ($name:literal, $factory:expr) => {
        inventory::submit! {
            $crate::plugin::FactoryRegistration {
                plugin_type: $name,
                construct: || Box::new($factory),
            }
        }
    };
}

/// Register a preset plugin instance under a reserved `_` tag.
#[macro_export]
macro_rules! register_preset_plugin {
    ($tag:literal, $construct:expr) => {
        inventory::submit! {
            $crate::plugin::PresetRegistration {
                tag: $tag,
                construct: $construct,
            }
        }
    };
}
