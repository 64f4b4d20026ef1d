/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `sequence` executor plugin.
//!
//! Compiles its arguments through the logic-tree builder and runs the
//! resulting chain. Also registers the `_return` preset, which terminates
//! the chain it appears in.

pub mod chain;
pub mod logic_tree;
pub mod parallel;

use crate::config::types::PluginConfig;
use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::error::{DnsError, Result};
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::sequence::logic_tree::{build_logic_tree, collect_refs};
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::{register_plugin_factory, register_preset_plugin};
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug)]
pub struct Sequence {
    tag: String,
    root: Arc<dyn ChainNode>,
}

#[async_trait]
impl Plugin for Sequence {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for Sequence {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        self.root.run(qc).await?;
        continue_next!(next, qc)
    }
}

#[derive(Debug, Clone)]
pub struct SequenceFactory;

register_plugin_factory!("sequence", SequenceFactory {});

impl PluginFactory for SequenceFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        if plugin_config.args.is_none() {
            return Err(DnsError::plugin(format!(
                "sequence '{}' requires a pipeline description",
                plugin_config.tag
            )));
        }
        Ok(())
    }

    fn get_dependencies(&self, plugin_config: &PluginConfig) -> Vec<String> {
        let mut refs = Vec::new();
        if let Some(args) = &plugin_config.args {
            collect_refs(args, &mut refs);
        }
        refs
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let args = plugin_config.args.as_ref().ok_or_else(|| {
            DnsError::plugin(format!(
                "sequence '{}' requires a pipeline description",
                plugin_config.tag
            ))
        })?;

        let root = build_logic_tree(args, &registry).map_err(|e| {
            DnsError::plugin(format!("cannot build sequence '{}': {}", plugin_config.tag, e))
        })?;

        Ok(UninitializedPlugin::Executor(Box::new(Sequence {
            tag: plugin_config.tag.clone(),
            root,
        })))
    }
}

/// `_return`: ends the chain it appears in by not invoking `next`.
#[derive(Debug)]
struct ReturnExecutor {
    tag: String,
}

#[async_trait]
impl Plugin for ReturnExecutor {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for ReturnExecutor {
    async fn execute(
        &self,
        _qc: &mut QueryContext,
        _next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        Ok(())
    }
}

fn new_return(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(ReturnExecutor {
        tag: tag.to_string(),
    }))
}

register_preset_plugin!("_return", new_return);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plugin::executor::sequence::logic_tree::tests::{make_context, test_registry, Journal};
    use crate::plugin::{PluginInfo, PluginType};

    #[tokio::test]
    async fn return_preset_short_circuits_a_chain() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        registry.insert_plugin(PluginInfo {
            tag: "_return".to_string(),
            plugin_type: PluginType::Executor,
            args: None,
            handle: new_return("_return").init_and_wrap().await,
        });

        let value = serde_yml::from_str("[alpha, _return, beta]").unwrap();
        let tree = build_logic_tree(&value, &registry).unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["alpha"]);
    }

    #[test]
    fn sequence_dependencies_come_from_the_tree() {
        let factory = SequenceFactory;
        let config = PluginConfig {
            tag: "main".to_string(),
            plugin_type: "sequence".to_string(),
            args: Some(
                serde_yml::from_str("- if: [block_aaaa]\n  exec: reject\n- forward_all").unwrap(),
            ),
        };
        assert_eq!(
            factory.get_dependencies(&config),
            vec!["block_aaaa", "reject", "forward_all"]
        );
    }
}
