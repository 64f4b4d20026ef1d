/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `qtype` matcher plugin.
//!
//! Matches DNS question types in the request.

use crate::config::types::PluginConfig;
use crate::core::context::QueryContext;
use crate::core::error::Result;
use crate::plugin::matcher::matcher_utils::{
    parse_record_type, parse_rules_from_value, parse_u16_rules, validate_non_empty_rules,
};
use crate::plugin::matcher::Matcher;
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::register_plugin_factory;
use ahash::AHashSet;
use async_trait::async_trait;
use std::sync::Arc;

#[derive(Debug, Clone)]
pub struct QtypeFactory;

register_plugin_factory!("qtype", QtypeFactory {});

impl PluginFactory for QtypeFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let rules = parse_rules_from_value(plugin_config.args.clone())?;
        validate_non_empty_rules("qtype", &rules)?;
        let _ = parse_u16_rules("qtype", &rules, parse_record_type)?;
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let rules = parse_rules_from_value(plugin_config.args.clone())?;
        validate_non_empty_rules("qtype", &rules)?;
        let qtypes = parse_u16_rules("qtype", &rules, parse_record_type)?;
        Ok(UninitializedPlugin::Matcher(Box::new(QtypeMatcher {
            tag: plugin_config.tag.clone(),
            qtypes,
        })))
    }
}

#[derive(Debug)]
struct QtypeMatcher {
    tag: String,
    qtypes: AHashSet<u16>,
}

#[async_trait]
impl Plugin for QtypeMatcher {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Matcher for QtypeMatcher {
    async fn is_match(&self, qc: &mut QueryContext) -> Result<bool> {
        Ok(qc
            .query
            .queries()
            .iter()
            .any(|q| self.qtypes.contains(&u16::from(q.query_type()))))
    }
}
