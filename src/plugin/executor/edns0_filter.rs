/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `edns0_filter` executor plugin.
//!
//! Controls which EDNS0 options travel upstream. Modes, in priority order:
//! `no_edns` removes the whole OPT record, `accept` keeps only the listed
//! option codes, `discard` drops the listed codes, and with no list at all
//! every option is dropped (the OPT record itself stays).

use crate::config::types::PluginConfig;
use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::dns_utils::remove_edns0;
use crate::core::error::{DnsError, Result};
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::{register_plugin_factory, register_preset_plugin};
use ahash::AHashSet;
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::rr::rdata::opt::EdnsCode;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Default)]
struct FilterConfig {
    /// Remove the entire EDNS0 OPT record.
    #[serde(default)]
    no_edns: bool,
    /// Keep only these option codes, discard the rest.
    #[serde(default)]
    accept: Vec<u16>,
    /// Drop these option codes, keep the rest.
    #[serde(default)]
    discard: Vec<u16>,
}

#[derive(Debug)]
enum FilterMode {
    NoEdns,
    Keep(AHashSet<u16>),
    Discard(AHashSet<u16>),
    Clear,
}

#[derive(Debug)]
struct Edns0Filter {
    tag: String,
    mode: FilterMode,
}

impl Edns0Filter {
    fn apply(&self, message: &mut Message) {
        match &self.mode {
            FilterMode::NoEdns => remove_edns0(message),
            FilterMode::Keep(keep) => {
                retain_options(message, |code| keep.contains(&code));
            }
            FilterMode::Discard(discard) => {
                retain_options(message, |code| !discard.contains(&code));
            }
            FilterMode::Clear => {
                retain_options(message, |_| false);
            }
        }
    }
}

fn retain_options(message: &mut Message, keep: impl Fn(u16) -> bool) {
    let Some(edns) = message.extensions_mut() else {
        return;
    };
    let present: Vec<EdnsCode> = edns.options().as_ref().iter().map(|(code, _)| *code).collect();
    for code in present {
        if !keep(u16::from(code)) {
            edns.options_mut().remove(code);
        }
    }
}

#[async_trait]
impl Plugin for Edns0Filter {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for Edns0Filter {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        self.apply(&mut qc.query);
        continue_next!(next, qc)
    }
}

#[derive(Debug, Clone)]
pub struct Edns0FilterFactory;

register_plugin_factory!("edns0_filter", Edns0FilterFactory {});

impl PluginFactory for Edns0FilterFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let _ = parse_mode(plugin_config.args.clone())?;
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let mode = parse_mode(plugin_config.args.clone())?;
        Ok(UninitializedPlugin::Executor(Box::new(Edns0Filter {
            tag: plugin_config.tag.clone(),
            mode,
        })))
    }
}

fn parse_mode(args: Option<serde_yml::Value>) -> Result<FilterMode> {
    let config = match args {
        Some(args) => serde_yml::from_value::<FilterConfig>(args)
            .map_err(|e| DnsError::plugin(format!("failed to parse edns0_filter config: {}", e)))?,
        None => FilterConfig::default(),
    };

    // Priority: no_edns > accept > discard > clear everything.
    if config.no_edns {
        Ok(FilterMode::NoEdns)
    } else if !config.accept.is_empty() {
        Ok(FilterMode::Keep(config.accept.into_iter().collect()))
    } else if !config.discard.is_empty() {
        Ok(FilterMode::Discard(config.discard.into_iter().collect()))
    } else {
        Ok(FilterMode::Clear)
    }
}

fn new_no_edns0(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(Edns0Filter {
        tag: tag.to_string(),
        mode: FilterMode::NoEdns,
    }))
}

fn new_ecs_only(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(Edns0Filter {
        tag: tag.to_string(),
        mode: FilterMode::Keep([u16::from(EdnsCode::Subnet)].into_iter().collect()),
    }))
}

register_preset_plugin!("_edns0_filter_no_edns0", new_no_edns0);
register_preset_plugin!("_edns0_filter_ecs_only", new_ecs_only);

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::TransportProtocol;
    use crate::core::dns_utils::{get_edns0_option, is_edns0, upgrade_edns0};
    use hickory_proto::op::{Message, Query};
    use hickory_proto::rr::rdata::opt::EdnsOption;
    use hickory_proto::rr::{Name, RecordType};

    const CODE_PADDING: u16 = 12;
    const CODE_COOKIE: u16 = 10;

    fn make_context() -> QueryContext {
        let mut request = Message::new();
        request.add_query(Query::query(
            Name::from_ascii("example.com.").unwrap(),
            RecordType::A,
        ));
        upgrade_edns0(&mut request);
        let edns = request.extensions_mut().as_mut().unwrap();
        edns.options_mut()
            .insert(EdnsOption::Unknown(CODE_PADDING, vec![0; 8]));
        edns.options_mut()
            .insert(EdnsOption::Unknown(CODE_COOKIE, vec![1; 8]));
        QueryContext::new(request, "127.0.0.1:5353".parse().unwrap(), TransportProtocol::Udp)
    }

    fn filter(mode: FilterMode) -> Edns0Filter {
        Edns0Filter {
            tag: "edns0_filter".to_string(),
            mode,
        }
    }

    #[tokio::test]
    async fn no_edns_strips_the_opt_record() {
        let mut qc = make_context();
        filter(FilterMode::NoEdns).execute(&mut qc, None).await.unwrap();
        assert!(!is_edns0(&qc.query));
    }

    #[tokio::test]
    async fn accept_keeps_only_listed_codes() {
        let mut qc = make_context();
        filter(FilterMode::Keep([CODE_COOKIE].into_iter().collect()))
            .execute(&mut qc, None)
            .await
            .unwrap();

        assert!(is_edns0(&qc.query));
        assert!(get_edns0_option(&qc.query, EdnsCode::from(CODE_COOKIE)).is_some());
        assert!(get_edns0_option(&qc.query, EdnsCode::Padding).is_none());
    }

    #[tokio::test]
    async fn discard_drops_only_listed_codes() {
        let mut qc = make_context();
        filter(FilterMode::Discard([CODE_PADDING].into_iter().collect()))
            .execute(&mut qc, None)
            .await
            .unwrap();

        assert!(get_edns0_option(&qc.query, EdnsCode::from(CODE_COOKIE)).is_some());
        assert!(get_edns0_option(&qc.query, EdnsCode::Padding).is_none());
    }

    #[tokio::test]
    async fn default_clears_all_options_but_keeps_edns0() {
        let mut qc = make_context();
        filter(FilterMode::Clear).execute(&mut qc, None).await.unwrap();

        assert!(is_edns0(&qc.query));
        assert!(get_edns0_option(&qc.query, EdnsCode::Padding).is_none());
        assert!(get_edns0_option(&qc.query, EdnsCode::from(CODE_COOKIE)).is_none());
    }
}
