/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `bufsize` executor plugin.
//!
//! Clamps the advertised EDNS0 UDP payload size of the query. Useful in
//! front of upstreams that mishandle large advertisements. Sizes outside
//! (512, 4096] are ignored or clamped.

use crate::config::types::PluginConfig;
use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::error::{DnsError, Result};
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::register_plugin_factory;
use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize)]
struct BufSizeConfig {
    /// Maximum UDP payload size to advertise; effective range (512, 4096].
    size: u16,
}

#[derive(Debug)]
struct BufSize {
    tag: String,
    size: u16,
}

impl BufSize {
    fn effective_size(&self) -> u16 {
        if self.size <= 512 {
            return 0;
        }
        self.size.min(4096)
    }
}

#[async_trait]
impl Plugin for BufSize {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for BufSize {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        if let Some(edns) = qc.query.extensions_mut() {
            let max_size = self.effective_size();
            if max_size > 0 && edns.max_payload() > max_size {
                edns.set_max_payload(max_size);
            }
        }

        continue_next!(next, qc)
    }
}

#[derive(Debug, Clone)]
pub struct BufSizeFactory;

register_plugin_factory!("bufsize", BufSizeFactory {});

impl PluginFactory for BufSizeFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let _: BufSizeConfig = serde_yml::from_value(
            plugin_config
                .args
                .clone()
                .ok_or_else(|| DnsError::plugin("bufsize requires a 'size'"))?,
        )
        .map_err(|e| DnsError::plugin(format!("failed to parse bufsize config: {}", e)))?;
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let config: BufSizeConfig = serde_yml::from_value(
            plugin_config
                .args
                .clone()
                .ok_or_else(|| DnsError::plugin("bufsize requires a 'size'"))?,
        )
        .map_err(|e| DnsError::plugin(format!("failed to parse bufsize config: {}", e)))?;

        Ok(UninitializedPlugin::Executor(Box::new(BufSize {
            tag: plugin_config.tag.clone(),
            size: config.size,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::TransportProtocol;
    use crate::core::dns_utils::upgrade_edns0;
    use hickory_proto::op::{Message, Query};
    use hickory_proto::rr::{Name, RecordType};

    fn make_context(edns0: bool, payload: u16) -> QueryContext {
        let mut request = Message::new();
        request.add_query(Query::query(
            Name::from_ascii("example.com.").unwrap(),
            RecordType::A,
        ));
        if edns0 {
            upgrade_edns0(&mut request);
            request.extensions_mut().as_mut().unwrap().set_max_payload(payload);
        }
        QueryContext::new(request, "127.0.0.1:5353".parse().unwrap(), TransportProtocol::Udp)
    }

    fn bufsize(size: u16) -> BufSize {
        BufSize {
            tag: "bufsize".to_string(),
            size,
        }
    }

    #[tokio::test]
    async fn large_advertisement_is_clamped() {
        let mut qc = make_context(true, 4096);
        bufsize(1232).execute(&mut qc, None).await.unwrap();
        assert_eq!(qc.query.extensions().as_ref().unwrap().max_payload(), 1232);
    }

    #[tokio::test]
    async fn smaller_advertisement_is_kept() {
        let mut qc = make_context(true, 512);
        bufsize(1232).execute(&mut qc, None).await.unwrap();
        assert_eq!(qc.query.extensions().as_ref().unwrap().max_payload(), 512);
    }

    #[tokio::test]
    async fn out_of_range_size_does_nothing() {
        let mut qc = make_context(true, 4096);
        bufsize(400).execute(&mut qc, None).await.unwrap();
        assert_eq!(qc.query.extensions().as_ref().unwrap().max_payload(), 4096);
    }

    #[tokio::test]
    async fn non_edns0_query_is_untouched() {
        let mut qc = make_context(false, 0);
        bufsize(1232).execute(&mut qc, None).await.unwrap();
        assert!(qc.query.extensions().is_none());
    }
}
