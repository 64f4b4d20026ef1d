/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `forward` executor plugin.
//!
//! Wraps a configured set of upstreams and races them for every query. The
//! winning response lands on the context together with a `<tag>@<address>`
//! origin tag; total failure is recorded as `ServerFailed` and the chain
//! continues either way.

use crate::config::types::PluginConfig;
use crate::continue_next;
use crate::core::context::{QueryContext, QueryStatus};
use crate::core::error::{DnsError, Result};
use crate::network::race::{exchange_parallel, RacedUpstream};
use crate::network::upstream::bootstrap::select_fastest;
use crate::network::upstream::{build_upstream, ConnectionInfo, Upstream};
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::register_plugin_factory;
use async_trait::async_trait;
use hickory_proto::op::Message;
use serde::Deserialize;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Ceiling on one racing round across all upstreams.
const FORWARD_TIMEOUT: Duration = Duration::from_secs(3);

/// One configured upstream.
#[derive(Debug, Clone, Deserialize)]
pub struct UpstreamSpec {
    /// Upstream address URL (`udp://`, `tcp://`, `udpme://`, bare IP).
    pub addr: String,

    /// Alternative dial targets; probed at startup, fastest kept.
    #[serde(default)]
    pub dial_addr: Vec<String>,

    /// Accept this upstream's responses regardless of rcode.
    #[serde(default)]
    pub trusted: bool,

    /// Per-query timeout in seconds.
    #[serde(default)]
    pub timeout: Option<u64>,
}

#[derive(Debug, Deserialize)]
pub struct ForwardConfig {
    pub upstreams: Vec<UpstreamSpec>,
}

/// An upstream group still carrying every dial-target candidate; collapsed
/// to one transport during `init`.
#[derive(Debug)]
struct CandidateGroup {
    address: String,
    trusted: bool,
    transports: Vec<Arc<dyn Upstream>>,
}

/// One raceable upstream backed by a chosen transport.
#[derive(Debug)]
struct UpstreamHandle {
    address: String,
    ip_address: Option<IpAddr>,
    trusted: bool,
    transport: Arc<dyn Upstream>,
}

#[async_trait]
impl RacedUpstream for UpstreamHandle {
    async fn exchange(&self, query: Message) -> Result<Message> {
        self.transport.exchange(query).await
    }

    fn trusted(&self) -> bool {
        self.trusted
    }

    fn address(&self) -> &str {
        &self.address
    }

    fn ip_address(&self) -> Option<IpAddr> {
        self.ip_address
    }
}

#[derive(Debug)]
pub struct Forwarder {
    tag: String,
    candidates: Vec<CandidateGroup>,
    upstreams: Vec<Arc<dyn RacedUpstream>>,
}

#[async_trait]
impl Plugin for Forwarder {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {
        // Collapse every candidate group to its fastest dial target. Probing
        // needs the runtime, so it cannot happen at construction.
        for group in self.candidates.drain(..) {
            let chosen = if group.transports.len() > 1 {
                let idx = select_fastest(&group.transports).await;
                info!(
                    upstream = %group.address,
                    candidate = idx,
                    "selected dial target"
                );
                group.transports[idx].clone()
            } else {
                group.transports[0].clone()
            };

            self.upstreams.push(Arc::new(UpstreamHandle {
                address: group.address,
                ip_address: Some(chosen.connection_info().remote_addr.ip()),
                trusted: group.trusted,
                transport: chosen,
            }));
        }

        info!(
            "forward '{}' initialized with {} upstream(s)",
            self.tag,
            self.upstreams.len()
        );
    }

    async fn destroy(&self) {
        debug!("forward '{}' shut down", self.tag);
    }
}

#[async_trait]
impl Executor for Forwarder {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        match tokio::time::timeout(FORWARD_TIMEOUT, exchange_parallel(qc, &self.upstreams)).await
        {
            Ok(Ok(winner)) => {
                qc.from = Some(format!("{}@{}", self.tag, winner.address));
                qc.response = Some(winner.response);
                qc.status = QueryStatus::Responded;
            }
            Ok(Err(e)) => {
                warn!(query = %qc.info(), error = %e, "all upstreams failed");
                qc.status = QueryStatus::ServerFailed;
            }
            Err(_) => {
                warn!(query = %qc.info(), "forwarding timed out");
                qc.status = QueryStatus::ServerFailed;
            }
        }

        continue_next!(next, qc)
    }
}

fn build_candidates(config: &ForwardConfig) -> Result<Vec<CandidateGroup>> {
    let mut groups = Vec::with_capacity(config.upstreams.len());

    for (idx, spec) in config.upstreams.iter().enumerate() {
        if spec.addr.trim().is_empty() {
            return Err(DnsError::plugin("upstream spec is missing 'addr'"));
        }

        // The first upstream is implicitly trusted.
        let trusted = spec.trusted || idx == 0;
        let timeout = spec.timeout.map(Duration::from_secs);

        let mut transports = Vec::new();
        if spec.dial_addr.is_empty() {
            let info = ConnectionInfo::parse(&spec.addr, None, timeout)?;
            transports.push(build_upstream(info)?);
        } else {
            for dial in &spec.dial_addr {
                let info = ConnectionInfo::parse(&spec.addr, Some(dial), timeout)?;
                transports.push(build_upstream(info)?);
            }
        }

        groups.push(CandidateGroup {
            address: spec.addr.clone(),
            trusted,
            transports,
        });
    }

    Ok(groups)
}

#[derive(Debug)]
pub struct ForwardFactory;

register_plugin_factory!("forward", ForwardFactory {});

impl PluginFactory for ForwardFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let config: ForwardConfig = serde_yml::from_value(
            plugin_config
                .args
                .clone()
                .ok_or_else(|| DnsError::plugin("forward requires an 'upstreams' list"))?,
        )
        .map_err(|e| DnsError::plugin(format!("failed to parse forward config: {}", e)))?;

        if config.upstreams.is_empty() {
            return Err(DnsError::plugin("forward requires at least one upstream"));
        }
        for spec in &config.upstreams {
            if spec.addr.trim().is_empty() {
                return Err(DnsError::plugin("upstream spec is missing 'addr'"));
            }
        }
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let config: ForwardConfig = serde_yml::from_value(
            plugin_config
                .args
                .clone()
                .ok_or_else(|| DnsError::plugin("forward requires an 'upstreams' list"))?,
        )
        .map_err(|e| DnsError::plugin(format!("failed to parse forward config: {}", e)))?;

        if config.upstreams.is_empty() {
            return Err(DnsError::plugin("forward requires at least one upstream"));
        }

        let candidates = build_candidates(&config)?;

        Ok(UninitializedPlugin::Executor(Box::new(Forwarder {
            tag: plugin_config.tag.clone(),
            candidates,
            upstreams: Vec::new(),
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::network::race::tests::{make_context, MockBehavior, MockUpstream};
    use hickory_proto::op::ResponseCode;
    use std::net::Ipv4Addr;

    fn forwarder_with(upstreams: Vec<Arc<dyn RacedUpstream>>) -> Forwarder {
        Forwarder {
            tag: "fwd".to_string(),
            candidates: Vec::new(),
            upstreams,
        }
    }

    fn mock(
        address: &str,
        trusted: bool,
        delay_ms: u64,
        behavior: MockBehavior,
    ) -> Arc<dyn RacedUpstream> {
        Arc::new(MockUpstream {
            address: address.to_string(),
            trusted,
            delay: Duration::from_millis(delay_ms),
            behavior,
        })
    }

    #[tokio::test]
    async fn winner_sets_response_from_and_status() {
        let forwarder = forwarder_with(vec![mock(
            "udp://10.0.0.1",
            true,
            5,
            MockBehavior::Respond(ResponseCode::NoError, Some(Ipv4Addr::new(1, 2, 3, 4))),
        )]);
        let mut qc = make_context();

        forwarder.execute(&mut qc, None).await.unwrap();

        assert_eq!(qc.status, QueryStatus::Responded);
        assert_eq!(qc.from.as_deref(), Some("fwd@udp://10.0.0.1"));
        assert!(qc.response.is_some());
    }

    #[tokio::test]
    async fn total_failure_sets_server_failed_without_response() {
        let forwarder = forwarder_with(vec![
            mock("udp://10.0.0.1", false, 5, MockBehavior::Fail("one down")),
            mock("udp://10.0.0.2", false, 20, MockBehavior::Fail("two down")),
        ]);
        let mut qc = make_context();

        forwarder.execute(&mut qc, None).await.unwrap();

        assert_eq!(qc.status, QueryStatus::ServerFailed);
        assert!(qc.response.is_none());
        assert!(qc.from.is_none());
    }

    #[test]
    fn first_upstream_is_implicitly_trusted() {
        let config = ForwardConfig {
            upstreams: vec![
                UpstreamSpec {
                    addr: "udp://10.0.0.1".to_string(),
                    dial_addr: Vec::new(),
                    trusted: false,
                    timeout: None,
                },
                UpstreamSpec {
                    addr: "udp://10.0.0.2".to_string(),
                    dial_addr: Vec::new(),
                    trusted: false,
                    timeout: None,
                },
            ],
        };
        let groups = build_candidates(&config).unwrap();
        assert!(groups[0].trusted);
        assert!(!groups[1].trusted);
    }

    #[test]
    fn dial_addr_list_builds_one_transport_each() {
        let config = ForwardConfig {
            upstreams: vec![UpstreamSpec {
                addr: "udp://8.8.8.8".to_string(),
                dial_addr: vec!["10.0.0.1".to_string(), "10.0.0.2".to_string()],
                trusted: false,
                timeout: None,
            }],
        };
        let groups = build_candidates(&config).unwrap();
        assert_eq!(groups[0].transports.len(), 2);
    }
}
