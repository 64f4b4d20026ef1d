/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Upstream DNS resolver infrastructure.
//!
//! Parses upstream URLs into connection info and builds the transports the
//! forwarder races. This build ships plain UDP and TCP (plus the
//! minimum-EDNS `udpme` variant); encrypted transports parse but are
//! rejected at construction.

use crate::core::error::{DnsError, Result};
use async_trait::async_trait;
use hickory_proto::op::Message;
use std::fmt::Debug;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::time::Duration;
use tracing::warn;
use url::Url;

pub mod bootstrap;
pub mod tcp;
pub mod udp;
pub mod udpme;

/// Supported upstream connection types
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionType {
    Udp,
    Tcp,
    /// UDP, but responses without an EDNS0 OPT record are discarded.
    UdpMe,
    Dot,
    Doq,
    Doh,
}

impl ConnectionType {
    /// Returns the default port for each connection type
    pub fn default_port(&self) -> u16 {
        match self {
            ConnectionType::Udp | ConnectionType::Tcp | ConnectionType::UdpMe => 53,
            ConnectionType::Dot | ConnectionType::Doq => 853,
            ConnectionType::Doh => 443,
        }
    }

    fn from_scheme(scheme: &str) -> Result<Self> {
        match scheme {
            "udp" | "" => Ok(ConnectionType::Udp),
            "tcp" => Ok(ConnectionType::Tcp),
            "udpme" => Ok(ConnectionType::UdpMe),
            "tls" => Ok(ConnectionType::Dot),
            "quic" | "doq" => Ok(ConnectionType::Doq),
            "https" | "doh" | "h3" => Ok(ConnectionType::Doh),
            other => Err(DnsError::config(format!(
                "unknown upstream scheme '{}'",
                other
            ))),
        }
    }
}

/// Parsed connection parameters for one upstream transport.
#[derive(Debug, Clone)]
pub struct ConnectionInfo {
    pub connection_type: ConnectionType,

    /// Original address string from configuration (for logging)
    pub raw_addr: String,

    /// Hostname or IP literal from the URL
    pub server_name: String,

    /// Resolved dial target
    pub remote_addr: SocketAddr,

    /// DNS query timeout (includes I/O and round-trip time)
    pub timeout: Duration,
}

impl ConnectionInfo {
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

    /// Parse an upstream address. `dial_addr`, when given, overrides the
    /// dial target while `addr` keeps naming the upstream in logs.
    pub fn parse(addr: &str, dial_addr: Option<&str>, timeout: Option<Duration>) -> Result<Self> {
        let normalized = if addr.contains("://") {
            addr.to_string()
        } else {
            format!("udp://{}", addr)
        };

        let url = Url::parse(&normalized)
            .map_err(|e| DnsError::config(format!("invalid upstream address '{}': {}", addr, e)))?;

        let connection_type = ConnectionType::from_scheme(url.scheme())?;
        let host = url
            .host_str()
            .ok_or_else(|| DnsError::config(format!("upstream address '{}' has no host", addr)))?
            .trim_matches(|c| c == '[' || c == ']')
            .to_string();
        let port = url.port().unwrap_or_else(|| connection_type.default_port());

        let remote_addr = match dial_addr {
            Some(dial) => resolve_dial_target(dial, port)?,
            None => resolve_dial_target(&host, port)?,
        };

        Ok(ConnectionInfo {
            connection_type,
            raw_addr: addr.to_string(),
            server_name: host,
            remote_addr,
            timeout: timeout.unwrap_or(Self::DEFAULT_TIMEOUT),
        })
    }
}

/// Turn a dial target (`ip`, `ip:port`, `host`, `host:port`) into a socket
/// address. Hostnames go through the system resolver once, at build time.
fn resolve_dial_target(target: &str, default_port: u16) -> Result<SocketAddr> {
    let target = target.trim();
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, default_port));
    }
    if let Ok(sock) = target.parse::<SocketAddr>() {
        return Ok(sock);
    }

    let with_port = if target.contains(':') && !target.contains(']') {
        target.to_string()
    } else {
        format!("{}:{}", target, default_port)
    };

    with_port
        .to_socket_addrs()
        .map_err(|e| DnsError::config(format!("cannot resolve upstream '{}': {}", target, e)))?
        .next()
        .ok_or_else(|| {
            DnsError::config(format!("upstream '{}' resolved to no addresses", target))
        })
}

/// One upstream transport. Implementations provide the raw exchange; the
/// trait adds uniform timeout handling on top.
#[async_trait]
pub trait Upstream: Send + Sync + Debug {
    /// Raw exchange without timeout protection. Callers use `exchange`.
    #[doc(hidden)]
    async fn inner_exchange(&self, query: Message) -> Result<Message>;

    fn connection_info(&self) -> &ConnectionInfo;

    #[inline]
    fn timeout(&self) -> Duration {
        self.connection_info().timeout
    }

    /// Send a DNS query with unified timeout handling.
    async fn exchange(&self, query: Message) -> Result<Message> {
        let timeout_duration = self.timeout();
        match tokio::time::timeout(timeout_duration, self.inner_exchange(query)).await {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(
                    addr = %self.connection_info().raw_addr,
                    timeout_secs = timeout_duration.as_secs_f64(),
                    "upstream DNS query timeout"
                );
                Err(DnsError::protocol(format!(
                    "DNS query timeout after {:?}",
                    timeout_duration
                )))
            }
        }
    }
}

/// Build one transport for a parsed address.
pub fn build_upstream(info: ConnectionInfo) -> Result<std::sync::Arc<dyn Upstream>> {
    match info.connection_type {
        ConnectionType::Udp => Ok(std::sync::Arc::new(udp::UdpUpstream::new(info))),
        ConnectionType::Tcp => Ok(std::sync::Arc::new(tcp::TcpUpstream::new(info))),
        ConnectionType::UdpMe => Ok(std::sync::Arc::new(udpme::UdpMeUpstream::new(info))),
        ConnectionType::Dot | ConnectionType::Doq | ConnectionType::Doh => {
            Err(DnsError::config(format!(
                "upstream '{}': encrypted transports are not part of this build",
                info.raw_addr
            )))
        }
    }
}
