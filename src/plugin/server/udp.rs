/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! UDP DNS server plugin.
//!
//! Listens for DNS queries over UDP and processes them through the entry
//! executor. One handler task per datagram; finished tasks are reaped
//! without blocking the receive loop.

use crate::config::types::PluginConfig;
use crate::core::context::{QueryContext, TransportProtocol};
use crate::core::error::Result;
use crate::core::handler::handle_query;
use crate::plugin::executor::Executor;
use crate::plugin::server::{parse_server_config, server_dependencies};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::register_plugin_factory;
use async_trait::async_trait;
use futures::StreamExt;
use hickory_proto::op::Message;
use hickory_proto::runtime::TokioRuntimeProvider;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use hickory_proto::udp::UdpStream;
use hickory_proto::xfer::SerialMessage;
use hickory_proto::{BufDnsStreamHandle, DnsStreamHandle};
use socket2::{Domain, Protocol, Socket, Type};
use std::io;
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

#[derive(Debug)]
pub struct UdpServer {
    tag: String,
    listen: String,
    entry_tag: String,
    entry: Option<Arc<dyn Executor>>,
}

#[async_trait]
impl Plugin for UdpServer {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {
        let Some(entry) = self.entry.clone() else {
            error!("UDP server '{}' has no entry executor", self.tag);
            return;
        };
        let listen = self.listen.clone();

        info!("Starting UDP server on {} (entry: {})", listen, self.entry_tag);
        tokio::spawn(run_server(listen, entry));
    }

    async fn destroy(&self) {}
}

/// Main UDP server loop.
async fn run_server(addr: String, entry: Arc<dyn Executor>) {
    let socket = match build_udp_socket(&addr) {
        Ok(s) => s,
        Err(e) => {
            error!("Failed to bind UDP socket to {}: {}", addr, e);
            return;
        }
    };

    let (mut stream, stream_handle) =
        UdpStream::<TokioRuntimeProvider>::with_bound(socket, ([127, 255, 255, 254], 0).into());
    let stream_handle = Arc::new(stream_handle);

    let mut handler_tasks = JoinSet::new();
    debug!("UDP server event loop started on {}", addr);

    loop {
        let message = match stream.next().await {
            None => break,
            Some(Err(error)) => {
                warn!(%error, "Error receiving message on UDP socket");
                continue;
            }
            Some(Ok(message)) => message,
        };

        handler_tasks.spawn(handle_datagram(entry.clone(), stream_handle.clone(), message));

        reap_tasks(&mut handler_tasks);
    }
}

/// Handle a single DNS datagram: decode, run the pipeline, reply.
async fn handle_datagram(
    entry: Arc<dyn Executor>,
    stream_handle: Arc<BufDnsStreamHandle>,
    message: SerialMessage,
) {
    let (bytes, src_addr) = message.into_parts();

    let request = match Message::from_bytes(&bytes) {
        Ok(request) => request,
        Err(e) => {
            warn!(client = %src_addr, error = %e, "dropping undecodable datagram");
            return;
        }
    };
    if request.queries().is_empty() {
        warn!(client = %src_addr, "dropping query without question");
        return;
    }

    let mut qc = QueryContext::new(request, src_addr, TransportProtocol::Udp);
    let Some(response) = handle_query(&entry, &mut qc).await else {
        return;
    };

    let wire = match response.to_bytes() {
        Ok(wire) => wire,
        Err(e) => {
            warn!(query = %qc.info(), error = %e, "failed to encode response");
            return;
        }
    };
    if let Err(e) = stream_handle
        .with_remote_addr(src_addr)
        .send(SerialMessage::new(wire, src_addr))
    {
        warn!(client = %src_addr, error = %e, "failed to send UDP response");
    }
}

/// Non-blocking cleanup of finished handler tasks.
fn reap_tasks(join_set: &mut JoinSet<()>) {
    while join_set.try_join_next().is_some() {}
}

/// Build a UDP socket with reuse_address and reuse_port options.
fn build_udp_socket(addr: &str) -> Result<UdpSocket> {
    let addr = SocketAddr::from_str(addr)
        .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e))?;

    let sock = if addr.is_ipv4() {
        Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?
    } else {
        Socket::new(Domain::IPV6, Type::DGRAM, Some(Protocol::UDP))?
    };

    let _ = sock.set_nonblocking(true);
    let _ = sock.set_reuse_address(true);
    #[cfg(not(target_os = "windows"))]
    let _ = sock.set_reuse_port(true);

    sock.bind(&addr.into())?;

    Ok(UdpSocket::from_std(sock.into())?)
}

#[derive(Debug)]
pub struct UdpServerFactory;

register_plugin_factory!("udp_server", UdpServerFactory {});

impl PluginFactory for UdpServerFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let config = parse_server_config(plugin_config, "udp_server")?;
        SocketAddr::from_str(&config.listen).map_err(|_| {
            crate::core::error::DnsError::plugin(format!(
                "invalid UDP listen address: {}",
                config.listen
            ))
        })?;
        Ok(())
    }

    fn get_dependencies(&self, plugin_config: &PluginConfig) -> Vec<String> {
        server_dependencies(plugin_config)
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        // Entry resolution happens here; dependency ordering guarantees it.
        let config = parse_server_config(plugin_config, "udp_server")?;

        let entry = registry
            .get_plugin(&config.entry)
            .ok_or_else(|| {
                crate::core::error::DnsError::plugin(format!(
                    "UDP server '{}' entry plugin '{}' not found",
                    plugin_config.tag, config.entry
                ))
            })?
            .executor()
            .ok_or_else(|| {
                crate::core::error::DnsError::plugin(format!(
                    "UDP server '{}' entry '{}' is not an executor",
                    plugin_config.tag, config.entry
                ))
            })?;

        Ok(UninitializedPlugin::Server(Box::new(UdpServer {
            tag: plugin_config.tag.clone(),
            listen: config.listen,
            entry_tag: config.entry,
            entry: Some(entry),
        })))
    }
}

