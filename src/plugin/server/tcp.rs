/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! TCP DNS server plugin.
//!
//! Accepts connections and serves queries with RFC 1035 §4.2.2 framing
//! (two-byte big-endian length prefix). Each connection runs in its own
//! task and may carry several queries back to back.

use crate::config::types::PluginConfig;
use crate::core::context::{QueryContext, TransportProtocol};
use crate::core::error::{DnsError, Result};
use crate::core::handler::handle_query;
use crate::plugin::executor::Executor;
use crate::plugin::server::{parse_server_config, server_dependencies};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::register_plugin_factory;
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::SocketAddr;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tracing::{debug, error, info, warn};

/// Idle cutoff between queries on one connection.
const CONNECTION_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Upper bound on one framed message.
const MAX_MESSAGE_SIZE: usize = u16::MAX as usize;

#[derive(Debug)]
pub struct TcpServer {
    tag: String,
    listen: String,
    entry_tag: String,
    entry: Option<Arc<dyn Executor>>,
}

#[async_trait]
impl Plugin for TcpServer {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {
        let Some(entry) = self.entry.clone() else {
            error!("TCP server '{}' has no entry executor", self.tag);
            return;
        };
        let listen = self.listen.clone();

        info!("Starting TCP server on {} (entry: {})", listen, self.entry_tag);
        tokio::spawn(run_server(listen, entry));
    }

    async fn destroy(&self) {}
}

async fn run_server(addr: String, entry: Arc<dyn Executor>) {
    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind TCP listener to {}: {}", addr, e);
            return;
        }
    };

    debug!("TCP server accept loop started on {}", addr);
    loop {
        match listener.accept().await {
            Ok((stream, peer)) => {
                tokio::spawn(handle_connection(stream, peer, entry.clone()));
            }
            Err(e) => {
                warn!(error = %e, "TCP accept failed");
            }
        }
    }
}

/// Serve queries on one connection until the peer closes or goes idle.
async fn handle_connection(mut stream: TcpStream, peer: SocketAddr, entry: Arc<dyn Executor>) {
    loop {
        let bytes = match tokio::time::timeout(CONNECTION_IDLE_TIMEOUT, read_frame(&mut stream))
            .await
        {
            Err(_) => {
                debug!(client = %peer, "closing idle TCP connection");
                return;
            }
            Ok(Err(_)) | Ok(Ok(None)) => return,
            Ok(Ok(Some(bytes))) => bytes,
        };

        let request = match Message::from_bytes(&bytes) {
            Ok(request) => request,
            Err(e) => {
                warn!(client = %peer, error = %e, "dropping undecodable TCP message");
                return;
            }
        };
        if request.queries().is_empty() {
            warn!(client = %peer, "dropping query without question");
            return;
        }

        let mut qc = QueryContext::new(request, peer, TransportProtocol::Tcp);
        let Some(response) = handle_query(&entry, &mut qc).await else {
            continue;
        };

        let wire = match response.to_bytes() {
            Ok(wire) => wire,
            Err(e) => {
                warn!(query = %qc.info(), error = %e, "failed to encode response");
                continue;
            }
        };
        if wire.len() > MAX_MESSAGE_SIZE {
            warn!(query = %qc.info(), "response exceeds TCP message size");
            continue;
        }

        let mut framed = BytesMut::with_capacity(wire.len() + 2);
        framed.put_u16(wire.len() as u16);
        framed.put_slice(&wire);
        if let Err(e) = stream.write_all(&framed).await {
            debug!(client = %peer, error = %e, "failed to write TCP response");
            return;
        }
    }
}

/// Read one length-prefixed message. `None` on clean EOF.
async fn read_frame(stream: &mut TcpStream) -> std::io::Result<Option<Vec<u8>>> {
    let length = match stream.read_u16().await {
        Ok(length) => length as usize,
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e),
    };
    if length == 0 {
        return Ok(None);
    }

    let mut body = vec![0u8; length];
    stream.read_exact(&mut body).await?;
    Ok(Some(body))
}

#[derive(Debug)]
pub struct TcpServerFactory;

register_plugin_factory!("tcp_server", TcpServerFactory {});

impl PluginFactory for TcpServerFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let config = parse_server_config(plugin_config, "tcp_server")?;
        SocketAddr::from_str(&config.listen)
            .map_err(|_| DnsError::plugin(format!("invalid TCP listen address: {}", config.listen)))?;
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
        let config = parse_server_config(plugin_config, "tcp_server")?;

        let entry = registry
            .get_plugin(&config.entry)
            .ok_or_else(|| {
                DnsError::plugin(format!(
                    "TCP server '{}' entry plugin '{}' not found",
                    plugin_config.tag, config.entry
                ))
            })?
            .executor()
            .ok_or_else(|| {
                DnsError::plugin(format!(
                    "TCP server '{}' entry '{}' is not an executor",
                    plugin_config.tag, config.entry
                ))
            })?;

        Ok(UninitializedPlugin::Server(Box::new(TcpServer {
            tag: plugin_config.tag.clone(),
            listen: config.listen,
            entry_tag: config.entry,
            entry: Some(entry),
        })))
    }
}
