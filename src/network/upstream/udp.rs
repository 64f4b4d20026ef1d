/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plain UDP upstream transport.
//!
//! One ephemeral socket per exchange; responses are matched to the query by
//! message id, stray datagrams are discarded.

use crate::core::error::{DnsError, Result};
use crate::network::upstream::{ConnectionInfo, Upstream};
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tracing::debug;

/// Standard DNS UDP receive buffer.
pub(crate) const UDP_BUFFER_SIZE: usize = 4096;

#[derive(Debug)]
pub struct UdpUpstream {
    info: ConnectionInfo,
}

impl UdpUpstream {
    pub fn new(info: ConnectionInfo) -> Self {
        UdpUpstream { info }
    }
}

/// Wildcard bind address of the remote's family.
pub(crate) fn local_bind_addr(remote: &SocketAddr) -> SocketAddr {
    match remote.ip() {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
    }
}

/// Send one query over a fresh socket and wait for the matching response.
pub(crate) async fn exchange_udp(remote: SocketAddr, query: &Message) -> Result<Message> {
    let socket = UdpSocket::bind(local_bind_addr(&remote)).await?;
    socket.connect(remote).await?;
    socket.send(&query.to_bytes()?).await?;

    let mut buf = [0u8; UDP_BUFFER_SIZE];
    loop {
        let received = socket.recv(&mut buf).await?;
        let response = match Message::from_bytes(&buf[..received]) {
            Ok(message) => message,
            Err(e) => {
                debug!(remote = %remote, error = %e, "discarding undecodable datagram");
                continue;
            }
        };
        if response.id() != query.id() {
            debug!(
                remote = %remote,
                got = response.id(),
                want = query.id(),
                "discarding datagram with unexpected id"
            );
            continue;
        }
        return Ok(response);
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn inner_exchange(&self, query: Message) -> Result<Message> {
        if query.queries().is_empty() {
            return Err(DnsError::protocol("query has no question"));
        }
        exchange_udp(self.info.remote_addr, &query).await
    }

    fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }
}
