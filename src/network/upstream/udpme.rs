/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `udpme` upstream: UDP that insists on EDNS0 in the reply.
//!
//! Some middleboxes answer with forged minimal responses; a reply carrying
//! an EDNS0 OPT record is taken as the hint that it came from the real
//! resolver. Responses without EDNS0 are discarded and the read continues.

use crate::core::dns_utils::{is_edns0, remove_edns0, upgrade_edns0};
use crate::core::error::Result;
use crate::network::upstream::udp::{local_bind_addr, UDP_BUFFER_SIZE};
use crate::network::upstream::{ConnectionInfo, Upstream};
use async_trait::async_trait;
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::net::UdpSocket;
use tracing::debug;

#[derive(Debug)]
pub struct UdpMeUpstream {
    info: ConnectionInfo,
}

impl UdpMeUpstream {
    pub fn new(info: ConnectionInfo) -> Self {
        UdpMeUpstream { info }
    }
}

#[async_trait]
impl Upstream for UdpMeUpstream {
    async fn inner_exchange(&self, query: Message) -> Result<Message> {
        // The probe only works if the query advertises EDNS0; upgrade a bare
        // query for the wire and strip the response back afterwards.
        let had_edns0 = is_edns0(&query);
        let mut outgoing = query;
        if !had_edns0 {
            upgrade_edns0(&mut outgoing);
        }

        let remote = self.info.remote_addr;
        let socket = UdpSocket::bind(local_bind_addr(&remote)).await?;
        socket.connect(remote).await?;
        socket.send(&outgoing.to_bytes()?).await?;

        let mut buf = [0u8; UDP_BUFFER_SIZE];
        loop {
            let received = socket.recv(&mut buf).await?;
            let mut response = match Message::from_bytes(&buf[..received]) {
                Ok(message) => message,
                Err(e) => {
                    debug!(remote = %remote, error = %e, "discarding undecodable datagram");
                    continue;
                }
            };
            if response.id() != outgoing.id() {
                continue;
            }
            if !is_edns0(&response) {
                debug!(remote = %remote, "discarding response without EDNS0 OPT");
                continue;
            }
            if !had_edns0 {
                remove_edns0(&mut response);
            }
            return Ok(response);
        }
    }

    fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }
}
