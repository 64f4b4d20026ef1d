/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! TCP upstream transport.
//!
//! RFC 1035 §4.2.2 framing: every message is preceded by a two-byte
//! big-endian length. One connection per exchange; pooling and pipelining
//! belong to the transport collaborators outside this build.

use crate::core::error::{DnsError, Result};
use crate::network::upstream::{ConnectionInfo, Upstream};
use async_trait::async_trait;
use bytes::{BufMut, BytesMut};
use hickory_proto::op::Message;
use hickory_proto::serialize::binary::{BinDecodable, BinEncodable};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[derive(Debug)]
pub struct TcpUpstream {
    info: ConnectionInfo,
}

impl TcpUpstream {
    pub fn new(info: ConnectionInfo) -> Self {
        TcpUpstream { info }
    }
}

#[async_trait]
impl Upstream for TcpUpstream {
    async fn inner_exchange(&self, query: Message) -> Result<Message> {
        let mut stream = TcpStream::connect(self.info.remote_addr).await?;

        let wire = query.to_bytes()?;
        if wire.len() > u16::MAX as usize {
            return Err(DnsError::protocol("query exceeds TCP message size"));
        }
        let mut framed = BytesMut::with_capacity(wire.len() + 2);
        framed.put_u16(wire.len() as u16);
        framed.put_slice(&wire);
        stream.write_all(&framed).await?;

        let length = stream.read_u16().await? as usize;
        let mut body = vec![0u8; length];
        stream.read_exact(&mut body).await?;

        let response = Message::from_bytes(&body)?;
        if response.id() != query.id() {
            return Err(DnsError::protocol("TCP response id mismatch"));
        }
        Ok(response)
    }

    fn connection_info(&self) -> &ConnectionInfo {
        &self.info
    }
}
