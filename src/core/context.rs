/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Per-request query context threaded through the pipeline.
//!
//! One `QueryContext` is created per incoming query and lives until a
//! response is written or the request is dropped. The current query is
//! mutable; the original query is snapshotted at construction and stays
//! untouched so response-fixup stages (padding, redirect) can consult what
//! the client actually sent.

use hickory_proto::op::Message;
use std::fmt;
use std::net::SocketAddr;

/// Transport the query arrived on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportProtocol {
    Udp,
    Tcp,
    Tls,
    Https,
    Quic,
}

impl fmt::Display for TransportProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransportProtocol::Udp => "udp",
            TransportProtocol::Tcp => "tcp",
            TransportProtocol::Tls => "tls",
            TransportProtocol::Https => "https",
            TransportProtocol::Quic => "quic",
        };
        f.write_str(name)
    }
}

/// Pipeline outcome of the query, written only by the forward plugin.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryStatus {
    Unhandled,
    Responded,
    ServerFailed,
}

#[derive(Debug)]
pub struct QueryContext {
    pub src_addr: SocketAddr,

    pub protocol: TransportProtocol,

    /// Current query being processed; rewriters mutate this one.
    pub query: Message,

    /// Snapshot of the incoming query, taken at construction.
    original_query: Message,

    /// Current response, set by forwarders or synthesizers.
    pub response: Option<Message>,

    pub status: QueryStatus,

    /// Which upstream/tag produced `response` (`"<tag>@<address>"`).
    pub from: Option<String>,
}

impl QueryContext {
    pub fn new(query: Message, src_addr: SocketAddr, protocol: TransportProtocol) -> Self {
        let original_query = query.clone();
        QueryContext {
            src_addr,
            protocol,
            query,
            original_query,
            response: None,
            status: QueryStatus::Unhandled,
            from: None,
        }
    }

    /// The query as the client sent it. Never rewritten.
    pub fn original_query(&self) -> &Message {
        &self.original_query
    }

    /// Deep copy for a parallel branch. hickory `Message` owns its buffers,
    /// so clones cannot observe each other's mutations.
    pub fn fork(&self) -> QueryContext {
        QueryContext {
            src_addr: self.src_addr,
            protocol: self.protocol,
            query: self.query.clone(),
            original_query: self.original_query.clone(),
            response: self.response.clone(),
            status: self.status,
            from: self.from.clone(),
        }
    }

    /// Copy a winning branch's result back into this context. The merge is
    /// the only point where a branch's mutations become visible here.
    pub fn absorb(&mut self, winner: QueryContext) {
        self.response = winner.response;
        self.status = winner.status;
        self.from = winner.from;
    }

    /// Logging identity of the query: qname, qtype, id, client.
    pub fn info(&self) -> QueryInfo<'_> {
        QueryInfo { context: self }
    }
}

/// Lazily formatted query identity for structured log fields.
pub struct QueryInfo<'a> {
    context: &'a QueryContext,
}

impl fmt::Display for QueryInfo<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let qc = self.context;
        match qc.query.queries().first() {
            Some(q) => write!(
                f,
                "{} {} id={} client={}",
                q.name(),
                q.query_type(),
                qc.query.id(),
                qc.src_addr
            ),
            None => write!(f, "<no question> id={} client={}", qc.query.id(), qc.src_addr),
        }
    }
}
