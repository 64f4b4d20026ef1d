/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Upstream racing: fan a query out to every configured upstream and take
//! the first acceptable answer.
//!
//! Acceptance is gated on trust: a trusted upstream's response wins
//! regardless of rcode, an untrusted one must return NoError. Errors are
//! collected and only the last one surfaces when no upstream wins;
//! cancelled siblings of a winner are never reported as the cause.

use crate::core::context::QueryContext;
use crate::core::error::{DnsError, Result};
use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use std::fmt::Debug;
use std::net::IpAddr;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::warn;

/// One upstream as seen by the racer.
#[async_trait]
pub trait RacedUpstream: Send + Sync + Debug {
    /// Send the query and wait for the response. Errors carry no response.
    async fn exchange(&self, query: Message) -> Result<Message>;

    /// Whether this upstream's responses bypass rcode filtering.
    fn trusted(&self) -> bool;

    /// User-visible endpoint, as configured.
    fn address(&self) -> &str;

    /// Resolved dial target, when known.
    fn ip_address(&self) -> Option<IpAddr>;
}

/// A winning response and the address of the upstream that produced it.
#[derive(Debug)]
pub struct RaceWinner {
    pub response: Message,
    pub address: String,
}

/// Race the context's query against all upstreams.
pub async fn exchange_parallel(
    qc: &QueryContext,
    upstreams: &[Arc<dyn RacedUpstream>],
) -> Result<RaceWinner> {
    if upstreams.is_empty() {
        return Err(DnsError::plugin("no upstream is configured"));
    }

    let mut join_set = JoinSet::new();
    for upstream in upstreams {
        let upstream = upstream.clone();
        // Upstream clients may rewrite ids and wire buffers; every branch
        // gets its own copy.
        let query = qc.query.clone();
        join_set.spawn(async move {
            let result = upstream.exchange(query).await;
            (upstream, result)
        });
    }

    let mut last_err: Option<DnsError> = None;
    while let Some(joined) = join_set.join_next().await {
        let (upstream, result) = match joined {
            Ok(record) => record,
            // An aborted loser; its cancellation is our own doing.
            Err(e) if e.is_cancelled() => continue,
            Err(e) => {
                last_err = Some(DnsError::runtime(format!("upstream task failed: {}", e)));
                continue;
            }
        };

        match result {
            Err(e) => {
                warn!(
                    addr = %upstream.address(),
                    ip = ?upstream.ip_address(),
                    query = %qc.info(),
                    error = %e,
                    "upstream exchange failed"
                );
                last_err = Some(e);
            }
            Ok(response) => {
                if upstream.trusted() || response.response_code() == ResponseCode::NoError {
                    join_set.abort_all();
                    return Ok(RaceWinner {
                        response,
                        address: upstream.address().to_string(),
                    });
                }
                // Untrusted and not NoError: not a winner, keep draining.
            }
        }
    }

    Err(last_err.unwrap_or_else(|| DnsError::plugin("no upstream returned a usable response")))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::context::TransportProtocol;
    use crate::core::dns_utils::build_response_from_request;
    use hickory_proto::op::Query;
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::{Name, RData, Record, RecordType};
    use std::net::Ipv4Addr;
    use std::time::Duration;

    #[derive(Debug)]
    pub(crate) enum MockBehavior {
        Respond(ResponseCode, Option<Ipv4Addr>),
        Fail(&'static str),
    }

    #[derive(Debug)]
    pub(crate) struct MockUpstream {
        pub address: String,
        pub trusted: bool,
        pub delay: Duration,
        pub behavior: MockBehavior,
    }

    #[async_trait]
    impl RacedUpstream for MockUpstream {
        async fn exchange(&self, query: Message) -> Result<Message> {
            tokio::time::sleep(self.delay).await;
            match &self.behavior {
                MockBehavior::Respond(rcode, answer) => {
                    let mut response = build_response_from_request(&query, *rcode);
                    if let Some(ip) = answer {
                        let name = query.queries()[0].name().clone();
                        response
                            .answers_mut()
                            .push(Record::from_rdata(name, 300, RData::A(A(*ip))));
                    }
                    Ok(response)
                }
                MockBehavior::Fail(msg) => Err(DnsError::protocol(*msg)),
            }
        }

        fn trusted(&self) -> bool {
            self.trusted
        }

        fn address(&self) -> &str {
            &self.address
        }

        fn ip_address(&self) -> Option<IpAddr> {
            None
        }
    }

    pub(crate) fn make_context() -> QueryContext {
        let mut request = Message::new();
        request.set_id(0x51);
        request.add_query(Query::query(
            Name::from_ascii("example.com.").unwrap(),
            RecordType::A,
        ));
        QueryContext::new(request, "127.0.0.1:5353".parse().unwrap(), TransportProtocol::Udp)
    }

    fn upstream(
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
    async fn trusted_answer_beats_faster_untrusted_nxdomain() {
        let upstreams = vec![
            upstream(
                "udp://10.0.0.1",
                true,
                100,
                MockBehavior::Respond(ResponseCode::NoError, Some(Ipv4Addr::new(1, 2, 3, 4))),
            ),
            upstream(
                "udp://10.0.0.2",
                false,
                5,
                MockBehavior::Respond(ResponseCode::NXDomain, None),
            ),
        ];
        let qc = make_context();

        let winner = exchange_parallel(&qc, &upstreams).await.unwrap();
        assert_eq!(winner.address, "udp://10.0.0.1");
        assert_eq!(winner.response.response_code(), ResponseCode::NoError);
        assert_eq!(winner.response.answers().len(), 1);
    }

    #[tokio::test]
    async fn trusted_nxdomain_wins() {
        let upstreams = vec![upstream(
            "udp://10.0.0.1",
            true,
            5,
            MockBehavior::Respond(ResponseCode::NXDomain, None),
        )];
        let qc = make_context();

        let winner = exchange_parallel(&qc, &upstreams).await.unwrap();
        assert_eq!(winner.response.response_code(), ResponseCode::NXDomain);
    }

    #[tokio::test]
    async fn all_untrusted_rejections_fail_with_last_error() {
        let upstreams = vec![
            upstream("udp://10.0.0.1", false, 5, MockBehavior::Fail("servfail one")),
            upstream(
                "udp://10.0.0.2",
                false,
                30,
                MockBehavior::Fail("refused two"),
            ),
        ];
        let qc = make_context();

        let err = exchange_parallel(&qc, &upstreams).await.unwrap_err();
        assert!(err.to_string().contains("refused two"));
    }

    #[tokio::test]
    async fn untrusted_bad_rcodes_are_not_winners() {
        let upstreams = vec![
            upstream(
                "udp://10.0.0.1",
                false,
                5,
                MockBehavior::Respond(ResponseCode::ServFail, None),
            ),
            upstream(
                "udp://10.0.0.2",
                false,
                30,
                MockBehavior::Respond(ResponseCode::Refused, None),
            ),
        ];
        let qc = make_context();

        // No error was ever produced, but no response is acceptable either.
        assert!(exchange_parallel(&qc, &upstreams).await.is_err());
    }

    #[tokio::test]
    async fn winner_is_well_formed() {
        let upstreams = vec![
            upstream(
                "udp://10.0.0.1",
                false,
                20,
                MockBehavior::Respond(ResponseCode::NoError, Some(Ipv4Addr::new(9, 9, 9, 9))),
            ),
            upstream("udp://10.0.0.2", false, 5, MockBehavior::Fail("down")),
        ];
        let qc = make_context();

        let winner = exchange_parallel(&qc, &upstreams).await.unwrap();
        assert!(!winner.address.is_empty());
        assert_eq!(winner.response.response_code(), ResponseCode::NoError);
    }
}
