/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Shared request handling for all listeners.
//!
//! Runs the entry executor over a freshly built query context and decides
//! what, if anything, goes back on the wire. A failed pipeline or an empty
//! outcome drops the request; the client retries, it never sees a garbage
//! answer.

use crate::core::context::QueryContext;
use crate::plugin::executor::Executor;
use hickory_proto::op::Message;
use std::sync::Arc;
use tracing::{debug, warn};

/// Execute the entry chain and extract the response to send, if any.
pub async fn handle_query(entry: &Arc<dyn Executor>, qc: &mut QueryContext) -> Option<Message> {
    if let Err(e) = entry.execute(qc, None).await {
        warn!(query = %qc.info(), error = %e, "query pipeline failed, dropping request");
        return None;
    }

    match qc.response.take() {
        Some(mut response) => {
            // The pipeline may have raced several rewritten copies; the id on
            // the wire must be the client's.
            response.set_id(qc.original_query().id());
            Some(response)
        }
        None => {
            debug!(query = %qc.info(), "pipeline produced no response, dropping request");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{QueryStatus, TransportProtocol};
    use crate::core::dns_utils::build_response_from_request;
    use crate::core::error::DnsError;
    use crate::plugin::executor::sequence::chain::ChainNode;
    use crate::plugin::executor::ExecResult;
    use crate::plugin::Plugin;
    use async_trait::async_trait;
    use hickory_proto::op::{Message, Query, ResponseCode};
    use hickory_proto::rr::{Name, RecordType};

    #[derive(Debug)]
    enum Entry {
        Respond,
        Fail,
        Silent,
    }

    #[async_trait]
    impl Plugin for Entry {
        fn tag(&self) -> &str {
            "entry"
        }

        async fn init(&mut self) {}

        async fn destroy(&self) {}
    }

    #[async_trait]
    impl Executor for Entry {
        async fn execute(
            &self,
            qc: &mut QueryContext,
            _next: Option<&Arc<dyn ChainNode>>,
        ) -> ExecResult {
            match self {
                Entry::Respond => {
                    let mut response =
                        build_response_from_request(&qc.query, ResponseCode::NoError);
                    // Simulate a racer that rewrote the id in flight.
                    response.set_id(qc.query.id().wrapping_add(1));
                    qc.response = Some(response);
                    qc.status = QueryStatus::Responded;
                    Ok(())
                }
                Entry::Fail => Err(DnsError::plugin("broken stage")),
                Entry::Silent => Ok(()),
            }
        }
    }

    fn make_context() -> QueryContext {
        let mut request = Message::new();
        request.set_id(0x1122);
        request.add_query(Query::query(
            Name::from_ascii("example.com.").unwrap(),
            RecordType::A,
        ));
        QueryContext::new(request, "127.0.0.1:5353".parse().unwrap(), TransportProtocol::Udp)
    }

    #[tokio::test]
    async fn response_id_is_forced_back_to_the_client_id() {
        let entry: Arc<dyn Executor> = Arc::new(Entry::Respond);
        let mut qc = make_context();
        let response = handle_query(&entry, &mut qc).await.unwrap();
        assert_eq!(response.id(), 0x1122);
    }

    #[tokio::test]
    async fn pipeline_error_drops_the_request() {
        let entry: Arc<dyn Executor> = Arc::new(Entry::Fail);
        let mut qc = make_context();
        assert!(handle_query(&entry, &mut qc).await.is_none());
    }

    #[tokio::test]
    async fn missing_response_drops_the_request() {
        let entry: Arc<dyn Executor> = Arc::new(Entry::Silent);
        let mut qc = make_context();
        assert!(handle_query(&entry, &mut qc).await.is_none());
    }
}
