/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `_reject_any` preset.
//!
//! Answers ANY questions locally with a single HINFO record as RFC 8482
//! describes, without touching any upstream. The chain ends here for
//! matched queries.

use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::dns_utils::build_response_from_request;
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, UninitializedPlugin};
use crate::register_preset_plugin;
use async_trait::async_trait;
use hickory_proto::op::ResponseCode;
use hickory_proto::rr::rdata::HINFO;
use hickory_proto::rr::{RData, Record, RecordType};
use std::sync::Arc;

const HINFO_CPU: &str = "ANY obsoleted";
const HINFO_OS: &str = "See RFC 8482";
const HINFO_TTL: u32 = 8482;

#[derive(Debug)]
struct RejectAny {
    tag: String,
}

#[async_trait]
impl Plugin for RejectAny {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for RejectAny {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        let Some(query) = qc.query.queries().first() else {
            return continue_next!(next, qc);
        };
        if query.query_type() != RecordType::ANY {
            return continue_next!(next, qc);
        }

        let qname = query.name().clone();
        let mut response = build_response_from_request(&qc.query, ResponseCode::NoError);
        response.answers_mut().push(Record::from_rdata(
            qname,
            HINFO_TTL,
            RData::HINFO(HINFO::new(HINFO_CPU.to_string(), HINFO_OS.to_string())),
        ));
        qc.response = Some(response);
        Ok(())
    }
}

fn new_reject_any(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(RejectAny {
        tag: tag.to_string(),
    }))
}

register_preset_plugin!("_reject_any", new_reject_any);
