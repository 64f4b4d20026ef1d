/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! EDNS0 padding presets (RFC 8467).
//!
//! `_pad_query` pads the outgoing query and, after the rest of the chain
//! has produced a response, restores the response's EDNS0/PADDING presence
//! to what the client originally sent. The response-padding presets pad
//! answers for clients that advertised EDNS0.

use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::dns_utils::{
    get_edns0_option, is_edns0, message_wire_len, pad_to_minimum, remove_edns0,
    remove_edns0_option,
};
use crate::core::error::Result;
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, UninitializedPlugin};
use crate::register_preset_plugin;
use async_trait::async_trait;
use hickory_proto::rr::rdata::opt::EdnsCode;
use std::sync::Arc;

/// Recommended padded query length.
const QUERY_PAD_LEN: usize = 128;

/// Recommended padded response length.
const RESPONSE_PAD_LEN: usize = 468;

/// Ceiling for messages too large for the recommended block sizes.
const MAX_PAD_LEN: usize = 1232;

/// `_pad_query`: pads queries to 128 octets (1232 for large queries).
#[derive(Debug)]
struct PadQuery {
    tag: String,
}

#[async_trait]
impl Plugin for PadQuery {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for PadQuery {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        if message_wire_len(&qc.query)? <= 1152 {
            remove_edns0_option(&mut qc.query, EdnsCode::Padding);
            pad_to_minimum(&mut qc.query, QUERY_PAD_LEN);
        } else {
            pad_to_minimum(&mut qc.query, MAX_PAD_LEN);
        }

        continue_next!(next, qc)?;

        let original_edns0 = is_edns0(qc.original_query());
        let original_padded =
            get_edns0_option(qc.original_query(), EdnsCode::Padding).is_some();
        if let Some(response) = qc.response.as_mut() {
            if !original_edns0 {
                // The client never asked for EDNS0.
                remove_edns0(response);
            } else if !original_padded {
                remove_edns0_option(response, EdnsCode::Padding);
            }
        }
        Ok(())
    }
}

/// `_enable_response_padding` / `_enable_conditional_response_padding`:
/// pads responses to 468 octets for EDNS0 clients.
#[derive(Debug)]
struct ResponsePadding {
    tag: String,
    /// Pad whenever the client speaks EDNS0, even without a PADDING option.
    always: bool,
}

#[async_trait]
impl Plugin for ResponsePadding {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for ResponsePadding {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        continue_next!(next, qc)?;

        let original_edns0 = is_edns0(qc.original_query());
        let original_padded =
            get_edns0_option(qc.original_query(), EdnsCode::Padding).is_some();

        if let Some(response) = qc.response.as_mut() {
            if original_edns0 && (self.always || original_padded) {
                if message_wire_len(response)? <= 936 {
                    remove_edns0_option(response, EdnsCode::Padding);
                    pad_to_minimum(response, RESPONSE_PAD_LEN);
                } else {
                    pad_to_minimum(response, MAX_PAD_LEN);
                }
            }
        }
        Ok(())
    }
}

fn new_pad_query(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(PadQuery {
        tag: tag.to_string(),
    }))
}

fn new_response_padding(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(ResponsePadding {
        tag: tag.to_string(),
        always: true,
    }))
}

fn new_conditional_response_padding(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Executor(Box::new(ResponsePadding {
        tag: tag.to_string(),
        always: false,
    }))
}

register_preset_plugin!("_pad_query", new_pad_query);
register_preset_plugin!("_enable_response_padding", new_response_padding);
register_preset_plugin!(
    "_enable_conditional_response_padding",
    new_conditional_response_padding
);
