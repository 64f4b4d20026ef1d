/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::core::context::QueryContext;
use crate::core::error::Result;
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::Plugin;
use async_trait::async_trait;
use std::sync::Arc;

pub type ExecResult = Result<()>;

/// Continue to the next chain node if present. A null tail terminates the
/// chain successfully.
#[macro_export]
macro_rules! continue_next {
    ($next:expr, $qc:expr) => {{
        match $next {
            Some(next) => next.run($qc).await,
            None => Ok(()),
        }
    }};
}

pub mod bufsize;
pub mod edns0_filter;
pub mod forward;
pub mod padding;
pub mod redirect;
pub mod reject_any;
pub mod sequence;

/// A pipeline stage. The stage reads/mutates the query context, then either
/// runs `next` (wrapping the rest of the chain) or returns without it to
/// short-circuit. Errors propagate upward unchanged.
#[async_trait]
pub trait Executor: Plugin {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult;
}
