/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Executable chain: a linked list of pipeline stages.
//!
//! Each node holds the next node and hands it to its stage, so a stage can
//! wrap the remainder of the pipeline (run it, then fix up the response on
//! the way back). The tail's `next` is `None`, which ends the chain without
//! error.

use crate::core::context::QueryContext;
use crate::plugin::executor::{ExecResult, Executor};
use async_trait::async_trait;
use std::fmt::Debug;
use std::sync::Arc;

#[async_trait]
pub trait ChainNode: Debug + Send + Sync + 'static {
    async fn run(&self, qc: &mut QueryContext) -> ExecResult;

    fn set_next(&mut self, next: Option<Arc<dyn ChainNode>>);
}

/// Wraps a plain executor into a chain node carrying its own `next` slot.
/// Nodes that already are chain nodes (conditional, parallel) never go
/// through this wrapper.
#[derive(Debug)]
pub struct ExecutorChainNode {
    executor: Arc<dyn Executor>,
    next: Option<Arc<dyn ChainNode>>,
}

impl ExecutorChainNode {
    pub fn wrap(executor: Arc<dyn Executor>) -> Box<dyn ChainNode> {
        Box::new(ExecutorChainNode {
            executor,
            next: None,
        })
    }
}

#[async_trait]
impl ChainNode for ExecutorChainNode {
    async fn run(&self, qc: &mut QueryContext) -> ExecResult {
        self.executor.execute(qc, self.next.as_ref()).await
    }

    fn set_next(&mut self, next: Option<Arc<dyn ChainNode>>) {
        self.next = next;
    }
}

/// Link nodes back to front and return the head.
pub fn link_nodes(nodes: Vec<Box<dyn ChainNode>>) -> Option<Arc<dyn ChainNode>> {
    let mut next: Option<Arc<dyn ChainNode>> = None;
    for mut node in nodes.into_iter().rev() {
        node.set_next(next.clone());
        next = Some(Arc::from(node));
    }
    next
}
