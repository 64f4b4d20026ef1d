/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Parallel node: races sub-chains against forks of the query context.
//!
//! Every branch runs against its own deep copy, so branches never observe
//! each other's mutations; the first branch that finishes without error and
//! holds a response wins and its result is absorbed into the parent context.
//! Branch errors are collected and only surface when no branch wins.

use crate::core::context::QueryContext;
use crate::core::error::DnsError;
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::ExecResult;
use crate::continue_next;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::debug;

/// Hard ceiling on a parallel block.
pub const PARALLEL_TIMEOUT: Duration = Duration::from_secs(3);

#[derive(Debug)]
pub struct ParallelNode {
    branches: Vec<Arc<dyn ChainNode>>,
    next: Option<Arc<dyn ChainNode>>,
}

impl ParallelNode {
    pub fn new(branches: Vec<Arc<dyn ChainNode>>) -> Self {
        ParallelNode {
            branches,
            next: None,
        }
    }

    async fn race(&self, qc: &mut QueryContext) -> ExecResult {
        if self.branches.is_empty() {
            return Ok(());
        }

        let mut join_set = JoinSet::new();
        for (idx, branch) in self.branches.iter().enumerate() {
            let branch = branch.clone();
            let mut fork = qc.fork();
            join_set.spawn(async move {
                let outcome = branch.run(&mut fork).await;
                (idx, fork, outcome)
            });
        }

        let deadline = tokio::time::Instant::now() + PARALLEL_TIMEOUT;
        let mut last_err: Option<DnsError> = None;

        loop {
            let joined = match tokio::time::timeout_at(deadline, join_set.join_next()).await {
                Ok(joined) => joined,
                Err(_) => {
                    join_set.abort_all();
                    return Err(last_err.unwrap_or_else(|| {
                        DnsError::deadline("no parallel branch finished in time")
                    }));
                }
            };

            let Some(joined) = joined else {
                break;
            };

            match joined {
                // Aborted siblings of a winner; their loss is not a failure.
                Err(e) if e.is_cancelled() => continue,
                Err(e) => {
                    last_err = Some(DnsError::runtime(format!(
                        "parallel branch panicked: {}",
                        e
                    )));
                }
                Ok((idx, fork, Ok(()))) => {
                    if fork.response.is_some() {
                        debug!(branch = idx, "parallel branch won");
                        qc.absorb(fork);
                        join_set.abort_all();
                        return Ok(());
                    }
                    debug!(branch = idx, "parallel branch finished without response");
                }
                Ok((idx, _fork, Err(e))) => {
                    debug!(branch = idx, error = %e, "parallel branch failed");
                    last_err = Some(e);
                }
            }
        }

        Err(last_err
            .unwrap_or_else(|| DnsError::plugin("no parallel branch produced a response")))
    }
}

#[async_trait]
impl ChainNode for ParallelNode {
    async fn run(&self, qc: &mut QueryContext) -> ExecResult {
        self.race(qc).await?;
        continue_next!(self.next.as_ref(), qc)
    }

    fn set_next(&mut self, next: Option<Arc<dyn ChainNode>>) {
        self.next = next;
    }
}
