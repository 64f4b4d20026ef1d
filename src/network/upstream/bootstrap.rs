/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Startup probing over alternative dial targets.
//!
//! When an upstream spec lists several dial addresses, each candidate is
//! probed concurrently with a throwaway `example.com. A` query and the
//! first responder is kept. Total failure falls back to index 0.

use crate::network::upstream::Upstream;
use hickory_proto::op::{Message, Query};
use hickory_proto::rr::{Name, RecordType};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tracing::{debug, warn};

const PROBE_TIMEOUT: Duration = Duration::from_secs(3);
const PROBE_NAME: &str = "example.com.";

fn probe_query() -> Message {
    let mut query = Message::new();
    query.set_id(rand::rng().random());
    query.set_recursion_desired(true);
    query.add_query(Query::query(
        Name::from_ascii(PROBE_NAME).expect("static name"),
        RecordType::A,
    ));
    query
}

/// Probe all candidates concurrently and return the index of the first one
/// that answers within the probe window.
pub async fn select_fastest(upstreams: &[Arc<dyn Upstream>]) -> usize {
    if upstreams.len() <= 1 {
        return 0;
    }

    let mut join_set = JoinSet::new();
    for (idx, upstream) in upstreams.iter().enumerate() {
        let upstream = upstream.clone();
        join_set.spawn(async move {
            let result = upstream.exchange(probe_query()).await;
            (idx, result)
        });
    }

    let deadline = tokio::time::Instant::now() + PROBE_TIMEOUT;
    loop {
        let joined = match tokio::time::timeout_at(deadline, join_set.join_next()).await {
            Ok(Some(joined)) => joined,
            Ok(None) => break,
            Err(_) => break,
        };

        match joined {
            Ok((idx, Ok(_))) => {
                debug!(candidate = idx, "dial target probe succeeded");
                join_set.abort_all();
                return idx;
            }
            Ok((idx, Err(e))) => {
                debug!(candidate = idx, error = %e, "dial target probe failed");
            }
            Err(_) => {}
        }
    }

    warn!("all dial target probes failed, falling back to the first candidate");
    0
}
