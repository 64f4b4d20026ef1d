/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

use crate::core::context::QueryContext;
use crate::core::error::Result;
use crate::plugin::Plugin;
use async_trait::async_trait;

pub mod matcher_utils;
pub mod qtype;
pub mod response_matcher;

/// Boolean predicate over a query context. Must not semantically mutate the
/// query or response; matchers only observe.
#[async_trait]
pub trait Matcher: Plugin {
    async fn is_match(&self, qc: &mut QueryContext) -> Result<bool>;
}
