/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Logic-tree builder: compiles the declarative pipeline description into an
//! executable chain.
//!
//! Recognized forms:
//! - string: reference to a registered executor (matcher in matcher
//!   position, `!` negates)
//! - list: concatenation of compiled children
//! - map with `exec`: flatten a sequence wrapped under one key
//! - map with `if` [, `else`] or `primary`/`secondary`: conditional over an
//!   AND-combined matcher expression
//! - map with `parallel`: race compiled sub-chains
//!
//! Unknown references, malformed nodes and empty branches are fatal at
//! build time.

use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::error::{DnsError, Result};
use crate::plugin::executor::sequence::chain::{link_nodes, ChainNode, ExecutorChainNode};
use crate::plugin::executor::sequence::parallel::ParallelNode;
use crate::plugin::executor::ExecResult;
use crate::plugin::matcher::Matcher;
use crate::plugin::PluginRegistry;
use async_trait::async_trait;
use serde_yml::Value;
use std::sync::Arc;

const KEY_EXEC: &str = "exec";
const KEY_IF: &str = "if";
const KEY_ELSE: &str = "else";
const KEY_PRIMARY: &str = "primary";
const KEY_SECONDARY: &str = "secondary";
const KEY_PARALLEL: &str = "parallel";

const NODE_KEYS: [&str; 6] = [
    KEY_EXEC,
    KEY_IF,
    KEY_ELSE,
    KEY_PRIMARY,
    KEY_SECONDARY,
    KEY_PARALLEL,
];

/// Compile a pipeline description into a chain head.
pub fn build_logic_tree(
    value: &Value,
    registry: &Arc<PluginRegistry>,
) -> Result<Arc<dyn ChainNode>> {
    let nodes = compile_nodes(value, registry)?;
    link_nodes(nodes).ok_or_else(|| DnsError::config("pipeline tree is empty"))
}

fn compile_nodes(value: &Value, registry: &Arc<PluginRegistry>) -> Result<Vec<Box<dyn ChainNode>>> {
    match value {
        Value::String(tag) => Ok(vec![executor_node(tag, registry)?]),
        Value::Sequence(children) => {
            let mut nodes = Vec::with_capacity(children.len());
            for child in children {
                nodes.extend(compile_nodes(child, registry)?);
            }
            Ok(nodes)
        }
        Value::Mapping(_) => compile_map_node(value, registry),
        other => Err(DnsError::config(format!(
            "malformed pipeline node: expected string, list or map, got {:?}",
            other
        ))),
    }
}

fn compile_map_node(
    value: &Value,
    registry: &Arc<PluginRegistry>,
) -> Result<Vec<Box<dyn ChainNode>>> {
    let Value::Mapping(map) = value else {
        unreachable!("caller checked the variant");
    };

    for (key, _) in map {
        let known = key
            .as_str()
            .map(|k| NODE_KEYS.contains(&k))
            .unwrap_or(false);
        if !known {
            return Err(DnsError::config(format!(
                "malformed pipeline node: unrecognized key {:?}",
                key
            )));
        }
    }

    if let Some(parallel) = value.get(KEY_PARALLEL) {
        return Ok(vec![parallel_node(parallel, registry)?]);
    }

    if let Some(condition) = value.get(KEY_IF) {
        return Ok(vec![condition_node(condition, value, registry)?]);
    }

    if value.get(KEY_ELSE).is_some()
        || value.get(KEY_PRIMARY).is_some()
        || value.get(KEY_SECONDARY).is_some()
    {
        return Err(DnsError::config(
            "conditional branches require an 'if' matcher expression",
        ));
    }

    match value.get(KEY_EXEC) {
        // Plain `exec` wraps a sequence under one key; flatten it.
        Some(exec) => compile_nodes(exec, registry),
        None => Err(DnsError::config("malformed pipeline node: empty map")),
    }
}

fn parallel_node(value: &Value, registry: &Arc<PluginRegistry>) -> Result<Box<dyn ChainNode>> {
    let Value::Sequence(children) = value else {
        return Err(DnsError::config("'parallel' expects a list of sub-chains"));
    };
    if children.is_empty() {
        return Err(DnsError::config("'parallel' requires at least one sub-chain"));
    }

    let mut branches = Vec::with_capacity(children.len());
    for (idx, child) in children.iter().enumerate() {
        let branch = build_logic_tree(child, registry).map_err(|e| {
            DnsError::config(format!("invalid parallel sub-chain at index {}: {}", idx, e))
        })?;
        branches.push(branch);
    }

    Ok(Box::new(ParallelNode::new(branches)))
}

fn condition_node(
    condition: &Value,
    map: &Value,
    registry: &Arc<PluginRegistry>,
) -> Result<Box<dyn ChainNode>> {
    let matchers = parse_matcher_expr(condition, registry)?;

    let primary_value = map
        .get(KEY_PRIMARY)
        .or_else(|| map.get(KEY_EXEC))
        .ok_or_else(|| DnsError::config("conditional node requires a 'primary'/'exec' branch"))?;
    let primary = build_logic_tree(primary_value, registry)?;

    let secondary = map
        .get(KEY_SECONDARY)
        .or_else(|| map.get(KEY_ELSE))
        .map(|branch| build_logic_tree(branch, registry))
        .transpose()?;

    Ok(Box::new(ConditionNode {
        matchers,
        primary,
        secondary,
        next: None,
    }))
}

fn executor_node(tag: &str, registry: &Arc<PluginRegistry>) -> Result<Box<dyn ChainNode>> {
    let tag = tag.trim();
    if tag.is_empty() {
        return Err(DnsError::config("empty executor reference"));
    }
    let plugin = registry
        .get_plugin(tag)
        .ok_or_else(|| DnsError::config(format!("unknown executor reference '{}'", tag)))?;
    let executor = plugin
        .executor()
        .ok_or_else(|| DnsError::config(format!("plugin '{}' is not an executor", tag)))?;
    Ok(ExecutorChainNode::wrap(executor))
}

#[derive(Debug)]
struct MatcherRef {
    negated: bool,
    matcher: Arc<dyn Matcher>,
}

fn parse_matcher_expr(value: &Value, registry: &Arc<PluginRegistry>) -> Result<Vec<MatcherRef>> {
    let tokens: Vec<&str> = match value {
        Value::String(token) => vec![token.as_str()],
        Value::Sequence(items) => {
            let mut tokens = Vec::with_capacity(items.len());
            for item in items {
                tokens.push(item.as_str().ok_or_else(|| {
                    DnsError::config("matcher expression must contain strings only")
                })?);
            }
            tokens
        }
        other => {
            return Err(DnsError::config(format!(
                "matcher expression must be a string or a list, got {:?}",
                other
            )));
        }
    };

    if tokens.is_empty() {
        return Err(DnsError::config("matcher expression is empty"));
    }

    let mut matchers = Vec::with_capacity(tokens.len());
    for token in tokens {
        matchers.push(matcher_ref(token, registry)?);
    }
    Ok(matchers)
}

fn matcher_ref(token: &str, registry: &Arc<PluginRegistry>) -> Result<MatcherRef> {
    let token = token.trim();
    let (negated, tag) = match token.strip_prefix('!') {
        Some(rest) => (true, rest.trim()),
        None => (false, token),
    };
    if tag.is_empty() {
        return Err(DnsError::config(format!("invalid matcher reference '{}'", token)));
    }

    let plugin = registry
        .get_plugin(tag)
        .ok_or_else(|| DnsError::config(format!("unknown matcher reference '{}'", tag)))?;
    let matcher = plugin
        .matcher()
        .ok_or_else(|| DnsError::config(format!("plugin '{}' is not a matcher", tag)))?;

    Ok(MatcherRef { negated, matcher })
}

/// Conditional node: logical AND over the matcher expression, one branch
/// each way, then the outer chain continues.
#[derive(Debug)]
struct ConditionNode {
    matchers: Vec<MatcherRef>,
    primary: Arc<dyn ChainNode>,
    secondary: Option<Arc<dyn ChainNode>>,
    next: Option<Arc<dyn ChainNode>>,
}

#[async_trait]
impl ChainNode for ConditionNode {
    async fn run(&self, qc: &mut QueryContext) -> ExecResult {
        let mut matched = true;
        for m in &self.matchers {
            if m.matcher.is_match(qc).await? == m.negated {
                matched = false;
                break;
            }
        }

        if matched {
            self.primary.run(qc).await?;
        } else if let Some(secondary) = &self.secondary {
            secondary.run(qc).await?;
        }

        continue_next!(self.next.as_ref(), qc)
    }

    fn set_next(&mut self, next: Option<Arc<dyn ChainNode>>) {
        self.next = next;
    }
}

/// Collect all plugin tags a pipeline description references. Feeds
/// dependency-ordered initialization; matcher negation is stripped.
pub fn collect_refs(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(token) => {
            let tag = token.trim().trim_start_matches('!').trim();
            if !tag.is_empty() {
                out.push(tag.to_string());
            }
        }
        Value::Sequence(children) => {
            for child in children {
                collect_refs(child, out);
            }
        }
        Value::Mapping(_) => {
            for key in NODE_KEYS {
                if let Some(child) = value.get(key) {
                    collect_refs(child, out);
                }
            }
        }
        _ => {}
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::core::context::TransportProtocol;
    use crate::core::dns_utils::build_response_from_request;
    use crate::plugin::{Plugin, PluginHandle, PluginInfo, PluginType};
    use hickory_proto::op::{Message, Query, ResponseCode};
    use hickory_proto::rr::{Name, RecordType};
    use hickory_proto::serialize::binary::BinEncodable;
    use std::sync::Mutex;

    pub(crate) type Journal = Arc<Mutex<Vec<&'static str>>>;

    /// Records its tag, optionally sets a response, then continues.
    #[derive(Debug)]
    pub(crate) struct RecordingExecutor {
        pub tag: &'static str,
        pub journal: Journal,
        pub respond: bool,
        pub call_next: bool,
    }

    #[async_trait]
    impl Plugin for RecordingExecutor {
        fn tag(&self) -> &str {
            self.tag
        }

        async fn init(&mut self) {}

        async fn destroy(&self) {}
    }

    #[async_trait]
    impl crate::plugin::executor::Executor for RecordingExecutor {
        async fn execute(
            &self,
            qc: &mut QueryContext,
            next: Option<&Arc<dyn ChainNode>>,
        ) -> ExecResult {
            self.journal.lock().unwrap().push(self.tag);
            if self.respond {
                qc.response = Some(build_response_from_request(&qc.query, ResponseCode::NoError));
            }
            if self.call_next {
                continue_next!(next, qc)
            } else {
                Ok(())
            }
        }
    }

    #[derive(Debug)]
    struct FixedMatcher {
        tag: &'static str,
        verdict: bool,
    }

    #[async_trait]
    impl Plugin for FixedMatcher {
        fn tag(&self) -> &str {
            self.tag
        }

        async fn init(&mut self) {}

        async fn destroy(&self) {}
    }

    #[async_trait]
    impl Matcher for FixedMatcher {
        async fn is_match(&self, _qc: &mut QueryContext) -> Result<bool> {
            Ok(self.verdict)
        }
    }

    pub(crate) fn test_registry(journal: &Journal) -> Arc<PluginRegistry> {
        let registry = Arc::new(PluginRegistry::new());
        for tag in ["alpha", "beta", "gamma"] {
            registry.insert_plugin(PluginInfo {
                tag: tag.to_string(),
                plugin_type: PluginType::Executor,
                args: None,
                handle: PluginHandle::Executor(Arc::new(RecordingExecutor {
                    tag,
                    journal: journal.clone(),
                    respond: false,
                    call_next: true,
                })),
            });
        }
        registry.insert_plugin(PluginInfo {
            tag: "stop".to_string(),
            plugin_type: PluginType::Executor,
            args: None,
            handle: PluginHandle::Executor(Arc::new(RecordingExecutor {
                tag: "stop",
                journal: journal.clone(),
                respond: false,
                call_next: false,
            })),
        });
        for (tag, verdict) in [("always", true), ("never", false)] {
            registry.insert_plugin(PluginInfo {
                tag: tag.to_string(),
                plugin_type: PluginType::Matcher,
                args: None,
                handle: PluginHandle::Matcher(Arc::new(FixedMatcher { tag, verdict })),
            });
        }
        registry
    }

    pub(crate) fn make_context() -> QueryContext {
        let mut request = Message::new();
        request.add_query(Query::query(
            Name::from_ascii("example.com.").unwrap(),
            RecordType::A,
        ));
        QueryContext::new(request, "127.0.0.1:5353".parse().unwrap(), TransportProtocol::Udp)
    }

    fn yaml(raw: &str) -> Value {
        serde_yml::from_str(raw).unwrap()
    }

    #[tokio::test]
    async fn list_runs_in_order() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(&yaml("[alpha, beta, gamma]"), &registry).unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["alpha", "beta", "gamma"]);
    }

    #[tokio::test]
    async fn stage_that_skips_next_ends_the_chain() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(&yaml("[alpha, stop, gamma]"), &registry).unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["alpha", "stop"]);
    }

    #[tokio::test]
    async fn exec_key_flattens() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(&yaml("- exec: [alpha, beta]"), &registry).unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["alpha", "beta"]);
    }

    #[tokio::test]
    async fn conditional_takes_primary_on_match() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(
            &yaml("- if: [always]\n  exec: alpha\n  else: beta\n- gamma"),
            &registry,
        )
        .unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["alpha", "gamma"]);
    }

    #[tokio::test]
    async fn negation_flips_the_branch() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(
            &yaml("- if: ['!always']\n  primary: alpha\n  secondary: beta"),
            &registry,
        )
        .unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["beta"]);
    }

    #[tokio::test]
    async fn and_semantics_over_matcher_list() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(
            &yaml("- if: [always, never]\n  exec: alpha\n  else: beta"),
            &registry,
        )
        .unwrap();

        let mut qc = make_context();
        tree.run(&mut qc).await.unwrap();
        assert_eq!(*journal.lock().unwrap(), vec!["beta"]);
    }

    #[test]
    fn unknown_reference_is_fatal() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        assert!(build_logic_tree(&yaml("[nonexistent]"), &registry).is_err());
    }

    #[test]
    fn matcher_in_executor_position_is_fatal() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        assert!(build_logic_tree(&yaml("[always]"), &registry).is_err());
    }

    #[test]
    fn unknown_map_key_is_fatal() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        assert!(build_logic_tree(&yaml("- unknown_key: alpha"), &registry).is_err());
    }

    #[test]
    fn refs_are_collected_recursively() {
        let value = yaml(
            "- if: ['!mat_a', mat_b]\n  exec: [exec_a]\n  else:\n    - parallel:\n        - [exec_b]\n        - [exec_c]",
        );
        let mut refs = Vec::new();
        collect_refs(&value, &mut refs);
        assert_eq!(refs, vec!["mat_a", "mat_b", "exec_a", "exec_b", "exec_c"]);
    }

    #[tokio::test]
    async fn deterministic_chain_is_repeatable() {
        let journal: Journal = Default::default();
        let registry = test_registry(&journal);
        let tree = build_logic_tree(&yaml("[alpha, beta]"), &registry).unwrap();

        let mut first = make_context();
        tree.run(&mut first).await.unwrap();
        let mut second = make_context();
        tree.run(&mut second).await.unwrap();

        assert_eq!(
            first.query.to_bytes().ok(),
            second.query.to_bytes().ok(),
            "identical inputs must produce identical outputs"
        );
        assert_eq!(*journal.lock().unwrap(), vec!["alpha", "beta", "alpha", "beta"]);
    }
}
