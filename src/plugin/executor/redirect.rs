/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `redirect` executor plugin.
//!
//! Rewrites the question name to a target before the rest of the chain
//! runs, then restores the original name in query and response and
//! prepends a synthetic CNAME answer so the client sees the alias chain.

use crate::config::types::PluginConfig;
use crate::continue_next;
use crate::core::context::QueryContext;
use crate::core::error::{DnsError, Result};
use crate::plugin::executor::sequence::chain::ChainNode;
use crate::plugin::executor::{ExecResult, Executor};
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::register_plugin_factory;
use ahash::AHashMap;
use aho_corasick::{AhoCorasick, AhoCorasickBuilder};
use async_trait::async_trait;
use hickory_proto::rr::rdata::name::CNAME;
use hickory_proto::rr::{DNSClass, Name, RData, Record};
use regex::{Regex, RegexSet, RegexSetBuilder};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::sync::Arc;

/// TTL of the synthesized CNAME answer.
const SYNTHETIC_CNAME_TTL: u32 = 1;

#[derive(Debug, Clone, Deserialize, Default)]
struct RedirectConfig {
    #[serde(default)]
    rules: Vec<String>,
    #[serde(default)]
    files: Vec<String>,
}

#[derive(Debug, Clone)]
enum RuleMatcher {
    Full(String),
    Domain(String),
    Keyword(String),
    Regexp(String),
}

#[derive(Debug, Clone)]
struct RedirectRule {
    matcher: RuleMatcher,
    target: Name,
}

#[derive(Debug)]
struct RedirectExecutor {
    tag: String,
    rules: Vec<RedirectRule>,
    index: RuleIndex,
}

#[derive(Debug, Default)]
struct RuleIndex {
    full_rules: AHashMap<Box<str>, usize>,
    domain_rules: AHashMap<Box<str>, usize>,
    keyword_matcher: Option<AhoCorasick>,
    keyword_rule_indices: Vec<usize>,
    regex_matcher: Option<RegexSet>,
    regex_rule_indices: Vec<usize>,
}

#[async_trait]
impl Plugin for RedirectExecutor {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Executor for RedirectExecutor {
    async fn execute(
        &self,
        qc: &mut QueryContext,
        next: Option<&Arc<dyn ChainNode>>,
    ) -> ExecResult {
        if qc.query.queries().len() != 1 {
            return continue_next!(next, qc);
        }

        let query = &qc.query.queries()[0];
        if query.query_class() != DNSClass::IN {
            return continue_next!(next, qc);
        }

        let original = query.name().clone();
        let normalized = normalize_name_str(&original);
        let Some(rule) = self.index.match_rule(&self.rules, &normalized) else {
            return continue_next!(next, qc);
        };
        let target = rule.target.clone();

        set_query_name(qc, target.clone())?;

        continue_next!(next, qc)?;

        // Back out the rewrite: the client asked for `original`.
        set_query_name(qc, original.clone())?;

        let Some(response) = qc.response.as_mut() else {
            return Ok(());
        };

        for query in response.queries_mut() {
            if query.name() == &target {
                query.set_name(original.clone());
            }
        }

        let old_answers = std::mem::take(response.answers_mut());
        let mut answers = Vec::with_capacity(old_answers.len() + 1);
        answers.push(Record::from_rdata(
            original,
            SYNTHETIC_CNAME_TTL,
            RData::CNAME(CNAME(target)),
        ));
        answers.extend(old_answers);
        *response.answers_mut() = answers;

        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct RedirectFactory;

register_plugin_factory!("redirect", RedirectFactory {});

impl PluginFactory for RedirectFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let config = parse_config(plugin_config.args.clone())?;
        let _ = build_rules(&config)?;
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let config = parse_config(plugin_config.args.clone())?;
        let (rules, index) = build_rules(&config)?;

        Ok(UninitializedPlugin::Executor(Box::new(RedirectExecutor {
            tag: plugin_config.tag.clone(),
            rules,
            index,
        })))
    }
}

fn parse_config(args: Option<serde_yml::Value>) -> Result<RedirectConfig> {
    let Some(args) = args else {
        return Ok(RedirectConfig::default());
    };

    serde_yml::from_value(args)
        .map_err(|e| DnsError::plugin(format!("failed to parse redirect config: {}", e)))
}

fn build_rules(config: &RedirectConfig) -> Result<(Vec<RedirectRule>, RuleIndex)> {
    let mut out = Vec::new();

    for (idx, rule) in config.rules.iter().enumerate() {
        out.push(parse_redirect_rule(rule).map_err(|e| {
            DnsError::plugin(format!("invalid redirect rule #{} '{}': {}", idx, rule, e))
        })?);
    }

    for file in &config.files {
        if file.trim().is_empty() {
            continue;
        }
        let handle = File::open(file).map_err(|e| {
            DnsError::plugin(format!("failed to open redirect file '{}': {}", file, e))
        })?;
        let mut reader = BufReader::new(handle);
        let mut line = String::new();
        let mut line_no = 0usize;
        loop {
            line.clear();
            let n = reader.read_line(&mut line).map_err(|e| {
                DnsError::plugin(format!(
                    "failed to read redirect file '{}' at line {}: {}",
                    file,
                    line_no + 1,
                    e
                ))
            })?;
            if n == 0 {
                break;
            }
            line_no += 1;

            let raw = line.trim();
            if raw.is_empty() || raw.starts_with('#') {
                continue;
            }
            let raw = raw
                .split_once('#')
                .map(|(left, _)| left)
                .unwrap_or(raw)
                .trim();
            if raw.is_empty() {
                continue;
            }

            out.push(parse_redirect_rule(raw).map_err(|e| {
                DnsError::plugin(format!(
                    "invalid redirect file '{}' line {} '{}': {}",
                    file, line_no, raw, e
                ))
            })?);
        }
    }

    let index = build_rule_index(&out)?;
    Ok((out, index))
}

fn parse_redirect_rule(raw: &str) -> std::result::Result<RedirectRule, String> {
    let fields: Vec<&str> = raw.split_whitespace().collect();
    if fields.len() != 2 {
        return Err(format!(
            "redirect rule requires exactly 2 fields, got {}",
            fields.len()
        ));
    }

    let matcher = parse_rule_matcher(fields[0])?;
    let target = parse_name(fields[1])?;

    Ok(RedirectRule { matcher, target })
}

fn parse_rule_matcher(raw_rule: &str) -> std::result::Result<RuleMatcher, String> {
    if let Some(v) = raw_rule.strip_prefix("full:") {
        return Ok(RuleMatcher::Full(normalize_rule(v)));
    }
    if let Some(v) = raw_rule.strip_prefix("domain:") {
        return Ok(RuleMatcher::Domain(normalize_rule(v)));
    }
    if let Some(v) = raw_rule.strip_prefix("keyword:") {
        return Ok(RuleMatcher::Keyword(v.to_ascii_lowercase()));
    }
    if let Some(v) = raw_rule.strip_prefix("regexp:") {
        Regex::new(v).map_err(|e| format!("invalid regexp '{}': {}", v, e))?;
        return Ok(RuleMatcher::Regexp(v.to_string()));
    }

    // No prefix defaults to a full match.
    Ok(RuleMatcher::Full(normalize_rule(raw_rule)))
}

fn build_rule_index(rules: &[RedirectRule]) -> Result<RuleIndex> {
    let mut index = RuleIndex::default();
    let mut keyword_patterns = Vec::new();
    let mut regex_patterns = Vec::new();

    for (rule_idx, rule) in rules.iter().enumerate() {
        match &rule.matcher {
            RuleMatcher::Full(v) => {
                index
                    .full_rules
                    .entry(v.clone().into_boxed_str())
                    .or_insert(rule_idx);
            }
            RuleMatcher::Domain(v) => {
                index
                    .domain_rules
                    .entry(v.clone().into_boxed_str())
                    .or_insert(rule_idx);
            }
            RuleMatcher::Keyword(v) => {
                keyword_patterns.push(v.clone());
                index.keyword_rule_indices.push(rule_idx);
            }
            RuleMatcher::Regexp(v) => {
                regex_patterns.push(v.clone());
                index.regex_rule_indices.push(rule_idx);
            }
        }
    }

    if !keyword_patterns.is_empty() {
        index.keyword_matcher = Some(
            AhoCorasickBuilder::new()
                .ascii_case_insensitive(false)
                .build(&keyword_patterns)
                .map_err(|e| {
                    DnsError::plugin(format!("failed to build redirect keyword matcher: {}", e))
                })?,
        );
    }

    if !regex_patterns.is_empty() {
        index.regex_matcher = Some(RegexSetBuilder::new(&regex_patterns).build().map_err(
            |e| DnsError::plugin(format!("failed to build redirect regex matcher: {}", e)),
        )?);
    }

    Ok(index)
}

impl RuleIndex {
    fn match_rule<'a>(&self, rules: &'a [RedirectRule], domain: &str) -> Option<&'a RedirectRule> {
        let mut best: Option<usize> = None;

        if let Some(rule_idx) = self.full_rules.get(domain) {
            best = Some(*rule_idx);
        }

        let mut suffix = domain;
        loop {
            if let Some(rule_idx) = self.domain_rules.get(suffix) {
                best = Some(best.map_or(*rule_idx, |cur| cur.min(*rule_idx)));
            }
            let Some(dot) = suffix.find('.') else {
                break;
            };
            suffix = &suffix[dot + 1..];
        }

        if let Some(matcher) = &self.keyword_matcher {
            for m in matcher.find_iter(domain) {
                let rule_idx = self.keyword_rule_indices[m.pattern().as_usize()];
                best = Some(best.map_or(rule_idx, |cur| cur.min(rule_idx)));
            }
        }

        if let Some(matcher) = &self.regex_matcher {
            for pid in matcher.matches(domain).iter() {
                let rule_idx = self.regex_rule_indices[pid];
                best = Some(best.map_or(rule_idx, |cur| cur.min(rule_idx)));
            }
        }

        best.map(|idx| &rules[idx])
    }
}

fn set_query_name(qc: &mut QueryContext, name: Name) -> Result<()> {
    let Some(query) = qc.query.queries_mut().first_mut() else {
        return Err(DnsError::plugin("redirect requires one question"));
    };
    query.set_name(name);
    Ok(())
}

fn parse_name(raw: &str) -> std::result::Result<Name, String> {
    let fqdn = if raw.ends_with('.') {
        raw.to_string()
    } else {
        format!("{}.", raw)
    };
    Name::from_ascii(&fqdn).map_err(|e| format!("invalid domain '{}': {}", raw, e))
}

fn normalize_name_str(name: &Name) -> String {
    name.to_utf8().trim_end_matches('.').to_ascii_lowercase()
}

#[inline]
fn normalize_rule(raw: &str) -> String {
    raw.trim().trim_end_matches('.').to_ascii_lowercase()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::TransportProtocol;
    use crate::core::dns_utils::build_response_from_request;
    use hickory_proto::op::{Message, Query, ResponseCode};
    use hickory_proto::rr::rdata::A;
    use hickory_proto::rr::RecordType;
    use std::net::Ipv4Addr;

    /// Answers the current question with a fixed A record.
    #[derive(Debug)]
    struct FixedAnswer;

    #[async_trait]
    impl ChainNode for FixedAnswer {
        async fn run(&self, qc: &mut QueryContext) -> ExecResult {
            let qname = qc.query.queries()[0].name().clone();
            let mut response = build_response_from_request(&qc.query, ResponseCode::NoError);
            response.answers_mut().push(Record::from_rdata(
                qname,
                300,
                RData::A(A(Ipv4Addr::new(10, 0, 0, 1))),
            ));
            qc.response = Some(response);
            Ok(())
        }

        fn set_next(&mut self, _next: Option<Arc<dyn ChainNode>>) {}
    }

    fn make_executor(rules: &[&str]) -> RedirectExecutor {
        let config = RedirectConfig {
            rules: rules.iter().map(|r| r.to_string()).collect(),
            files: Vec::new(),
        };
        let (rules, index) = build_rules(&config).unwrap();
        RedirectExecutor {
            tag: "redirect".to_string(),
            rules,
            index,
        }
    }

    fn make_context(qname: &str) -> QueryContext {
        let mut request = Message::new();
        request.add_query(Query::query(Name::from_ascii(qname).unwrap(), RecordType::A));
        QueryContext::new(request, "127.0.0.1:5353".parse().unwrap(), TransportProtocol::Udp)
    }

    #[tokio::test]
    async fn full_rule_rewrites_and_synthesizes_cname() {
        let executor = make_executor(&["full:foo.test bar.test"]);
        let tail: Arc<dyn ChainNode> = Arc::new(FixedAnswer);
        let mut qc = make_context("foo.test.");

        executor.execute(&mut qc, Some(&tail)).await.unwrap();

        // Question restored to what the client asked.
        let response = qc.response.as_ref().unwrap();
        assert_eq!(
            response.queries()[0].name(),
            &Name::from_ascii("foo.test.").unwrap()
        );
        assert_eq!(qc.query.queries()[0].name(), &Name::from_ascii("foo.test.").unwrap());

        // CNAME foo.test -> bar.test with TTL 1, then the real answer.
        assert_eq!(response.answers().len(), 2);
        let cname = &response.answers()[0];
        assert_eq!(cname.ttl(), SYNTHETIC_CNAME_TTL);
        assert_eq!(cname.name(), &Name::from_ascii("foo.test.").unwrap());
        match cname.data() {
            RData::CNAME(target) => {
                assert_eq!(target.0, Name::from_ascii("bar.test.").unwrap());
            }
            other => panic!("expected CNAME, got {:?}", other),
        }
        match response.answers()[1].data() {
            RData::A(a) => assert_eq!(a.0, Ipv4Addr::new(10, 0, 0, 1)),
            other => panic!("expected A, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn unmatched_names_pass_through_unchanged() {
        let executor = make_executor(&["full:foo.test bar.test"]);
        let tail: Arc<dyn ChainNode> = Arc::new(FixedAnswer);
        let mut qc = make_context("other.test.");

        executor.execute(&mut qc, Some(&tail)).await.unwrap();

        let response = qc.response.as_ref().unwrap();
        assert_eq!(response.answers().len(), 1);
        assert_eq!(
            response.queries()[0].name(),
            &Name::from_ascii("other.test.").unwrap()
        );
    }

    #[tokio::test]
    async fn domain_rule_matches_subdomains() {
        let executor = make_executor(&["domain:ads.test sink.test"]);
        let tail: Arc<dyn ChainNode> = Arc::new(FixedAnswer);
        let mut qc = make_context("tracker.ads.test.");

        executor.execute(&mut qc, Some(&tail)).await.unwrap();

        let response = qc.response.as_ref().unwrap();
        match response.answers()[0].data() {
            RData::CNAME(target) => {
                assert_eq!(target.0, Name::from_ascii("sink.test.").unwrap());
            }
            other => panic!("expected CNAME, got {:?}", other),
        }
    }

    #[test]
    fn earlier_rule_wins_on_overlap() {
        let executor = make_executor(&["domain:a.test one.test", "full:x.a.test two.test"]);
        let rule = executor
            .index
            .match_rule(&executor.rules, "x.a.test")
            .unwrap();
        assert_eq!(rule.target, Name::from_ascii("one.test.").unwrap());
    }

    #[test]
    fn malformed_rules_are_fatal() {
        let config = RedirectConfig {
            rules: vec!["only-one-field".to_string()],
            files: Vec::new(),
        };
        assert!(build_rules(&config).is_err());
    }
}
