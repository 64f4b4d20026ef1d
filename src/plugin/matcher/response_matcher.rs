/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! `response_matcher` plugin family.
//!
//! The configurable matcher combines rcode, CNAME-chain and answer-IP
//! criteria with AND semantics (each configured group must hit). The
//! presets cover the common response checks a pipeline branches on:
//! `_valid_answer`, `_valid_ip_answer` and `_empty_ip_answer`.

use crate::config::types::PluginConfig;
use crate::core::context::QueryContext;
use crate::core::dns_utils::{rr_to_cname, rr_to_ip};
use crate::core::error::{DnsError, Result};
use crate::plugin::matcher::matcher_utils::{
    domain_match, normalize_domain_rules, parse_ip_rules, parse_rcode, parse_u16_rules, IpRule,
};
use crate::plugin::matcher::Matcher;
use crate::plugin::{Plugin, PluginFactory, PluginRegistry, UninitializedPlugin};
use crate::{register_plugin_factory, register_preset_plugin};
use ahash::AHashSet;
use async_trait::async_trait;
use hickory_proto::op::{Message, ResponseCode};
use hickory_proto::rr::RecordType;
use serde::Deserialize;
use std::sync::Arc;

#[derive(Debug, Clone, Deserialize, Default)]
struct ResponseMatcherConfig {
    /// Response codes, numeric or symbolic.
    #[serde(default)]
    rcode: Vec<serde_yml::Value>,
    /// Domain rules matched against CNAME targets in the answer.
    #[serde(default)]
    cname: Vec<String>,
    /// IPs / CIDRs matched against A/AAAA answers.
    #[serde(default)]
    ip: Vec<String>,
}

#[derive(Debug)]
struct ResponseMatcher {
    tag: String,
    rcodes: AHashSet<u16>,
    cname_rules: Vec<String>,
    ip_rules: Vec<IpRule>,
}

#[async_trait]
impl Plugin for ResponseMatcher {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Matcher for ResponseMatcher {
    async fn is_match(&self, qc: &mut QueryContext) -> Result<bool> {
        let Some(response) = qc.response.as_ref() else {
            return Ok(false);
        };

        if !self.rcodes.is_empty()
            && !self.rcodes.contains(&u16::from(response.response_code()))
        {
            return Ok(false);
        }

        if !self.cname_rules.is_empty() {
            let hit = response
                .answers()
                .iter()
                .filter_map(rr_to_cname)
                .any(|target| self.cname_rules.iter().any(|rule| domain_match(rule, &target)));
            if !hit {
                return Ok(false);
            }
        }

        if !self.ip_rules.is_empty() {
            let hit = response
                .answers()
                .iter()
                .filter_map(rr_to_ip)
                .any(|ip| self.ip_rules.iter().any(|rule| rule.contains(ip)));
            if !hit {
                return Ok(false);
            }
        }

        Ok(true)
    }
}

#[derive(Debug, Clone)]
pub struct ResponseMatcherFactory;

register_plugin_factory!("response_matcher", ResponseMatcherFactory {});

impl PluginFactory for ResponseMatcherFactory {
    fn validate_config(&self, plugin_config: &PluginConfig) -> Result<()> {
        let _ = build_matcher("validate", plugin_config.args.clone())?;
        Ok(())
    }

    fn create(
        &self,
        plugin_config: &PluginConfig,
        _registry: Arc<PluginRegistry>,
    ) -> Result<UninitializedPlugin> {
        let matcher = build_matcher(&plugin_config.tag, plugin_config.args.clone())?;
        Ok(UninitializedPlugin::Matcher(Box::new(matcher)))
    }
}

fn build_matcher(tag: &str, args: Option<serde_yml::Value>) -> Result<ResponseMatcher> {
    let config = match args {
        Some(args) => serde_yml::from_value::<ResponseMatcherConfig>(args).map_err(|e| {
            DnsError::plugin(format!("failed to parse response_matcher config: {}", e))
        })?,
        None => ResponseMatcherConfig::default(),
    };

    if config.rcode.is_empty() && config.cname.is_empty() && config.ip.is_empty() {
        return Err(DnsError::plugin(
            "response_matcher requires at least one of 'rcode', 'cname', 'ip'",
        ));
    }

    let rcode_tokens: Vec<String> = config
        .rcode
        .iter()
        .map(|v| match v {
            serde_yml::Value::String(s) => Ok(s.clone()),
            serde_yml::Value::Number(n) => Ok(n.to_string()),
            other => Err(DnsError::plugin(format!(
                "invalid rcode entry {:?}",
                other
            ))),
        })
        .collect::<Result<_>>()?;

    Ok(ResponseMatcher {
        tag: tag.to_string(),
        rcodes: parse_u16_rules("rcode", &rcode_tokens, parse_rcode)?,
        cname_rules: normalize_domain_rules(config.cname),
        ip_rules: parse_ip_rules("ip", &config.ip)?,
    })
}

/// `_valid_answer` / `_valid_ip_answer` presets.
#[derive(Debug)]
struct ValidAnswer {
    tag: String,
    /// Additionally require an answer RR matching the question type+class.
    strict: bool,
}

fn answer_matches_question(response: &Message, query: &Message) -> bool {
    let questions: AHashSet<(u16, u16)> = query
        .queries()
        .iter()
        .map(|q| (u16::from(q.query_type()), u16::from(q.query_class())))
        .collect();
    response
        .answers()
        .iter()
        .any(|rr| questions.contains(&(u16::from(rr.record_type()), u16::from(rr.dns_class()))))
}

#[async_trait]
impl Plugin for ValidAnswer {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Matcher for ValidAnswer {
    async fn is_match(&self, qc: &mut QueryContext) -> Result<bool> {
        let Some(response) = qc.response.as_ref() else {
            return Ok(false);
        };

        if !self.strict {
            return Ok(matches!(
                response.response_code(),
                ResponseCode::NoError | ResponseCode::NXDomain
            ));
        }

        let is_ip_question = qc
            .query
            .queries()
            .first()
            .map(|q| matches!(q.query_type(), RecordType::A | RecordType::AAAA))
            .unwrap_or(false);
        if !is_ip_question {
            return Ok(false);
        }
        Ok(answer_matches_question(response, &qc.query))
    }
}

/// `_empty_ip_answer` preset: the response carries no usable IP for the
/// question. Non-A/AAAA questions with a response match trivially.
#[derive(Debug)]
struct EmptyIpAnswer {
    tag: String,
}

#[async_trait]
impl Plugin for EmptyIpAnswer {
    fn tag(&self) -> &str {
        &self.tag
    }

    async fn init(&mut self) {}

    async fn destroy(&self) {}
}

#[async_trait]
impl Matcher for EmptyIpAnswer {
    async fn is_match(&self, qc: &mut QueryContext) -> Result<bool> {
        let Some(response) = qc.response.as_ref() else {
            return Ok(false);
        };

        let is_ip_question = qc
            .query
            .queries()
            .first()
            .map(|q| matches!(q.query_type(), RecordType::A | RecordType::AAAA))
            .unwrap_or(false);
        if !is_ip_question {
            // A non-IP question cannot have an IP answer.
            return Ok(true);
        }

        let has_ip_answer = response
            .answers()
            .iter()
            .any(|rr| matches!(rr.record_type(), RecordType::A | RecordType::AAAA));
        Ok(!has_ip_answer)
    }
}

fn new_valid_answer(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Matcher(Box::new(ValidAnswer {
        tag: tag.to_string(),
        strict: false,
    }))
}

fn new_valid_ip_answer(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Matcher(Box::new(ValidAnswer {
        tag: tag.to_string(),
        strict: true,
    }))
}

fn new_empty_ip_answer(tag: &str) -> UninitializedPlugin {
    UninitializedPlugin::Matcher(Box::new(EmptyIpAnswer {
        tag: tag.to_string(),
    }))
}

register_preset_plugin!("_valid_answer", new_valid_answer);
register_preset_plugin!("_valid_ip_answer", new_valid_ip_answer);
register_preset_plugin!("_empty_ip_answer", new_empty_ip_answer);
