/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Shared helpers for matcher plugins.

use crate::core::dns_utils::parse_named_response_code;
use crate::core::error::{DnsError, Result as DnsResult};
use ahash::AHashSet;
use hickory_proto::rr::RecordType;
use serde_yml::Value;
use std::net::IpAddr;
use std::str::FromStr;

#[derive(Debug, Clone)]
pub(crate) struct IpRule {
    network: ipnet::IpNet,
}

impl IpRule {
    pub(crate) fn contains(&self, ip: IpAddr) -> bool {
        self.network.contains(&ip)
    }
}

/// Accept a string of tokens or a list of strings (numbers tolerated).
pub(crate) fn parse_rules_from_value(args: Option<Value>) -> DnsResult<Vec<String>> {
    let args = args.ok_or_else(|| DnsError::plugin("matcher requires args"))?;
    parse_rule_list_value(args)
}

pub(crate) fn parse_u16_rules(
    field: &str,
    raw_rules: &[String],
    named_parser: fn(&str) -> Option<u16>,
) -> DnsResult<AHashSet<u16>> {
    let mut parsed = AHashSet::with_capacity(raw_rules.len());
    for raw in raw_rules {
        let v = raw.trim();
        if v.is_empty() {
            continue;
        }
        let num = if let Ok(num) = v.parse::<u16>() {
            num
        } else {
            named_parser(v).ok_or_else(|| {
                DnsError::plugin(format!("invalid {} value '{}': unsupported token", field, v))
            })?
        };
        parsed.insert(num);
    }
    Ok(parsed)
}

pub(crate) fn parse_record_type(raw: &str) -> Option<u16> {
    RecordType::from_str(&raw.to_ascii_uppercase())
        .ok()
        .map(u16::from)
}

pub(crate) fn parse_rcode(raw: &str) -> Option<u16> {
    parse_named_response_code(raw).map(u16::from)
}

pub(crate) fn parse_ip_rules(field: &str, raw_rules: &[String]) -> DnsResult<Vec<IpRule>> {
    let mut rules = Vec::with_capacity(raw_rules.len());
    for raw in raw_rules {
        let v = raw.trim();
        if v.is_empty() {
            continue;
        }
        let network = if let Ok(ip) = IpAddr::from_str(v) {
            Ok(ipnet::IpNet::from(ip))
        } else {
            ipnet::IpNet::from_str(v)
        }
        .map_err(|e| DnsError::plugin(format!("invalid {} rule '{}': {}", field, v, e)))?;
        rules.push(IpRule { network });
    }
    Ok(rules)
}

pub(crate) fn normalize_domain_rules(rules: Vec<String>) -> Vec<String> {
    rules
        .into_iter()
        .map(|d| d.trim().trim_end_matches('.').to_ascii_lowercase())
        .filter(|d| !d.is_empty())
        .collect()
}

pub(crate) fn validate_non_empty_rules(field: &str, rules: &[String]) -> DnsResult<()> {
    if rules.is_empty() {
        return Err(DnsError::plugin(format!(
            "{} matcher requires at least one rule",
            field
        )));
    }
    Ok(())
}

/// Suffix match: `rule` equals the name or is a dot-separated suffix of it.
pub(crate) fn domain_match(rule: &str, query_name: &str) -> bool {
    query_name == rule
        || query_name
            .strip_suffix(rule)
            .is_some_and(|prefix| prefix.ends_with('.'))
}

fn parse_rule_list_value(value: Value) -> DnsResult<Vec<String>> {
    match value {
        Value::String(s) => Ok(split_rule_tokens(&s)),
        Value::Number(n) => Ok(vec![n.to_string()]),
        Value::Sequence(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                match item {
                    Value::String(s) => out.extend(split_rule_tokens(&s)),
                    Value::Number(n) => out.push(n.to_string()),
                    other => {
                        return Err(DnsError::plugin(format!(
                            "matcher args must be a string list, got {:?}",
                            other
                        )));
                    }
                }
            }
            Ok(out)
        }
        other => Err(DnsError::plugin(format!(
            "matcher args must be string or string array, got {:?}",
            other
        ))),
    }
}

fn split_rule_tokens(raw: &str) -> Vec<String> {
    raw.split(|c: char| c == ',' || c.is_ascii_whitespace())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_match_is_a_suffix_match() {
        assert!(domain_match("ads.test", "ads.test"));
        assert!(domain_match("ads.test", "tracker.ads.test"));
        assert!(!domain_match("ads.test", "badads.test"));
    }

    #[test]
    fn u16_rules_accept_numbers_and_names() {
        let rules = vec!["A".to_string(), "28".to_string()];
        let parsed = parse_u16_rules("qtype", &rules, parse_record_type).unwrap();
        assert!(parsed.contains(&1));
        assert!(parsed.contains(&28));
    }

    #[test]
    fn ip_rules_accept_plain_ips_and_cidrs() {
        let rules = vec!["10.0.0.1".to_string(), "192.168.0.0/16".to_string()];
        let parsed = parse_ip_rules("ip", &rules).unwrap();
        assert!(parsed[0].contains("10.0.0.1".parse().unwrap()));
        assert!(parsed[1].contains("192.168.4.4".parse().unwrap()));
        assert!(!parsed[1].contains("10.0.0.1".parse().unwrap()));
    }
}
