/*
 * SPDX-FileCopyrightText: 2025 Sven Shi
 * SPDX-License-Identifier: GPL-3.0-or-later
 */

//! Plugin dependency resolution
//!
//! Topological sort over plugin references so plugins initialize after the
//! plugins they point at, regardless of declaration order in the file.

use crate::config::types::PluginConfig;
use crate::core::error::{DnsError, Result};
use std::collections::{HashMap, HashSet, VecDeque};

/// Resolve plugin dependencies and return plugins in initialization order.
///
/// Uses Kahn's algorithm. References to tags outside the config set (preset
/// plugins, or typos caught later at build time) do not participate in the
/// ordering.
pub fn resolve_dependencies(
    configs: Vec<PluginConfig>,
    get_deps: &dyn Fn(&PluginConfig) -> Vec<String>,
) -> Result<Vec<PluginConfig>> {
    let known: HashSet<String> = configs.iter().map(|c| c.tag.clone()).collect();

    // tag -> list of tags that depend on it
    let mut reverse_graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut in_degree: HashMap<String, usize> = HashMap::new();

    for config in &configs {
        in_degree.insert(config.tag.clone(), 0);
        reverse_graph.entry(config.tag.clone()).or_default();
    }

    for config in &configs {
        let deps: Vec<String> = get_deps(config)
            .into_iter()
            .filter(|dep| known.contains(dep) && *dep != config.tag)
            .collect();

        *in_degree.get_mut(&config.tag).unwrap() = deps.len();

        for dep in deps {
            reverse_graph.entry(dep).or_default().push(config.tag.clone());
        }
    }

    let mut queue: VecDeque<String> = configs
        .iter()
        .filter(|c| in_degree[&c.tag] == 0)
        .map(|c| c.tag.clone())
        .collect();

    let mut sorted = Vec::new();
    let config_map: HashMap<_, _> = configs.into_iter().map(|c| (c.tag.clone(), c)).collect();

    while let Some(tag) = queue.pop_front() {
        if let Some(config) = config_map.get(&tag) {
            sorted.push(config.clone());
        }

        if let Some(dependents) = reverse_graph.get(&tag) {
            for dependent in dependents {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(dependent.clone());
                    }
                }
            }
        }
    }

    if sorted.len() != config_map.len() {
        return Err(DnsError::dependency(
            "Circular dependency detected in plugin configuration",
        ));
    }

    Ok(sorted)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plugin(tag: &str, deps: &[&str]) -> PluginConfig {
        PluginConfig {
            tag: tag.to_string(),
            plugin_type: "test".to_string(),
            args: Some(
                serde_yml::to_value(deps.iter().map(|d| d.to_string()).collect::<Vec<_>>())
                    .unwrap(),
            ),
        }
    }

    fn deps_from_args(config: &PluginConfig) -> Vec<String> {
        config
            .args
            .clone()
            .and_then(|v| serde_yml::from_value::<Vec<String>>(v).ok())
            .unwrap_or_default()
    }

    #[test]
    fn dependency_comes_first() {
        let configs = vec![plugin("server", &["entry"]), plugin("entry", &[])];
        let sorted = resolve_dependencies(configs, &deps_from_args).unwrap();
        assert_eq!(sorted[0].tag, "entry");
        assert_eq!(sorted[1].tag, "server");
    }

    #[test]
    fn preset_references_are_ignored() {
        let configs = vec![plugin("seq", &["_return", "_pad_query"])];
        let sorted = resolve_dependencies(configs, &deps_from_args).unwrap();
        assert_eq!(sorted.len(), 1);
    }

    #[test]
    fn cycles_are_detected() {
        let configs = vec![plugin("a", &["b"]), plugin("b", &["a"])];
        assert!(resolve_dependencies(configs, &deps_from_args).is_err());
    }
}
