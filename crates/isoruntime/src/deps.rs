//! Dependency collection and resolution.

use crate::registry::NodeTypeRegistry;
use isocore::Workflow;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::sync::LazyLock;

static PACKAGE_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z0-9][A-Za-z0-9._-]*").expect("valid regex"));

/// Requirements that share a package name but differ in specifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyConflict {
    pub name: String,
    /// Every distinct requirement string, sorted
    pub variants: Vec<String>,
    /// The variant installed last, which ends up in the environment
    pub effective: String,
}

/// Concatenate the declared dependencies of every distinct node type.
///
/// The registry is consulted once per type, in first-seen order.
pub fn collect_dependencies(workflow: &Workflow, registry: &dyn NodeTypeRegistry) -> Vec<String> {
    let mut collected = Vec::new();
    for node_type in workflow.node_types() {
        let deps = registry.get_dependencies(node_type);
        tracing::debug!("Node type {} declares {} dependencies", node_type, deps.len());
        collected.extend(deps);
    }
    collected
}

/// Trim, drop exact duplicates and sort.
///
/// Conflicting specifiers for one package are all kept and reported with a
/// warning.
pub fn resolve(requirements: &[String]) -> Vec<String> {
    let resolved: Vec<String> = requirements
        .iter()
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(str::to_string)
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    for conflict in find_conflicts(&resolved) {
        tracing::warn!(
            "Dependency conflict for {}: {} (installing {})",
            conflict.name,
            conflict.variants.join(", "),
            conflict.effective
        );
    }

    resolved
}

/// Group requirements by package name and report names with several variants.
pub fn find_conflicts(requirements: &[String]) -> Vec<DependencyConflict> {
    let mut by_name: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for requirement in requirements {
        let requirement = requirement.trim();
        if let Some(name) = package_name(requirement) {
            by_name
                .entry(name)
                .or_default()
                .insert(requirement.to_string());
        }
    }

    by_name
        .into_iter()
        .filter(|(_, variants)| variants.len() > 1)
        .filter_map(|(name, variants)| {
            let variants: Vec<String> = variants.into_iter().collect();
            let effective = variants.last()?.clone();
            Some(DependencyConflict {
                name,
                variants,
                effective,
            })
        })
        .collect()
}

/// Leading package name of a requirement, normalised for comparison
pub fn package_name(requirement: &str) -> Option<String> {
    PACKAGE_NAME
        .find(requirement.trim())
        .map(|m| m.as_str().to_lowercase().replace('_', "-"))
}
