//! Load order computation
//!
//! Both policies return indices into the slice of descriptors they were given,
//! which the manager keeps in discovery order.

use super::descriptor::{ModuleDescriptor, RequirementKind};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

/// How the manager orders modules within each lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderingPolicy {
    /// Ascending priority, ties by discovery order
    #[default]
    Priority,
    /// Providers before dependents, then priority, then discovery order
    Dependencies,
}

/// Result of a dependency sort
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DependencyOrder {
    /// Modules that can be ordered
    pub order: Vec<usize>,
    /// Modules on, or depending on, a requirement cycle
    pub blocked: Vec<usize>,
}

/// Ascending priority, ties broken by position in `descriptors`
#[must_use]
pub fn priority_order(descriptors: &[&ModuleDescriptor]) -> Vec<usize> {
    let mut order: Vec<usize> = (0..descriptors.len()).collect();
    // sort_by_key is stable, so equal priorities keep discovery order
    order.sort_by_key(|&i| descriptors[i].priority);
    order
}

/// Topological order over `requires`
///
/// Service requirements resolve against other modules' `provides`, plugin
/// requirements against module ids. Requirements nobody in the set satisfies
/// (host services, optional modules) add no edge.
#[must_use]
pub fn dependency_order(descriptors: &[&ModuleDescriptor]) -> DependencyOrder {
    let mut by_id: HashMap<&str, usize> = HashMap::new();
    let mut by_capability: HashMap<&str, usize> = HashMap::new();
    for (i, descriptor) in descriptors.iter().enumerate() {
        by_id.entry(descriptor.id.as_str()).or_insert(i);
        for capability in &descriptor.provides {
            by_capability.entry(capability.as_str()).or_insert(i);
        }
    }

    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); descriptors.len()];
    let mut pending: Vec<usize> = vec![0; descriptors.len()];
    for (i, descriptor) in descriptors.iter().enumerate() {
        let mut seen = BTreeSet::new();
        for requirement in &descriptor.requires {
            let provider = match requirement.kind {
                RequirementKind::Service => by_capability.get(requirement.id.as_str()),
                RequirementKind::Plugin => by_id.get(requirement.id.as_str()),
            };
            if let Some(&p) = provider {
                if p != i && seen.insert(p) {
                    dependents[p].push(i);
                    pending[i] += 1;
                }
            }
        }
    }

    let key = |i: usize| (descriptors[i].priority, i);
    let mut ready: BTreeSet<(i32, usize)> = (0..descriptors.len())
        .filter(|&i| pending[i] == 0)
        .map(key)
        .collect();

    let mut order = Vec::with_capacity(descriptors.len());
    while let Some(next) = ready.pop_first() {
        let (_, i) = next;
        order.push(i);
        for &dependent in &dependents[i] {
            pending[dependent] -= 1;
            if pending[dependent] == 0 {
                ready.insert(key(dependent));
            }
        }
    }

    let blocked = (0..descriptors.len()).filter(|&i| pending[i] > 0).collect();
    DependencyOrder { order, blocked }
}
