//! Dependency graph resolver - turns declared prerequisites into a launch order

use crate::error::ConfigError;
use crate::types::Target;
use std::collections::{BTreeSet, HashMap, HashSet};

/// Prerequisite graph over a target set.
///
/// Nodes are kept in declaration order. Edges only connect enabled targets:
/// a disabled prerequisite counts as already satisfied and is dropped, so an
/// operator turning a target off never blocks its dependents.
#[derive(Debug, Clone)]
pub struct DependencyGraph {
    names: Vec<String>,
    index: HashMap<String, usize>,
    enabled: Vec<bool>,
    /// Enabled prerequisites of each node
    prerequisites: Vec<Vec<usize>>,
    /// Enabled dependents of each node
    dependents: Vec<Vec<usize>>,
}

impl DependencyGraph {
    /// Build the graph, validating names and references.
    ///
    /// Duplicate names are reported first, then references to unknown
    /// targets. Cycles are only detected by [`resolve`](Self::resolve).
    pub fn build(targets: &[Target]) -> Result<Self, ConfigError> {
        let mut index = HashMap::with_capacity(targets.len());
        for (i, target) in targets.iter().enumerate() {
            if index.insert(target.name.clone(), i).is_some() {
                return Err(ConfigError::DuplicateTarget {
                    name: target.name.clone(),
                });
            }
        }

        for target in targets {
            if let Some(missing) = target
                .depends_on
                .iter()
                .find(|dep| !index.contains_key(dep.as_str()))
            {
                return Err(ConfigError::UnknownDependency {
                    target: target.name.clone(),
                    dependency: missing.clone(),
                });
            }
        }

        let enabled: Vec<bool> = targets.iter().map(|t| t.enabled).collect();
        let mut prerequisites = vec![Vec::new(); targets.len()];
        let mut dependents = vec![Vec::new(); targets.len()];

        for (i, target) in targets.iter().enumerate() {
            if !enabled[i] {
                continue;
            }
            let mut seen = HashSet::new();
            for dep in &target.depends_on {
                let d = index[dep.as_str()];
                if !enabled[d] || !seen.insert(d) {
                    continue;
                }
                prerequisites[i].push(d);
                dependents[d].push(i);
            }
        }

        Ok(Self {
            names: targets.iter().map(|t| t.name.clone()).collect(),
            index,
            enabled,
            prerequisites,
            dependents,
        })
    }

    /// Linear launch order of the enabled targets (Kahn's algorithm).
    ///
    /// Among targets that are ready at the same time, the one declared first
    /// goes first, so identical input always yields identical output. When a
    /// cycle exists the error lists every target that could not be ordered.
    pub fn resolve(&self) -> Result<Vec<String>, ConfigError> {
        let mut in_degree: Vec<usize> = self.prerequisites.iter().map(Vec::len).collect();
        let mut ready: BTreeSet<usize> = (0..self.names.len())
            .filter(|&i| self.enabled[i] && in_degree[i] == 0)
            .collect();

        let total = self.enabled.iter().filter(|e| **e).count();
        let mut order = Vec::with_capacity(total);

        while let Some(node) = ready.pop_first() {
            order.push(node);
            for &dependent in &self.dependents[node] {
                in_degree[dependent] -= 1;
                if in_degree[dependent] == 0 {
                    ready.insert(dependent);
                }
            }
        }

        if order.len() < total {
            let placed: HashSet<usize> = order.iter().copied().collect();
            let members = (0..self.names.len())
                .filter(|i| self.enabled[*i] && !placed.contains(i))
                .map(|i| self.names[i].clone())
                .collect();
            return Err(ConfigError::Cycle { members });
        }

        Ok(order.into_iter().map(|i| self.names[i].clone()).collect())
    }

    /// Enabled direct prerequisites of `name`
    pub fn prerequisites(&self, name: &str) -> Vec<&str> {
        self.index
            .get(name)
            .map(|&i| {
                self.prerequisites[i]
                    .iter()
                    .map(|&d| self.names[d].as_str())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// First edge `(dependent, prerequisite)` with both ends inside `names`
    pub fn edge_within<'a>(&'a self, names: &[String]) -> Option<(&'a str, &'a str)> {
        let members: HashSet<usize> = names
            .iter()
            .filter_map(|n| self.index.get(n.as_str()).copied())
            .collect();

        names
            .iter()
            .filter_map(|n| self.index.get(n.as_str()).copied())
            .find_map(|i| {
                self.prerequisites[i]
                    .iter()
                    .find(|d| members.contains(d))
                    .map(|&d| (self.names[i].as_str(), self.names[d].as_str()))
            })
    }

    pub fn contains(&self, name: &str) -> bool {
        self.index.contains_key(name)
    }

    pub fn is_enabled(&self, name: &str) -> bool {
        self.index.get(name).is_some_and(|&i| self.enabled[i])
    }

    /// Number of declared targets (enabled or not)
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Target names in declaration order
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }
}

/// Build the graph and resolve it in one step
pub fn resolve(targets: &[Target]) -> Result<Vec<String>, ConfigError> {
    DependencyGraph::build(targets)?.resolve()
}
