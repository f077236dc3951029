//! SX-003: Dependency graph and deployment order.
//!
//! Builds one node per stack from `depends_on` names and peels tiers of
//! dependency-free nodes (Kahn). Same-tier nodes are emitted alphabetically
//! so the order is reproducible. A pass that frees nothing while nodes remain
//! means the remainder is circular.

use super::error::{Result, StaxError};
use std::collections::{BTreeMap, BTreeSet};

/// A stack and the names it depends on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DependencyNode {
    pub name: String,
    pub dependencies: BTreeSet<String>,
}

#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    nodes: BTreeMap<String, DependencyNode>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node. Re-registering a name replaces it.
    pub fn add_node<I, S>(&mut self, name: &str, dependencies: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let node = DependencyNode {
            name: name.to_string(),
            dependencies: dependencies.into_iter().map(Into::into).collect(),
        };
        self.nodes.insert(name.to_string(), node);
    }

    /// Order such that every name follows all of its dependencies.
    pub fn resolve(&self) -> Result<Vec<String>> {
        for node in self.nodes.values() {
            for dep in &node.dependencies {
                if !self.nodes.contains_key(dep) {
                    return Err(StaxError::Dependency(format!(
                        "stack '{}' depends on unknown stack '{}'",
                        node.name, dep
                    )));
                }
            }
        }

        let mut remaining: BTreeMap<&str, BTreeSet<&str>> = self
            .nodes
            .values()
            .map(|n| {
                (
                    n.name.as_str(),
                    n.dependencies.iter().map(String::as_str).collect(),
                )
            })
            .collect();

        let mut resolved = Vec::with_capacity(remaining.len());
        while !remaining.is_empty() {
            let ready: Vec<&str> = remaining
                .iter()
                .filter(|(_, deps)| deps.is_empty())
                .map(|(name, _)| *name)
                .collect();

            if ready.is_empty() {
                let circular: Vec<&str> = remaining.keys().copied().collect();
                return Err(StaxError::Dependency(format!(
                    "circular dependency among: {}",
                    circular.join(", ")
                )));
            }

            for name in &ready {
                remaining.remove(name);
                resolved.push(name.to_string());
            }
            for deps in remaining.values_mut() {
                for name in &ready {
                    deps.remove(name);
                }
            }
        }

        Ok(resolved)
    }

    /// Every node that depends on `name`, directly or transitively.
    pub fn dependents_of(&self, name: &str) -> BTreeSet<String> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            for node in self.nodes.values() {
                if node.dependencies.contains(&current) && found.insert(node.name.clone()) {
                    frontier.push(node.name.clone());
                }
            }
        }
        found
    }
}
