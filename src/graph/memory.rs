//! In-memory graph data source, used by tests and fixtures.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::error::{RefgraphError, Result};
use crate::graph::{AssetMatch, AssetQuery, GraphDataSource, NodeInfo, NodeRef};

/// Adjacency-list graph that keeps edge insertion order.
#[derive(Debug, Clone, Default)]
pub struct InMemoryGraph {
    dependencies: HashMap<NodeRef, Vec<NodeRef>>,
    referencers: HashMap<NodeRef, Vec<NodeRef>>,
    info: HashMap<NodeRef, NodeInfo>,
    failing: HashSet<NodeRef>,
}

impl InMemoryGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` depends on `to`. Duplicate edges are ignored.
    pub fn add_edge(&mut self, from: &str, to: &str) {
        let deps = self.dependencies.entry(from.to_string()).or_default();
        if deps.iter().any(|d| d == to) {
            return;
        }
        deps.push(to.to_string());
        self.referencers
            .entry(to.to_string())
            .or_default()
            .push(from.to_string());
    }

    /// Attach display metadata to a node
    pub fn add_node(&mut self, path: &str, name: &str, kind: &str) {
        self.info.insert(
            path.to_string(),
            NodeInfo {
                name: name.to_string(),
                kind: kind.to_string(),
            },
        );
    }

    /// Make every edge lookup on `path` fail
    pub fn fail_on(&mut self, path: &str) {
        self.failing.insert(path.to_string());
    }

    fn lookup(&self, map: &HashMap<NodeRef, Vec<NodeRef>>, node: &str) -> Result<Vec<NodeRef>> {
        if self.failing.contains(node) {
            return Err(RefgraphError::Graph(format!("lookup failed for {}", node)));
        }
        Ok(map.get(node).cloned().unwrap_or_default())
    }
}

impl GraphDataSource for InMemoryGraph {
    fn dependencies(&self, node: &str) -> Result<Vec<NodeRef>> {
        self.lookup(&self.dependencies, node)
    }

    fn referencers(&self, node: &str) -> Result<Vec<NodeRef>> {
        self.lookup(&self.referencers, node)
    }

    fn describe(&self, node: &str) -> NodeInfo {
        self.info.get(node).cloned().unwrap_or_default()
    }

    /// Searches every known node. Nodes without metadata are named after
    /// their last path segment and have an empty kind.
    fn search(&self, query: &AssetQuery) -> Result<Vec<AssetMatch>> {
        let paths: BTreeSet<&NodeRef> = self
            .dependencies
            .keys()
            .chain(self.referencers.keys())
            .chain(self.info.keys())
            .collect();

        let matches = paths
            .into_iter()
            .filter_map(|path| {
                let info = self.describe(path);
                let name = if info.name.is_empty() {
                    path.rsplit('/').next().unwrap_or(path).to_string()
                } else {
                    info.name
                };
                query.matches(&name, &info.kind).then(|| AssetMatch {
                    name,
                    path: path.clone(),
                    kind: info.kind,
                })
            })
            .collect();
        Ok(matches)
    }
}
