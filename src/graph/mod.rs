//! Reference graph model and the data-source seam the traversal consumes.
//!
//! Node references are opaque path-like strings (`/Game/Characters/BP_Hero`).
//! The concrete source of edges lives behind [`GraphDataSource`]: the SQLite
//! asset index in production, [`InMemoryGraph`] in tests.

pub mod chain;
pub mod index;
pub mod memory;
pub mod search;

pub use chain::{build_reference_chain, build_within_limit, clamp_depth, ReferenceChain};
pub use index::{import_manifest, AssetIndexManifest, ManifestAsset, SqliteAssetIndex};
pub use memory::InMemoryGraph;
pub use search::{AssetMatch, AssetQuery};

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Opaque identifier of an entity in the reference graph.
pub type NodeRef = String;

/// Upper bound applied to every requested traversal depth.
pub const MAX_TRAVERSAL_DEPTH: u32 = 10;

/// Which edges a traversal follows. Fixed for the lifetime of one traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Edges from a node to what it depends on
    Dependencies,
    /// Edges from other nodes pointing back at a node
    Referencers,
    /// Union of both, dependencies first
    Both,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Dependencies => "dependencies",
            Direction::Referencers => "referencers",
            Direction::Both => "both",
        }
    }

    pub fn follows_dependencies(&self) -> bool {
        matches!(self, Direction::Dependencies | Direction::Both)
    }

    pub fn follows_referencers(&self) -> bool {
        matches!(self, Direction::Referencers | Direction::Both)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "dependencies" | "references" | "deps" => Ok(Direction::Dependencies),
            "referencers" | "refs" => Ok(Direction::Referencers),
            "both" => Ok(Direction::Both),
            other => Err(format!(
                "unknown direction '{}' (expected dependencies, referencers or both)",
                other
            )),
        }
    }
}

/// Best-effort display metadata for a node. Empty strings when unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub name: String,
    pub kind: String,
}

/// One node of a reference chain.
///
/// `children` is always serialized, even when empty: an empty array means the
/// traversal stopped here or found no unvisited edges.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceTreeNode {
    pub path: NodeRef,
    pub depth: u32,
    pub name: String,
    pub kind: String,
    pub children: Vec<ReferenceTreeNode>,
}

impl ReferenceTreeNode {
    /// A node with no children
    pub fn leaf(path: impl Into<NodeRef>, depth: u32, info: NodeInfo) -> Self {
        Self {
            path: path.into(),
            depth,
            name: info.name,
            kind: info.kind,
            children: Vec::new(),
        }
    }

    /// Number of nodes in this subtree, including self
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(|c| c.node_count()).sum::<usize>()
    }

    /// Greatest `depth` value in this subtree
    pub fn deepest(&self) -> u32 {
        self.children
            .iter()
            .map(|c| c.deepest())
            .max()
            .unwrap_or(self.depth)
            .max(self.depth)
    }

    /// Paths in pre-order
    pub fn paths(&self) -> Vec<&str> {
        let mut out = Vec::with_capacity(self.node_count());
        self.collect_paths(&mut out);
        out
    }

    fn collect_paths<'a>(&'a self, out: &mut Vec<&'a str>) {
        out.push(&self.path);
        for child in &self.children {
            child.collect_paths(out);
        }
    }

    /// Find the first node with `path` in pre-order
    pub fn find(&self, path: &str) -> Option<&ReferenceTreeNode> {
        if self.path == path {
            return Some(self);
        }
        self.children.iter().find_map(|c| c.find(path))
    }
}

/// The external graph the traversal reads.
///
/// Implementations are not required to be `Send` or `Sync`: the job subsystem
/// only ever calls them from the single home execution context.
pub trait GraphDataSource {
    /// Nodes `node` depends on, in source order
    fn dependencies(&self, node: &str) -> Result<Vec<NodeRef>>;

    /// Nodes that reference `node`, in source order
    fn referencers(&self, node: &str) -> Result<Vec<NodeRef>>;

    /// Name and kind of `node`. Missing metadata is not an error.
    fn describe(&self, node: &str) -> NodeInfo;

    /// Assets whose name and class satisfy `query`, ordered by path.
    fn search(&self, query: &AssetQuery) -> Result<Vec<AssetMatch>>;

    /// Candidate neighbors for a direction; `Both` lists dependencies first.
    fn neighbors(&self, node: &str, direction: Direction) -> Result<Vec<NodeRef>> {
        let mut out = Vec::new();
        if direction.follows_dependencies() {
            out.extend(self.dependencies(node)?);
        }
        if direction.follows_referencers() {
            out.extend(self.referencers(node)?);
        }
        Ok(out)
    }
}
