//! Bounded, cycle-safe reference chain construction.
//!
//! The visited set is global to one traversal: a node reached through a second
//! path (a diamond, or a cycle back to an ancestor) is dropped entirely rather
//! than repeated as a leaf. Each node therefore appears at most once per tree.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::graph::{Direction, GraphDataSource, NodeRef, ReferenceTreeNode, MAX_TRAVERSAL_DEPTH};

/// Serialized payload of a finished traversal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceChain {
    pub start: NodeRef,
    pub direction: Direction,
    pub max_depth: u32,
    /// Size of the visited set, including the start node
    pub unique_nodes: usize,
    pub chain: ReferenceTreeNode,
}

/// Clamp a caller-supplied depth into `[0, MAX_TRAVERSAL_DEPTH]`.
pub fn clamp_depth(requested: i64) -> u32 {
    requested.clamp(0, i64::from(MAX_TRAVERSAL_DEPTH)) as u32
}

/// Build the reference chain rooted at `start`.
///
/// `max_depth` is clamped to [`MAX_TRAVERSAL_DEPTH`]. The neighbor order of
/// the data source is preserved; nothing is sorted.
pub fn build_reference_chain(
    start: &str,
    max_depth: u32,
    direction: Direction,
    source: &dyn GraphDataSource,
) -> Result<ReferenceChain> {
    let mut builder = ChainBuilder::new(source, direction, max_depth, None);
    let chain = builder.run(start)?;
    Ok(builder.finish(start, chain))
}

/// Like [`build_reference_chain`], but gives up once the tree would reach
/// `node_limit` nodes. Returns `None` in that case.
///
/// Used to decide whether a traversal is small enough to answer inline.
pub fn build_within_limit(
    start: &str,
    max_depth: u32,
    direction: Direction,
    source: &dyn GraphDataSource,
    node_limit: usize,
) -> Result<Option<ReferenceChain>> {
    let mut builder = ChainBuilder::new(source, direction, max_depth, Some(node_limit));
    let chain = builder.run(start)?;
    if builder.truncated || builder.visited.len() >= node_limit {
        return Ok(None);
    }
    Ok(Some(builder.finish(start, chain)))
}

struct ChainBuilder<'a> {
    source: &'a dyn GraphDataSource,
    direction: Direction,
    max_depth: u32,
    visited: HashSet<NodeRef>,
    node_limit: Option<usize>,
    truncated: bool,
}

impl<'a> ChainBuilder<'a> {
    fn new(
        source: &'a dyn GraphDataSource,
        direction: Direction,
        max_depth: u32,
        node_limit: Option<usize>,
    ) -> Self {
        Self {
            source,
            direction,
            max_depth: max_depth.min(MAX_TRAVERSAL_DEPTH),
            visited: HashSet::new(),
            node_limit,
            truncated: false,
        }
    }

    fn run(&mut self, start: &str) -> Result<ReferenceTreeNode> {
        self.visited.insert(start.to_string());
        self.expand(start, 0)
    }

    fn finish(self, start: &str, chain: ReferenceTreeNode) -> ReferenceChain {
        ReferenceChain {
            start: start.to_string(),
            direction: self.direction,
            max_depth: self.max_depth,
            unique_nodes: self.visited.len(),
            chain,
        }
    }

    fn expand(&mut self, path: &str, depth: u32) -> Result<ReferenceTreeNode> {
        let mut node = ReferenceTreeNode::leaf(path, depth, self.source.describe(path));
        if depth >= self.max_depth {
            return Ok(node);
        }

        for next in self.source.neighbors(path, self.direction)? {
            if self.truncated {
                break;
            }
            if self.visited.contains(&next) {
                continue;
            }
            if let Some(limit) = self.node_limit {
                if self.visited.len() + 1 >= limit {
                    self.truncated = true;
                    break;
                }
            }
            // Mark before recursing so no other path can expand it again.
            self.visited.insert(next.clone());
            let child = self.expand(&next, depth + 1)?;
            node.children.push(child);
        }

        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::InMemoryGraph;

    fn diamond() -> InMemoryGraph {
        let mut g = InMemoryGraph::new();
        g.add_edge("A", "B");
        g.add_edge("A", "C");
        g.add_edge("B", "D");
        g.add_edge("C", "D");
        g
    }

    #[test]
    fn test_depth_zero_is_bare_root() {
        let g = diamond();
        let result = build_reference_chain("A", 0, Direction::Both, &g).unwrap();
        assert_eq!(result.chain.path, "A");
        assert_eq!(result.chain.depth, 0);
        assert!(result.chain.children.is_empty());
        assert_eq!(result.unique_nodes, 1);
    }

    #[test]
    fn test_both_directions_single_hop() {
        let mut g = InMemoryGraph::new();
        g.add_edge("X", "Y");
        g.add_edge("Z", "X");

        let result = build_reference_chain("X", 1, Direction::Both, &g).unwrap();
        let children: Vec<_> = result.chain.children.iter().map(|c| c.path.as_str()).collect();
        assert_eq!(children, vec!["Y", "Z"]);
        assert!(result.chain.children.iter().all(|c| c.children.is_empty()));
        assert!(result.chain.children.iter().all(|c| c.depth == 1));
    }

    #[test]
    fn test_diamond_dedups_globally() {
        let g = diamond();
        let result = build_reference_chain("A", 3, Direction::Dependencies, &g).unwrap();

        let paths = result.chain.paths();
        assert_eq!(paths.iter().filter(|p| **p == "D").count(), 1);
        // B is expanded first, so D hangs under B and C ends up empty.
        let b = result.chain.find("B").unwrap();
        let c = result.chain.find("C").unwrap();
        assert_eq!(b.children.len(), 1);
        assert_eq!(b.children[0].path, "D");
        assert!(c.children.is_empty());
        assert_eq!(result.unique_nodes, 4);
    }

    #[test]
    fn test_cycle_terminates() {
        let mut g = InMemoryGraph::new();
        g.add_edge("A", "B");
        g.add_edge("B", "C");
        g.add_edge("C", "A");

        let result = build_reference_chain("A", 10, Direction::Dependencies, &g).unwrap();
        assert_eq!(result.chain.paths(), vec!["A", "B", "C"]);
        assert_eq!(result.chain.deepest(), 2);
    }

    #[test]
    fn test_self_loop_is_ignored() {
        let mut g = InMemoryGraph::new();
        g.add_edge("A", "A");
        let result = build_reference_chain("A", 5, Direction::Both, &g).unwrap();
        assert_eq!(result.chain.node_count(), 1);
    }

    #[test]
    fn test_depth_bound_on_long_path() {
        let mut g = InMemoryGraph::new();
        for i in 0..20 {
            g.add_edge(&format!("n{}", i), &format!("n{}", i + 1));
        }
        let result = build_reference_chain("n0", 4, Direction::Dependencies, &g).unwrap();
        assert_eq!(result.chain.deepest(), 4);
        assert_eq!(result.chain.node_count(), 5);
    }

    #[test]
    fn test_depth_clamped_to_maximum() {
        let mut g = InMemoryGraph::new();
        for i in 0..30 {
            g.add_edge(&format!("n{}", i), &format!("n{}", i + 1));
        }
        let result = build_reference_chain("n0", 99, Direction::Dependencies, &g).unwrap();
        assert_eq!(result.max_depth, MAX_TRAVERSAL_DEPTH);
        assert_eq!(result.chain.deepest(), MAX_TRAVERSAL_DEPTH);
    }

    #[test]
    fn test_clamp_depth() {
        assert_eq!(clamp_depth(-5), 0);
        assert_eq!(clamp_depth(3), 3);
        assert_eq!(clamp_depth(1000), MAX_TRAVERSAL_DEPTH);
    }

    #[test]
    fn test_describe_fills_name_and_kind() {
        let mut g = InMemoryGraph::new();
        g.add_node("/Game/BP_Hero", "BP_Hero", "Blueprint");
        g.add_edge("/Game/BP_Hero", "/Game/M_Skin");

        let result = build_reference_chain("/Game/BP_Hero", 1, Direction::Dependencies, &g).unwrap();
        assert_eq!(result.chain.name, "BP_Hero");
        assert_eq!(result.chain.kind, "Blueprint");
        // Unknown metadata stays empty
        assert_eq!(result.chain.children[0].name, "");
        assert_eq!(result.chain.children[0].kind, "");
    }

    #[test]
    fn test_source_error_propagates() {
        let mut g = diamond();
        g.fail_on("C");
        let err = build_reference_chain("A", 3, Direction::Dependencies, &g).unwrap_err();
        assert!(err.to_string().contains("C"));
    }

    #[test]
    fn test_within_limit_small_graph() {
        let g = diamond();
        let result = build_within_limit("A", 3, Direction::Dependencies, &g, 50).unwrap();
        let result = result.expect("diamond fits under the limit");
        assert_eq!(result, build_reference_chain("A", 3, Direction::Dependencies, &g).unwrap());
    }

    #[test]
    fn test_within_limit_gives_up_on_large_graph() {
        let mut g = InMemoryGraph::new();
        for i in 0..100 {
            g.add_edge("hub", &format!("leaf{}", i));
        }
        assert!(build_within_limit("hub", 1, Direction::Dependencies, &g, 50).unwrap().is_none());
        // Exactly at the limit is not "fewer than"
        assert!(build_within_limit("hub", 1, Direction::Dependencies, &g, 101).unwrap().is_none());
        assert!(build_within_limit("hub", 1, Direction::Dependencies, &g, 102).unwrap().is_some());
    }
}
