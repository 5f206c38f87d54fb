//! Topological queries over "previous" links.
//!
//! Provides algorithms for:
//! - Walking a chain towards its head
//! - Finding everything downstream of a node
//! - Cycle detection before re-wiring
//! - Identifying chain heads and tails

use crate::core::error::{GraphError, GraphResult, NodeId};
use crate::graph::structure::FilterGraph;
use std::collections::{HashMap, HashSet, VecDeque};

/// Analyzer for graph topology.
pub struct TopologyAnalyzer<'a> {
    graph: &'a FilterGraph,
}

impl<'a> TopologyAnalyzer<'a> {
    /// Create a new analyzer for the given graph.
    pub fn new(graph: &'a FilterGraph) -> Self {
        Self { graph }
    }

    /// `id` followed by every node reached through "previous" links.
    pub fn upstream_chain(&self, id: NodeId) -> GraphResult<Vec<NodeId>> {
        let mut chain = Vec::new();
        let mut visited = HashSet::new();
        let mut current = Some(id);
        while let Some(node_id) = current {
            if !visited.insert(node_id) {
                return Err(GraphError::CycleDetected {
                    node: id,
                    upstream: node_id,
                });
            }
            chain.push(node_id);
            current = self.graph.get_node(node_id)?.upstream();
        }
        Ok(chain)
    }

    /// Direct readers of every node.
    fn readers(&self) -> HashMap<NodeId, Vec<NodeId>> {
        let mut readers: HashMap<NodeId, Vec<NodeId>> = HashMap::new();
        for node in self.graph.nodes() {
            if let Some(up) = node.upstream() {
                readers.entry(up).or_default().push(node.id);
            }
        }
        readers
    }

    /// Every node reading from `id`, directly or indirectly, nearest first.
    pub fn downstream_of(&self, id: NodeId) -> Vec<NodeId> {
        let readers = self.readers();
        let mut result = Vec::new();
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(id);
        visited.insert(id);

        while let Some(current) = queue.pop_front() {
            for &reader in readers.get(&current).into_iter().flatten() {
                if visited.insert(reader) {
                    result.push(reader);
                    queue.push_back(reader);
                }
            }
        }
        result
    }

    /// Whether linking `node` to read from `previous` would close a loop.
    pub fn would_cycle(&self, node: NodeId, previous: NodeId) -> bool {
        if node == previous {
            return true;
        }
        match self.upstream_chain(previous) {
            Ok(chain) => chain.contains(&node),
            Err(_) => true,
        }
    }

    /// Nodes without an upstream.
    pub fn heads(&self) -> Vec<NodeId> {
        self.graph
            .nodes()
            .filter(|n| n.upstream().is_none())
            .map(|n| n.id)
            .collect()
    }

    /// Nodes nobody reads from: the ends of chains.
    pub fn tails(&self) -> Vec<NodeId> {
        let readers = self.readers();
        self.graph
            .node_ids()
            .filter(|id| !readers.contains_key(id))
            .collect()
    }

    /// Number of links between `id` and its chain head.
    pub fn depth(&self, id: NodeId) -> GraphResult<usize> {
        Ok(self.upstream_chain(id)?.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filters::builtin::identity::IdentityFilter;

    fn linked(graph: &mut FilterGraph, prev: Option<NodeId>) -> NodeId {
        let id = graph.add_filter(Box::new(IdentityFilter));
        graph.set_previous(id, prev).unwrap();
        id
    }

    #[test]
    fn test_upstream_chain_order() {
        let mut graph = FilterGraph::new();
        let a = linked(&mut graph, None);
        let b = linked(&mut graph, Some(a));
        let c = linked(&mut graph, Some(b));

        let analyzer = TopologyAnalyzer::new(&graph);
        assert_eq!(analyzer.upstream_chain(c).unwrap(), vec![c, b, a]);
        assert_eq!(analyzer.depth(c).unwrap(), 2);
    }

    #[test]
    fn test_downstream_branches() {
        let mut graph = FilterGraph::new();
        let head = linked(&mut graph, None);
        let left = linked(&mut graph, Some(head));
        let right = linked(&mut graph, Some(head));
        let leaf = linked(&mut graph, Some(left));

        let analyzer = TopologyAnalyzer::new(&graph);
        let down = analyzer.downstream_of(head);
        assert_eq!(down.len(), 3);
        assert!(down.contains(&right) && down.contains(&leaf));
        assert!(analyzer.downstream_of(right).is_empty());
    }

    #[test]
    fn test_heads_and_tails() {
        let mut graph = FilterGraph::new();
        let head = linked(&mut graph, None);
        let a = linked(&mut graph, Some(head));
        let b = linked(&mut graph, Some(head));

        let analyzer = TopologyAnalyzer::new(&graph);
        assert_eq!(analyzer.heads(), vec![head]);
        let tails = analyzer.tails();
        assert_eq!(tails.len(), 2);
        assert!(tails.contains(&a) && tails.contains(&b));
    }

    #[test]
    fn test_would_cycle() {
        let mut graph = FilterGraph::new();
        let a = linked(&mut graph, None);
        let b = linked(&mut graph, Some(a));
        let other = linked(&mut graph, None);

        let analyzer = TopologyAnalyzer::new(&graph);
        assert!(analyzer.would_cycle(a, b));
        assert!(analyzer.would_cycle(a, a));
        assert!(!analyzer.would_cycle(other, b));
    }
}
