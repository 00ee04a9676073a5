//! Adjacency-map dependency graph

use std::collections::{BTreeMap, BTreeSet};

/// Directed graph mapping each node to the set of nodes it depends on.
///
/// Every node ever added is a key, even when its successor set is empty.
/// Ordered collections keep iteration deterministic, which in turn keeps
/// build orders reproducible between runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DepGraph<N: Ord> {
    pub(crate) edges: BTreeMap<N, BTreeSet<N>>,
}

impl<N: Copy + Ord> DepGraph<N> {
    /// Create a new empty dependency graph
    pub fn new() -> Self {
        Self {
            edges: BTreeMap::new(),
        }
    }

    /// Build a graph from a list of edges
    pub fn from_edges(edges: &[(N, N)]) -> Self {
        let mut graph = Self::new();
        for &(from, to) in edges {
            graph.add_edge(from, to);
        }
        graph
    }

    /// Ensure `node` is present. Returns `true` if it was newly added.
    pub fn add_node(&mut self, node: N) -> bool {
        if self.edges.contains_key(&node) {
            return false;
        }
        self.edges.insert(node, BTreeSet::new());
        true
    }

    /// Add the edge `from -> to`, inserting both endpoints as needed.
    /// Returns `true` if the edge is new.
    pub fn add_edge(&mut self, from: N, to: N) -> bool {
        self.add_node(to);
        self.edges.entry(from).or_default().insert(to)
    }

    /// Remove the edge `from -> to`. Both nodes stay in the graph.
    pub fn remove_edge(&mut self, from: N, to: N) -> bool {
        self.edges
            .get_mut(&from)
            .map_or(false, |successors| successors.remove(&to))
    }

    /// Remove every outgoing edge of `node`
    pub fn clear_successors(&mut self, node: N) {
        if let Some(successors) = self.edges.get_mut(&node) {
            successors.clear();
        }
    }

    /// Check if the graph contains a node
    pub fn contains(&self, node: N) -> bool {
        self.edges.contains_key(&node)
    }

    /// Check if the graph contains the edge `from -> to`
    pub fn contains_edge(&self, from: N, to: N) -> bool {
        self.edges
            .get(&from)
            .map_or(false, |successors| successors.contains(&to))
    }

    /// Successor set of a node, if present
    pub fn successor_set(&self, node: N) -> Option<&BTreeSet<N>> {
        self.edges.get(&node)
    }

    /// Direct successors of a node (empty for unknown nodes)
    pub fn successors(&self, node: N) -> impl Iterator<Item = N> + '_ {
        self.edges.get(&node).into_iter().flatten().copied()
    }

    /// All nodes in ascending order
    pub fn nodes(&self) -> impl Iterator<Item = N> + '_ {
        self.edges.keys().copied()
    }

    /// Nodes paired with their successor sets
    pub fn iter(&self) -> impl Iterator<Item = (N, &BTreeSet<N>)> + '_ {
        self.edges.iter().map(|(node, successors)| (*node, successors))
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.values().map(BTreeSet::len).sum()
    }
}

impl<N: Copy + Ord> Default for DepGraph<N> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_edge_inserts_both_nodes() {
        let mut graph = DepGraph::new();
        assert!(graph.add_edge(1, 2));
        assert!(!graph.add_edge(1, 2));

        assert!(graph.contains(1));
        assert!(graph.contains(2));
        assert_eq!(graph.successor_set(2).map(BTreeSet::len), Some(0));
        assert_eq!(graph.edge_count(), 1);
    }

    #[test]
    fn test_remove_edge_keeps_nodes() {
        let mut graph = DepGraph::from_edges(&[(1, 2), (1, 3)]);
        assert!(graph.remove_edge(1, 2));
        assert!(!graph.remove_edge(1, 2));

        assert!(graph.contains(2));
        assert_eq!(graph.successors(1).collect::<Vec<_>>(), vec![3]);
    }

    #[test]
    fn test_unknown_node_has_no_successors() {
        let graph: DepGraph<u32> = DepGraph::new();
        assert_eq!(graph.successors(7).count(), 0);
        assert!(graph.is_empty());
    }
}
