//! Graph algorithms: reachability, cycles, condensation and ordering

use std::collections::{BTreeMap, BTreeSet};
use std::hash::Hash;

use petgraph::graphmap::DiGraphMap;
use petgraph::visit::DfsPostOrder;

use crate::dep_graph::DepGraph;

/// Strongly connected components keyed by their component root.
///
/// Components of two or more members are keyed by a freshly allocated
/// synthetic node; singleton components are keyed by their only member.
pub type CycleGroups<N> = BTreeMap<N, BTreeSet<N>>;

/// A graph whose cycles have been collapsed into synthetic component roots.
///
/// The member lists stay available so callers can expand a component root
/// back into the units it stands for.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Condensation<N: Ord> {
    pub graph: DepGraph<N>,
    pub groups: CycleGroups<N>,
    owner: BTreeMap<N, N>,
}

impl<N: Copy + Ord> Condensation<N> {
    /// The node standing for `node` in the condensed graph
    pub fn root_of(&self, node: N) -> N {
        self.owner.get(&node).copied().unwrap_or(node)
    }

    /// Members of a component root, if `root` is one
    pub fn members(&self, root: N) -> Option<&BTreeSet<N>> {
        self.groups.get(&root)
    }

    /// Whether `node` is a synthetic root standing for a multi-member cycle
    pub fn is_cycle(&self, node: N) -> bool {
        self.groups
            .get(&node)
            .map_or(false, |members| !members.contains(&node))
    }
}

fn to_graph_map<N>(graph: &DepGraph<N>) -> DiGraphMap<N, ()>
where
    N: Copy + Ord + Hash,
{
    let mut map = DiGraphMap::with_capacity(graph.len(), graph.edge_count());
    for (node, successors) in graph.iter() {
        map.add_node(node);
        for &successor in successors {
            map.add_edge(node, successor, ());
        }
    }
    map
}

/// Extract the part of `graph` reachable from `root`.
///
/// Every reachable node keeps its full successor set. An absent root yields
/// an empty graph.
pub fn extract_subgraph<N: Copy + Ord>(graph: &DepGraph<N>, root: N) -> DepGraph<N> {
    let mut subgraph = DepGraph::new();
    if !graph.contains(root) {
        return subgraph;
    }

    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if subgraph.contains(node) {
            continue;
        }

        let successors = graph.successor_set(node).cloned().unwrap_or_default();
        for &successor in &successors {
            if !subgraph.contains(successor) {
                stack.push(successor);
            }
        }
        subgraph.edges.insert(node, successors);
    }

    subgraph
}

/// Find strongly connected components with at least `min_size` members.
///
/// `min_size = 1` returns every node as a group; `min_size = 2` returns only
/// true cycles. Multi-member groups are keyed by a node obtained from
/// `allocate`, called once per such group in ascending order of the group's
/// smallest member.
pub fn find_cycles<N, F>(graph: &DepGraph<N>, min_size: usize, mut allocate: F) -> CycleGroups<N>
where
    N: Copy + Ord + Hash,
    F: FnMut() -> N,
{
    let map = to_graph_map(graph);
    let min_size = min_size.max(1);

    let mut components: Vec<Vec<N>> = petgraph::algo::tarjan_scc(&map)
        .into_iter()
        .filter(|component| component.len() >= min_size)
        .map(|mut component| {
            component.sort();
            component
        })
        .collect();
    components.sort();

    let mut groups = CycleGroups::new();
    for members in components {
        let root = if members.len() == 1 {
            members[0]
        } else {
            allocate()
        };
        groups.insert(root, members.into_iter().collect());
    }
    groups
}

/// Collapse each group of `groups` into its root.
///
/// Edges between members of a group are dropped, edges leaving the group are
/// re-homed on the group root, and edges entering any member are redirected
/// to the root. Nodes outside every group keep their edges.
pub fn condense<N: Copy + Ord>(graph: &DepGraph<N>, groups: &CycleGroups<N>) -> Condensation<N> {
    let mut owner = BTreeMap::new();
    for (&root, members) in groups {
        for &member in members {
            owner.insert(member, root);
        }
    }

    let mut condensed = DepGraph::new();
    for (node, successors) in graph.iter() {
        let from = owner.get(&node).copied().unwrap_or(node);
        condensed.add_node(from);

        for &successor in successors {
            let to = owner.get(&successor).copied().unwrap_or(successor);
            if from == to && owner.contains_key(&node) {
                continue;
            }
            condensed.add_edge(from, to);
        }
    }

    // Keep component roots even when none of their members had edges
    for (&root, members) in groups {
        if members.iter().any(|member| graph.contains(*member)) {
            condensed.add_node(root);
        }
    }

    Condensation {
        graph: condensed,
        groups: groups.clone(),
        owner,
    }
}

/// Dependency-first order of the nodes reachable from `start`.
///
/// This is a post-order depth-first traversal: a node is emitted only after
/// all of its successors. The graph must already be condensed; on a cyclic
/// graph the order within a cycle is arbitrary.
pub fn topological_order<N>(graph: &DepGraph<N>, start: N) -> Vec<N>
where
    N: Copy + Ord + Hash,
{
    if !graph.contains(start) {
        return Vec::new();
    }

    let map = to_graph_map(graph);
    let mut dfs = DfsPostOrder::new(&map, start);
    let mut order = Vec::with_capacity(graph.len());
    while let Some(node) = dfs.next(&map) {
        order.push(node);
    }
    order
}

/// Nodes with no incoming edge
pub fn find_roots<N: Copy + Ord>(graph: &DepGraph<N>) -> BTreeSet<N> {
    let referenced: BTreeSet<N> = graph
        .iter()
        .flat_map(|(_, successors)| successors.iter().copied())
        .collect();

    graph
        .nodes()
        .filter(|node| !referenced.contains(node))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: u32 = 0;
    const B: u32 = 1;
    const C: u32 = 2;
    const D: u32 = 3;
    const E: u32 = 4;

    /// Synthetic ids start well above the test node ids
    fn allocator() -> impl FnMut() -> u32 {
        let mut next = 100;
        move || {
            next += 1;
            next
        }
    }

    fn position(order: &[u32], node: u32) -> usize {
        order.iter().position(|n| *n == node).unwrap()
    }

    #[test]
    fn test_extract_subgraph_reachable_only() {
        let graph = DepGraph::from_edges(&[(A, B), (B, C), (D, A), (D, E)]);
        let sub = extract_subgraph(&graph, A);

        assert_eq!(sub.nodes().collect::<Vec<_>>(), vec![A, B, C]);
        assert_eq!(sub.successor_set(A), graph.successor_set(A));
        assert_eq!(sub.successor_set(B), graph.successor_set(B));
        assert!(!sub.contains(D));
        assert!(!sub.contains(E));
    }

    #[test]
    fn test_extract_subgraph_missing_root() {
        let graph = DepGraph::from_edges(&[(A, B)]);
        assert!(extract_subgraph(&graph, E).is_empty());
    }

    #[test]
    fn test_extract_subgraph_follows_cycles() {
        let graph = DepGraph::from_edges(&[(A, B), (B, A), (B, C)]);
        let sub = extract_subgraph(&graph, B);
        assert_eq!(sub, graph);
    }

    #[test]
    fn test_find_cycles_single_cycle() {
        let graph = DepGraph::from_edges(&[(A, B), (B, C), (C, A), (D, D), (D, A)]);
        let groups = find_cycles(&graph, 2, allocator());

        assert_eq!(groups.len(), 1);
        let (root, members) = groups.iter().next().unwrap();
        assert_eq!(*root, 101);
        assert_eq!(members.iter().copied().collect::<Vec<_>>(), vec![A, B, C]);
    }

    #[test]
    fn test_find_cycles_min_size_one() {
        let graph = DepGraph::from_edges(&[(A, B), (B, A), (C, A)]);
        let groups = find_cycles(&graph, 1, allocator());

        assert_eq!(groups.len(), 2);
        assert_eq!(groups[&C].iter().copied().collect::<Vec<_>>(), vec![C]);
        assert_eq!(groups[&101].iter().copied().collect::<Vec<_>>(), vec![A, B]);
    }

    #[test]
    fn test_condense_redirects_edges() {
        // E -> A, A <-> B, B -> C
        let graph = DepGraph::from_edges(&[(E, A), (A, B), (B, A), (B, C)]);
        let groups = find_cycles(&graph, 2, allocator());
        let condensation = condense(&graph, &groups);
        let root = condensation.root_of(A);

        assert_eq!(root, 101);
        assert_eq!(condensation.root_of(B), root);
        assert!(condensation.is_cycle(root));
        assert!(condensation.graph.contains_edge(E, root));
        assert!(condensation.graph.contains_edge(root, C));
        assert!(!condensation.graph.contains(A));
        assert!(!condensation.graph.contains_edge(root, root));
        assert_eq!(condensation.members(root).map(|m| m.len()), Some(2));
    }

    #[test]
    fn test_condense_keeps_ungrouped_self_loop() {
        let graph = DepGraph::from_edges(&[(A, A), (A, B)]);
        let condensation = condense(&graph, &CycleGroups::new());
        assert!(condensation.graph.contains_edge(A, A));
        assert_eq!(condensation.graph, graph);
    }

    #[test]
    fn test_topological_order_dependency_first() {
        // Diamond: D -> B, C; B, C -> A
        let graph = DepGraph::from_edges(&[(D, B), (D, C), (B, A), (C, A)]);
        let order = topological_order(&graph, D);

        assert_eq!(order.len(), 4);
        assert!(position(&order, A) < position(&order, B));
        assert!(position(&order, A) < position(&order, C));
        assert!(position(&order, B) < position(&order, D));
        assert!(position(&order, C) < position(&order, D));
    }

    #[test]
    fn test_condensed_order_respects_every_edge() {
        let graph = DepGraph::from_edges(&[
            (E, A),
            (A, B),
            (B, C),
            (C, A),
            (C, D),
            (E, D),
        ]);
        let groups = find_cycles(&graph, 2, allocator());
        let condensation = condense(&graph, &groups);
        let start = condensation.root_of(E);
        let order = topological_order(&condensation.graph, start);

        for (from, successors) in condensation.graph.iter() {
            for &to in successors {
                assert!(
                    position(&order, to) < position(&order, from),
                    "{} must precede {}",
                    to,
                    from
                );
            }
        }
    }

    #[test]
    fn test_topological_order_degenerate_inputs() {
        let empty: DepGraph<u32> = DepGraph::new();
        assert!(topological_order(&empty, A).is_empty());

        let mut single = DepGraph::new();
        single.add_node(A);
        assert_eq!(topological_order(&single, A), vec![A]);
    }

    #[test]
    fn test_find_roots() {
        let graph = DepGraph::from_edges(&[(A, B), (C, B), (B, D), (E, E)]);
        let roots = find_roots(&graph);
        assert_eq!(roots.into_iter().collect::<Vec<_>>(), vec![A, C]);

        let empty: DepGraph<u32> = DepGraph::new();
        assert!(find_roots(&empty).is_empty());
    }
}
