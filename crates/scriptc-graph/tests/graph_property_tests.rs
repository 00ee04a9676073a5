//! Property tests over randomly generated dependency graphs

use std::collections::{BTreeSet, VecDeque};

use proptest::prelude::*;
use scriptc_graph::{condense, extract_subgraph, find_cycles, topological_order, DepGraph};

const NODES: u32 = 12;

fn arb_graph() -> impl Strategy<Value = DepGraph<u32>> {
    (
        prop::collection::vec((0..NODES, 0..NODES), 0..40),
        prop::collection::vec(0..NODES, 0..4),
    )
        .prop_map(|(edges, isolated)| {
            let mut graph = DepGraph::from_edges(&edges);
            for node in isolated {
                graph.add_node(node);
            }
            graph
        })
}

/// Breadth-first reachability, independent of the crate's traversal
fn reachable(graph: &DepGraph<u32>, root: u32) -> BTreeSet<u32> {
    let mut seen = BTreeSet::new();
    if !graph.contains(root) {
        return seen;
    }
    let mut queue = VecDeque::from([root]);
    seen.insert(root);
    while let Some(node) = queue.pop_front() {
        for next in graph.successors(node) {
            if seen.insert(next) {
                queue.push_back(next);
            }
        }
    }
    seen
}

proptest! {
    #[test]
    fn test_extract_subgraph_is_exactly_the_reachable_part(graph in arb_graph(), root in 0..NODES) {
        let sub = extract_subgraph(&graph, root);
        let nodes: BTreeSet<u32> = sub.nodes().collect();
        prop_assert_eq!(&nodes, &reachable(&graph, root));

        for node in &nodes {
            let expected: BTreeSet<u32> = graph
                .successors(*node)
                .filter(|next| nodes.contains(next))
                .collect();
            let actual: BTreeSet<u32> = sub.successors(*node).collect();
            prop_assert_eq!(actual, expected);
        }
    }

    #[test]
    fn test_condensed_order_puts_dependencies_first(graph in arb_graph(), root in 0..NODES) {
        let mut next = 1000;
        let groups = find_cycles(&graph, 2, || {
            next += 1;
            next
        });
        let condensation = condense(&graph, &groups);
        let order = topological_order(&condensation.graph, condensation.root_of(root));

        let unique: BTreeSet<u32> = order.iter().copied().collect();
        prop_assert_eq!(unique.len(), order.len());

        let position = |node: u32| order.iter().position(|n| *n == node);
        for (from, successors) in condensation.graph.iter() {
            let Some(from_at) = position(from) else {
                continue;
            };
            for &to in successors {
                // Only an ungrouped self-loop can point back at its own node
                if to == from {
                    continue;
                }
                let to_at = position(to);
                prop_assert!(to_at.is_some(), "{} reached from {} is missing", to, from);
                prop_assert!(to_at < Some(from_at), "{} must precede {}", to, from);
            }
        }
    }
}
