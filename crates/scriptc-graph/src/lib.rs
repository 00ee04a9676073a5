//! Dependency graph algorithms for the scriptc build pipeline.
//!
//! The graph is a plain adjacency map from a node to the set of nodes it
//! references. On top of it this crate provides reachability extraction,
//! strongly-connected-component detection, cycle condensation, dependency-first
//! ordering and root discovery. All functions are total: empty and singleton
//! graphs are valid input.

pub mod algo;
pub mod dep_graph;

pub use algo::{condense, extract_subgraph, find_cycles, find_roots, topological_order};
pub use algo::{Condensation, CycleGroups};
pub use dep_graph::DepGraph;
