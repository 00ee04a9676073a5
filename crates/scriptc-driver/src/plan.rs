//! Build planning: turns the dependency graph below an entry into an ordered
//! list of steps.
//!
//! The subgraph reachable from the entry is condensed so that every cycle
//! becomes one node. A post-order traversal of the condensed graph then puts
//! each unit after everything it depends on; cycle members are expanded in
//! place and built together.

use std::collections::BTreeSet;
use std::fmt;

use scriptc_graph::{
    condense, extract_subgraph, find_cycles, topological_order, Condensation, DepGraph,
};
use scriptc_resolve::{CompilationUnit, Freshness, UnitArena, UnitId, UnitKind};
use tracing::{debug, warn};

use crate::config::{ArtifactLayout, ArtifactMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    Generate,
    Compile,
    /// Link a stand-in module from forward declarations so cycle peers can
    /// link before the real module exists
    ForwardLink,
    Link,
    /// Link a cycle member again, now against its peers' real modules
    Relink,
    /// Produce the module for the entry point
    Emit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Action::Generate => "generate",
            Action::Compile => "compile",
            Action::ForwardLink => "forward-link",
            Action::Link => "link",
            Action::Relink => "relink",
            Action::Emit => "emit",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Step {
    pub unit: UnitId,
    pub action: Action,
}

/// How the build treats a unit of a given kind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KindAction {
    /// Generated, compiled and linked
    Translate,
    /// Generated and compiled; data only, never part of a cycle
    Table,
    /// Linked into dependents as-is
    LinkAsIs,
    /// Provided by the runtime
    Runtime,
    Skip,
}

pub fn kind_action(kind: &UnitKind) -> KindAction {
    match kind {
        UnitKind::Script { .. } | UnitKind::Snippet | UnitKind::ClassMeta { .. } => {
            KindAction::Translate
        }
        UnitKind::Globals => KindAction::Table,
        UnitKind::Precompiled { .. } => KindAction::LinkAsIs,
        UnitKind::Builtins => KindAction::Runtime,
        UnitKind::Unknown => KindAction::Skip,
    }
}

impl KindAction {
    /// Whether the build produces an object for this kind
    pub fn produces_object(self) -> bool {
        matches!(self, KindAction::Translate | KindAction::Table)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlanNode {
    Unit(UnitId),
    Cycle { root: UnitId, members: Vec<UnitId> },
}

impl PlanNode {
    pub fn units(&self) -> Vec<UnitId> {
        match self {
            PlanNode::Unit(id) => vec![*id],
            PlanNode::Cycle { members, .. } => members.clone(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct BuildPlan {
    pub root: UnitId,
    /// Dependencies reachable from the root
    pub subgraph: DepGraph<UnitId>,
    pub condensation: Condensation<UnitId>,
    /// Dependency-first order; the root's node comes last
    pub order: Vec<PlanNode>,
    pub steps: Vec<Step>,
    pub warnings: Vec<String>,
}

impl BuildPlan {
    /// Every unit in the plan, in build order
    pub fn units(&self) -> impl Iterator<Item = UnitId> + '_ {
        self.order.iter().flat_map(PlanNode::units)
    }

    /// Cycle peers of `unit`, excluding the unit itself
    pub fn peers(&self, unit: UnitId) -> BTreeSet<UnitId> {
        let root = self.condensation.root_of(unit);
        if !self.condensation.is_cycle(root) {
            return BTreeSet::new();
        }
        self.condensation
            .members(root)
            .into_iter()
            .flatten()
            .copied()
            .filter(|&member| member != unit)
            .collect()
    }

    pub fn is_cyclic(&self, unit: UnitId) -> bool {
        self.condensation.is_cycle(self.condensation.root_of(unit))
    }

    pub fn has_step(&self, unit: UnitId, action: Action) -> bool {
        self.steps
            .iter()
            .any(|step| step.unit == unit && step.action == action)
    }
}

pub struct Planner<'a> {
    units: &'a UnitArena,
    graph: &'a DepGraph<UnitId>,
    layout: &'a ArtifactLayout,
    mode: ArtifactMode,
}

impl<'a> Planner<'a> {
    pub fn new(
        units: &'a UnitArena,
        graph: &'a DepGraph<UnitId>,
        layout: &'a ArtifactLayout,
        mode: ArtifactMode,
    ) -> Self {
        Self {
            units,
            graph,
            layout,
            mode,
        }
    }

    pub fn plan<F>(&self, root: UnitId, freshness: F) -> BuildPlan
    where
        F: Fn(UnitId) -> Freshness,
    {
        let mut subgraph = extract_subgraph(self.graph, root);
        subgraph.add_node(root);

        // Component roots live past the end of the arena so they never
        // collide with a real unit
        let mut next = self.units.len() as u32;
        let groups = find_cycles(&subgraph, 2, || {
            let id = UnitId(next);
            next += 1;
            id
        });
        let condensation = condense(&subgraph, &groups);

        let start = condensation.root_of(root);
        let order: Vec<PlanNode> = topological_order(&condensation.graph, start)
            .into_iter()
            .map(|node| match condensation.members(node) {
                Some(members) if condensation.is_cycle(node) => PlanNode::Cycle {
                    root: node,
                    members: members.iter().copied().collect(),
                },
                _ => PlanNode::Unit(node),
            })
            .collect();

        let mut plan = BuildPlan {
            root,
            subgraph,
            condensation,
            order,
            steps: Vec::new(),
            warnings: Vec::new(),
        };

        for node in plan.order.clone() {
            match node {
                PlanNode::Unit(id) => {
                    let linked = self.object_steps(&mut plan, id, &freshness, false);
                    if linked && self.mode == ArtifactMode::PerUnit {
                        plan.steps.push(Step {
                            unit: id,
                            action: Action::Link,
                        });
                    }
                }
                PlanNode::Cycle { members, .. } => self.cycle_steps(&mut plan, &members, &freshness),
            }
        }

        if kind_action(&self.units[root].kind) == KindAction::Translate {
            plan.steps.push(Step { unit: root, action: Action::Emit });
        } else {
            plan.warnings.push(format!(
                "entry point `{}` is a {} unit and produces no module",
                self.units[root],
                self.units[root].kind.tag()
            ));
        }

        debug!(
            root = %self.units[root],
            units = plan.order.iter().map(|n| n.units().len()).sum::<usize>(),
            steps = plan.steps.len(),
            "build planned"
        );
        plan
    }

    /// Push the generate and compile steps of one unit. Returns whether the
    /// unit produces an object.
    ///
    /// `forward_declared` units also need the forward declarations a cycle
    /// member links its stand-in from; a unit that joined a cycle since its
    /// last build has none and is generated again.
    fn object_steps<F>(
        &self,
        plan: &mut BuildPlan,
        id: UnitId,
        freshness: &F,
        forward_declared: bool,
    ) -> bool
    where
        F: Fn(UnitId) -> Freshness,
    {
        let unit = &self.units[id];
        match kind_action(&unit.kind) {
            KindAction::Translate | KindAction::Table => {}
            KindAction::Skip => {
                warn!(unit = %unit, "skipping unit of unknown kind");
                plan.warnings.push(format!("skipping `{}`: unknown unit kind", unit));
                return false;
            }
            KindAction::LinkAsIs | KindAction::Runtime => return false,
        }

        let generate = freshness(id).needs_build()
            || !self.layout.source(unit).exists()
            || (forward_declared && !self.layout.partial_source(unit).exists());
        if generate {
            plan.steps.push(Step { unit: id, action: Action::Generate });
        }
        if generate || !self.layout.object(unit).exists() {
            plan.steps.push(Step { unit: id, action: Action::Compile });
        }
        true
    }

    fn cycle_steps<F>(&self, plan: &mut BuildPlan, members: &[UnitId], freshness: &F)
    where
        F: Fn(UnitId) -> Freshness,
    {
        let per_unit = self.mode == ArtifactMode::PerUnit;
        let first = plan.steps.len();
        let linked: Vec<UnitId> = members
            .iter()
            .copied()
            .filter(|&id| self.object_steps(plan, id, freshness, per_unit))
            .collect();

        if !per_unit {
            return;
        }

        let dirty = plan.steps.len() > first
            || linked
                .iter()
                .any(|&id| !self.layout.artifact(self.unit(id)).exists());

        if dirty {
            for &id in &linked {
                plan.steps.push(Step { unit: id, action: Action::ForwardLink });
            }
        }
        for &id in &linked {
            plan.steps.push(Step { unit: id, action: Action::Link });
        }
        if dirty {
            for &id in &linked {
                plan.steps.push(Step { unit: id, action: Action::Relink });
            }
        }
    }

    fn unit(&self, id: UnitId) -> &CompilationUnit {
        &self.units[id]
    }
}
