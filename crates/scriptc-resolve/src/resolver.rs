//! Incremental, cache-aware symbol resolution.
//!
//! The resolver owns the dependency graph of every unit ever discovered and
//! grows it with a FIFO worklist. A unit seen for the first time, or whose
//! file got newer, has its body walked; a unit that is unchanged on disk only
//! has its previously recorded imports re-resolved. Each unit is walked or
//! fixed up at most once per run.

use std::collections::{BTreeMap, BTreeSet, VecDeque};
use std::path::{Path, PathBuf};

use scriptc_graph::DepGraph;
use scriptc_lexer::Span;
use tracing::{debug, warn};

use crate::error::Result;
use crate::lookup::{Definition, NameLookup};
use crate::scope::{Binding, Bucket, ScopeId, ScopeKind, ScopeTree};
use crate::unit::{DefinitionHandle, Freshness, UnitArena, UnitId, UnitKind};
use crate::walker::{AstWalker, Declaration, Visitor};

/// Name of the shared unit holding global variables
pub const GLOBALS_UNIT: &str = "<globals>";

/// Name of the shared unit holding referenced runtime builtins
pub const BUILTINS_UNIT: &str = "<builtins>";

fn shared_table_name(kind: &UnitKind) -> &'static str {
    match kind {
        UnitKind::Globals => GLOBALS_UNIT,
        _ => BUILTINS_UNIT,
    }
}

/// Where an imported symbol resolved to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ImportTarget {
    Unit(UnitId),
    Unresolved,
}

/// Per unit, the symbols imported from each target
pub type ImportMap = BTreeMap<UnitId, BTreeMap<ImportTarget, BTreeSet<String>>>;

/// Everything that survives between runs: units, edges and import sets.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitGraph {
    pub units: UnitArena,
    pub graph: DepGraph<UnitId>,
    pub imports: ImportMap,
}

impl UnitGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` imports `symbol` from `target`.
    ///
    /// Adds the dependency edge for unit targets. Self-imports are ignored.
    pub fn record_import(&mut self, from: UnitId, target: ImportTarget, symbol: &str) {
        if target == ImportTarget::Unit(from) {
            return;
        }
        self.imports
            .entry(from)
            .or_default()
            .entry(target)
            .or_default()
            .insert(symbol.to_string());
        if let ImportTarget::Unit(to) = target {
            self.graph.add_edge(from, to);
        }
    }

    /// Forget one imported symbol, dropping the edge once nothing else is
    /// imported from that target.
    pub fn remove_import(&mut self, from: UnitId, target: ImportTarget, symbol: &str) {
        let Some(targets) = self.imports.get_mut(&from) else {
            return;
        };
        let Some(symbols) = targets.get_mut(&target) else {
            return;
        };

        symbols.remove(symbol);
        if symbols.is_empty() {
            targets.remove(&target);
            if let ImportTarget::Unit(to) = target {
                self.graph.remove_edge(from, to);
            }
        }
        if targets.is_empty() {
            self.imports.remove(&from);
        }
    }

    /// Symbols `unit` imports from `target`
    pub fn imported(&self, unit: UnitId, target: ImportTarget) -> Option<&BTreeSet<String>> {
        self.imports.get(&unit).and_then(|targets| targets.get(&target))
    }

    /// Names `unit` references that resolved to nothing
    pub fn unresolved_names(&self, unit: UnitId) -> impl Iterator<Item = &str> {
        self.imported(unit, ImportTarget::Unresolved)
            .into_iter()
            .flatten()
            .map(String::as_str)
    }

    /// Drop everything derived from a unit's body before it is walked again
    fn clear_body(&mut self, unit: UnitId) {
        self.graph.clear_successors(unit);
        self.imports.remove(&unit);
        if let Some(unit) = self.units.get_mut(unit) {
            unit.local_slots.clear();
        }
    }
}

/// A reference that resolved to nothing, kept for diagnostics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedReference {
    pub unit: UnitId,
    pub name: String,
    /// Location of the first occurrence, absent when found during fix-up
    pub span: Option<Span>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Work {
    Walk(UnitId),
    FixUp(UnitId),
}

/// Names already resolved from one source directory
#[derive(Debug, Default)]
struct SymbolDirectory {
    resolved: BTreeMap<String, UnitId>,
    /// Names resolvable from inside the directory, loaded on first use
    names: Option<BTreeSet<String>>,
}

/// State that only lives for one run
#[derive(Debug, Default)]
struct RunState {
    freshness: BTreeMap<UnitId, Freshness>,
    visited: BTreeSet<UnitId>,
    queue: VecDeque<Work>,
    directories: BTreeMap<Option<PathBuf>, SymbolDirectory>,
    search_path_names: Option<BTreeSet<String>>,
    scopes: BTreeMap<UnitId, ScopeTree>,
    unresolved: Vec<UnresolvedReference>,
    walks: usize,
}

/// Collects what one body walk declares and references.
struct UnitVisitor {
    tree: ScopeTree,
    stack: Vec<ScopeId>,
    slots: Vec<String>,
    globals: Vec<String>,
    /// References unbound at the point they were seen, in source order
    pending: Vec<(String, Span, ScopeId)>,
}

impl UnitVisitor {
    fn new() -> Self {
        let tree = ScopeTree::new();
        let root = tree.root();
        Self {
            tree,
            stack: vec![root],
            slots: Vec::new(),
            globals: Vec::new(),
            pending: Vec::new(),
        }
    }

    fn current(&self) -> ScopeId {
        self.stack.last().copied().unwrap_or_else(|| self.tree.root())
    }

    /// Pending references that still need external resolution.
    ///
    /// Nested functions declared after their first call are bound by now.
    fn into_parts(self) -> (ScopeTree, Vec<String>, Vec<String>, Vec<(String, Span)>) {
        let tree = self.tree;
        let pending = self
            .pending
            .into_iter()
            .filter(|(name, _, scope)| tree.find_nested_function(*scope, name).is_none())
            .map(|(name, span, _)| (name, span))
            .collect();
        (tree, self.slots, self.globals, pending)
    }
}

impl Visitor for UnitVisitor {
    fn enter_scope(&mut self, kind: ScopeKind, name: Option<&str>, _span: Span) {
        let parent = self.current();
        let scope = self.tree.open(parent, kind, name);
        self.stack.push(scope);
    }

    fn exit_scope(&mut self) {
        if self.stack.len() > 1 {
            self.stack.pop();
        }
    }

    fn declare(&mut self, name: &str, declaration: Declaration, _span: Span) {
        let scope = self.current();
        match declaration {
            Declaration::Local => self.tree.declare(scope, Bucket::Ordinary, name),
            Declaration::Persistent => self.tree.declare(scope, Bucket::Persistent, name),
            Declaration::Global => {
                self.tree.declare(scope, Bucket::Ordinary, name);
                if !self.globals.iter().any(|g| g == name) {
                    self.globals.push(name.to_string());
                }
            }
            Declaration::Function if scope == self.tree.root() => {
                if !self.slots.iter().any(|s| s == name) {
                    self.slots.push(name.to_string());
                }
            }
            Declaration::Function => self.tree.declare(scope, Bucket::NestedFunction, name),
        }
    }

    fn reference(&mut self, name: &str, span: Span) {
        let scope = self.current();
        if self.tree.lookup(scope, name) == Binding::Unbound {
            self.pending.push((name.to_string(), span, scope));
        }
    }
}

/// Semantic resolver over an [`AstWalker`] and a [`NameLookup`].
pub struct Resolver<W, L> {
    walker: W,
    lookup: L,
    state: UnitGraph,
    run: RunState,
}

impl<W: AstWalker, L: NameLookup> Resolver<W, L> {
    /// Resolver starting from an empty graph
    pub fn new(walker: W, lookup: L) -> Self {
        Self::with_state(walker, lookup, UnitGraph::new())
    }

    /// Resolver continuing from a graph restored from the cache
    pub fn with_state(walker: W, lookup: L, state: UnitGraph) -> Self {
        Self {
            walker,
            lookup,
            state,
            run: RunState::default(),
        }
    }

    /// Resolve `entry` and everything it transitively references.
    ///
    /// Without an explicit definition the entry is looked up on the search
    /// path. Returns `None` when the name denotes nothing buildable.
    pub fn analyze(&mut self, entry: &str, definition: Option<Definition>) -> Result<Option<UnitId>> {
        let definition = match definition.or_else(|| self.lookup.find_definition(entry, None)) {
            Some(definition) => definition,
            None => {
                warn!(entry, "no definition found for entry point");
                return Ok(None);
            }
        };
        if definition.kind.is_shared_table() {
            warn!(entry, "entry point names a runtime builtin");
            return Ok(None);
        }

        let root = self.unit_for_definition(entry, definition);
        if let Err(e) = self.drain() {
            self.run.queue.clear();
            return Err(e);
        }

        debug!(
            entry,
            unit = %self.state.units[root],
            units = self.state.units.len(),
            "analysis finished"
        );
        Ok(Some(root))
    }

    fn drain(&mut self) -> Result<()> {
        while let Some(work) = self.run.queue.pop_front() {
            match work {
                Work::Walk(id) => {
                    if self.run.visited.insert(id) {
                        self.walk_unit(id)?;
                    }
                }
                Work::FixUp(id) => {
                    if self.run.visited.insert(id) {
                        self.resolve_cache_dependency(id);
                    }
                }
            }
        }
        Ok(())
    }

    /// The unit `definition` denotes, creating or refreshing it as needed
    fn unit_for_definition(&mut self, name: &str, definition: Definition) -> UnitId {
        if definition.kind.is_shared_table() {
            return self.shared_table_slot(name, definition.kind);
        }

        let existing = self
            .state
            .units
            .find_match(name, &definition.kind, definition.timestamp);

        let Some(id) = existing else {
            let id = self.state.units.insert(
                name,
                definition.kind,
                definition.timestamp,
                Some(definition.handle),
            );
            self.state.graph.add_node(id);
            self.run.freshness.insert(id, Freshness::New);
            self.run.queue.push_back(Work::Walk(id));
            debug!(unit = %self.state.units[id], "discovered unit");
            return id;
        };

        if self.run.freshness.contains_key(&id) {
            return id;
        }

        self.state.graph.add_node(id);
        let Some(unit) = self.state.units.get_mut(id) else {
            return id;
        };
        if unit.kind.is_rechecked_on_disk() && definition.timestamp > unit.timestamp {
            unit.timestamp = definition.timestamp;
            unit.handle = Some(definition.handle);
            debug!(unit = %unit, "unit changed on disk");
            self.run.freshness.insert(id, Freshness::Updated);
            self.run.queue.push_back(Work::Walk(id));
        } else {
            if unit.handle.is_none() {
                unit.handle = Some(definition.handle);
            }
            self.run.freshness.insert(id, Freshness::Old);
            self.run.queue.push_back(Work::FixUp(id));
        }
        id
    }

    /// Get or create the shared table of `kind` and make sure it has `slot`
    fn shared_table_slot(&mut self, slot: &str, kind: UnitKind) -> UnitId {
        let table = shared_table_name(&kind);
        let id = match self.state.units.find_match(table, &kind, 0) {
            Some(id) => id,
            None => {
                let id = self
                    .state
                    .units
                    .insert(table, kind, 0, Some(DefinitionHandle::Table));
                self.state.graph.add_node(id);
                self.run.freshness.insert(id, Freshness::New);
                id
            }
        };

        let added = self
            .state
            .units
            .get_mut(id)
            .map_or(false, |unit| unit.add_local_slot(slot));
        if added && self.freshness(id) == Freshness::Old {
            self.run.freshness.insert(id, Freshness::Updated);
        }
        id
    }

    fn walk_unit(&mut self, id: UnitId) -> Result<()> {
        let unit = &self.state.units[id];
        if !unit.kind.has_body() {
            return Ok(());
        }
        let Some(handle) = unit.handle.clone() else {
            return Ok(());
        };

        debug!(unit = %unit, "walking unit body");
        self.state.clear_body(id);

        let mut visitor = UnitVisitor::new();
        self.walker.walk(&handle, &mut visitor)?;
        self.run.walks += 1;

        let (tree, slots, globals, pending) = visitor.into_parts();
        if let Some(unit) = self.state.units.get_mut(id) {
            for slot in &slots {
                unit.add_local_slot(slot);
            }
        }
        for global in &globals {
            self.declare_global(id, global);
        }

        // Resolved after the walk so functions declared later in the file win
        let mut seen = BTreeSet::new();
        for (name, span) in pending {
            if !seen.insert(name.clone()) {
                continue;
            }
            let target = self.lookup_external(id, &name);
            self.state.record_import(id, target, &name);
            if target == ImportTarget::Unresolved {
                debug!(unit = %self.state.units[id], name = %name, "unresolved reference");
                self.run.unresolved.push(UnresolvedReference {
                    unit: id,
                    name,
                    span: Some(span),
                });
            }
        }

        self.run.scopes.insert(id, tree);
        Ok(())
    }

    /// Track a global variable as a slot of the shared globals unit
    fn declare_global(&mut self, unit: UnitId, name: &str) {
        let globals = self.shared_table_slot(name, UnitKind::Globals);
        self.state
            .record_import(unit, ImportTarget::Unit(globals), name);
    }

    /// Resolve a name `unit` could not bind locally. Local slots of the unit
    /// win, then names already resolved from the same directory, then the
    /// name lookup restricted to names known to exist.
    fn lookup_external(&mut self, unit: UnitId, name: &str) -> ImportTarget {
        let current = &self.state.units[unit];
        if current.has_local_slot(name) {
            return ImportTarget::Unit(unit);
        }

        let directory = current.directory().map(Path::to_path_buf);
        if let Some(&target) = self
            .run
            .directories
            .get(&directory)
            .and_then(|dir| dir.resolved.get(name))
        {
            return ImportTarget::Unit(target);
        }

        if !self.is_known_name(directory.as_deref(), name) {
            return ImportTarget::Unresolved;
        }
        let Some(definition) = self.lookup.find_definition(name, directory.as_deref()) else {
            return ImportTarget::Unresolved;
        };

        let target = self.unit_for_definition(name, definition);
        self.run
            .directories
            .entry(directory)
            .or_default()
            .resolved
            .insert(name.to_string(), target);
        ImportTarget::Unit(target)
    }

    fn is_known_name(&mut self, directory: Option<&Path>, name: &str) -> bool {
        let lookup = &self.lookup;
        let on_path = self
            .run
            .search_path_names
            .get_or_insert_with(|| lookup.search_path_names())
            .contains(name);
        if on_path {
            return true;
        }

        let Some(directory) = directory else {
            return false;
        };
        self.run
            .directories
            .entry(Some(directory.to_path_buf()))
            .or_default()
            .names
            .get_or_insert_with(|| lookup.directory_names(directory))
            .contains(name)
    }

    /// Re-validate the recorded imports of a unit unchanged on disk.
    ///
    /// Every previously imported symbol is resolved again against the current
    /// directory and search-path state; symbols whose target moved are
    /// re-homed and the unit becomes `DependencyUpdated`. Returns whether any
    /// target changed. Globals come from declarations in the body and are
    /// left alone. A `DependencyUpdated` unit is not queued for another
    /// fix-up: it is already visited this run, so `drain` would drop it.
    pub fn resolve_cache_dependency(&mut self, unit: UnitId) -> bool {
        let previous: Vec<(ImportTarget, String)> = self
            .state
            .imports
            .get(&unit)
            .into_iter()
            .flatten()
            .filter(|(target, _)| match target {
                ImportTarget::Unit(id) => self.state.units[*id].kind != UnitKind::Globals,
                ImportTarget::Unresolved => true,
            })
            .flat_map(|(target, symbols)| symbols.iter().map(move |s| (*target, s.clone())))
            .collect();

        let mut changed = false;
        for (old_target, symbol) in previous {
            let new_target = self.lookup_external(unit, &symbol);
            if new_target == old_target {
                continue;
            }
            debug!(
                unit = %self.state.units[unit],
                symbol = %symbol,
                "import resolves to a different target"
            );
            self.state.remove_import(unit, old_target, &symbol);
            self.state.record_import(unit, new_target, &symbol);
            if new_target == ImportTarget::Unresolved {
                self.run.unresolved.push(UnresolvedReference {
                    unit,
                    name: symbol,
                    span: None,
                });
            }
            changed = true;
        }

        if changed && self.freshness(unit) == Freshness::Old {
            self.run.freshness.insert(unit, Freshness::DependencyUpdated);
        }
        changed
    }

    /// Freshness of a unit this run; units not reached are `Old`
    pub fn freshness(&self, unit: UnitId) -> Freshness {
        self.run
            .freshness
            .get(&unit)
            .copied()
            .unwrap_or(Freshness::Old)
    }

    pub fn set_freshness(&mut self, unit: UnitId, freshness: Freshness) {
        self.run.freshness.insert(unit, freshness);
    }

    /// Mark a unit as built this run
    pub fn mark_built(&mut self, unit: UnitId) {
        self.set_freshness(unit, Freshness::Old);
    }

    /// Start a new run over the same graph
    pub fn reset_run(&mut self) {
        self.run = RunState::default();
    }

    pub fn units(&self) -> &UnitArena {
        &self.state.units
    }

    pub fn graph(&self) -> &DepGraph<UnitId> {
        &self.state.graph
    }

    pub fn imports(&self) -> &ImportMap {
        &self.state.imports
    }

    pub fn state(&self) -> &UnitGraph {
        &self.state
    }

    pub fn into_state(self) -> UnitGraph {
        self.state
    }

    /// Scope tree built by this run's walk of `unit`
    pub fn scopes(&self, unit: UnitId) -> Option<&ScopeTree> {
        self.run.scopes.get(&unit)
    }

    pub fn unresolved(&self) -> &[UnresolvedReference] {
        &self.run.unresolved
    }

    /// Number of body walks performed this run
    pub fn walk_count(&self) -> usize {
        self.run.walks
    }

    pub fn lookup(&self) -> &L {
        &self.lookup
    }

    pub fn walker(&self) -> &W {
        &self.walker
    }
}
