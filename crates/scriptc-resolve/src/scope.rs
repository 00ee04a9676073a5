//! Per-unit scope tree.
//!
//! Each unit body is one tree: a root `Unit` scope, one `Function` scope per
//! function or nested function, and one `Closure` scope per anonymous
//! function. Every scope owns four symbol buckets. Lookup checks the current
//! scope, then walks the parent chain; a hit in an ancestor is copied into the
//! current scope's inherited bucket, which is how closure captures are
//! recorded. A top-level function does not see the variables of its file's
//! script body.

use std::collections::{BTreeMap, BTreeSet};

/// Index of a scope inside its [`ScopeTree`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ScopeId(pub usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ScopeKind {
    /// Root scope holding the unit's script body
    Unit,
    Function,
    /// Anonymous function
    Closure,
}

/// The four symbol kinds a scope holds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Bucket {
    /// Variables assigned or declared in this scope
    Ordinary,
    /// Bindings captured from an enclosing scope
    Inherited,
    Persistent,
    NestedFunction,
}

/// Result of looking a name up from some scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Binding {
    /// Bound in the scope itself
    Local,
    /// Bound in an ancestor and now recorded as inherited
    Captured { from: ScopeId },
    /// Not bound anywhere in the unit; resolve it externally
    Unbound,
}

#[derive(Debug, Clone)]
pub struct Scope {
    pub kind: ScopeKind,
    /// Function name, absent for the root and closures
    pub name: Option<String>,
    pub parent: Option<ScopeId>,
    pub children: Vec<ScopeId>,
    ordinary: BTreeSet<String>,
    inherited: BTreeMap<String, ScopeId>,
    persistent: BTreeSet<String>,
    nested_functions: BTreeSet<String>,
}

impl Scope {
    fn new(kind: ScopeKind, name: Option<String>, parent: Option<ScopeId>) -> Self {
        Self {
            kind,
            name,
            parent,
            children: Vec::new(),
            ordinary: BTreeSet::new(),
            inherited: BTreeMap::new(),
            persistent: BTreeSet::new(),
            nested_functions: BTreeSet::new(),
        }
    }

    /// Whether `name` is bound by this scope itself (not inherited)
    pub fn owns(&self, name: &str) -> bool {
        self.ordinary.contains(name)
            || self.persistent.contains(name)
            || self.nested_functions.contains(name)
    }

    pub fn contains(&self, bucket: Bucket, name: &str) -> bool {
        match bucket {
            Bucket::Ordinary => self.ordinary.contains(name),
            Bucket::Inherited => self.inherited.contains_key(name),
            Bucket::Persistent => self.persistent.contains(name),
            Bucket::NestedFunction => self.nested_functions.contains(name),
        }
    }

    /// Scope an inherited binding was captured from
    pub fn inherited_from(&self, name: &str) -> Option<ScopeId> {
        self.inherited.get(name).copied()
    }
}

/// Scope tree of one unit
#[derive(Debug, Clone)]
pub struct ScopeTree {
    scopes: Vec<Scope>,
}

impl ScopeTree {
    pub fn new() -> Self {
        Self {
            scopes: vec![Scope::new(ScopeKind::Unit, None, None)],
        }
    }

    pub fn root(&self) -> ScopeId {
        ScopeId(0)
    }

    /// Open a child scope of `parent`
    pub fn open(&mut self, parent: ScopeId, kind: ScopeKind, name: Option<&str>) -> ScopeId {
        let id = ScopeId(self.scopes.len());
        self.scopes
            .push(Scope::new(kind, name.map(str::to_string), Some(parent)));
        self.scopes[parent.0].children.push(id);
        id
    }

    /// Bind `name` in one of the scope's owned buckets
    pub fn declare(&mut self, scope: ScopeId, bucket: Bucket, name: &str) {
        let scope = &mut self.scopes[scope.0];
        match bucket {
            Bucket::Ordinary => {
                scope.ordinary.insert(name.to_string());
            }
            Bucket::Persistent => {
                scope.persistent.insert(name.to_string());
            }
            Bucket::NestedFunction => {
                scope.nested_functions.insert(name.to_string());
            }
            Bucket::Inherited => {
                let from = scope.parent.unwrap_or(ScopeId(0));
                scope.inherited.entry(name.to_string()).or_insert(from);
            }
        }
    }

    /// Look `name` up from `scope`, recording a capture on an ancestor hit
    pub fn lookup(&mut self, scope: ScopeId, name: &str) -> Binding {
        let current = &self.scopes[scope.0];
        if current.owns(name) || current.inherited.contains_key(name) {
            return Binding::Local;
        }

        let mut child = scope;
        while let Some(parent) = self.scopes[child.0].parent {
            // Top-level functions are closed over the file's script body
            if self.scopes[child.0].kind == ScopeKind::Function
                && self.scopes[parent.0].kind == ScopeKind::Unit
            {
                break;
            }
            if self.scopes[parent.0].owns(name) {
                self.scopes[scope.0]
                    .inherited
                    .insert(name.to_string(), parent);
                return Binding::Captured { from: parent };
            }
            child = parent;
        }

        Binding::Unbound
    }

    /// Scope declaring `name` as a nested function, searching `scope` and
    /// its ancestors
    pub fn find_nested_function(&self, scope: ScopeId, name: &str) -> Option<ScopeId> {
        let mut current = Some(scope);
        while let Some(id) = current {
            let scope = &self.scopes[id.0];
            if scope.nested_functions.contains(name) {
                return Some(id);
            }
            current = scope.parent;
        }
        None
    }

    pub fn get(&self, id: ScopeId) -> Option<&Scope> {
        self.scopes.get(id.0)
    }

    pub fn len(&self) -> usize {
        self.scopes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.scopes.is_empty()
    }
}

impl Default for ScopeTree {
    fn default() -> Self {
        Self::new()
    }
}
