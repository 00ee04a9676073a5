//! Compilation units and the arena that owns them

use std::collections::BTreeMap;
use std::fmt::{self, Write};
use std::ops::Index;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Stable identity of a unit inside a [`UnitArena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(pub u32);

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Modification time in milliseconds since the Unix epoch
pub type Timestamp = u64;

/// What a unit is, with the payload each kind needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitKind {
    /// A `.m` script or function file
    Script { path: PathBuf },
    /// A compiled extension module, linked as-is
    Precompiled { path: PathBuf },
    /// The shared container of global variables
    Globals,
    /// The shared table of runtime builtins
    Builtins,
    /// Code passed on the command line
    Snippet,
    /// Class or package metadata file
    ClassMeta { path: PathBuf },
    Unknown,
}

/// Field-less discriminant of [`UnitKind`], used in the persisted cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KindTag {
    Script,
    Precompiled,
    Globals,
    Builtins,
    Snippet,
    ClassMeta,
    Unknown,
}

impl UnitKind {
    pub fn tag(&self) -> KindTag {
        match self {
            UnitKind::Script { .. } => KindTag::Script,
            UnitKind::Precompiled { .. } => KindTag::Precompiled,
            UnitKind::Globals => KindTag::Globals,
            UnitKind::Builtins => KindTag::Builtins,
            UnitKind::Snippet => KindTag::Snippet,
            UnitKind::ClassMeta { .. } => KindTag::ClassMeta,
            UnitKind::Unknown => KindTag::Unknown,
        }
    }

    /// Rebuild a kind from its tag and the persisted path
    pub fn from_tag(tag: KindTag, path: Option<PathBuf>) -> Self {
        match (tag, path) {
            (KindTag::Script, Some(path)) => UnitKind::Script { path },
            (KindTag::Precompiled, Some(path)) => UnitKind::Precompiled { path },
            (KindTag::ClassMeta, Some(path)) => UnitKind::ClassMeta { path },
            (KindTag::Globals, _) => UnitKind::Globals,
            (KindTag::Builtins, _) => UnitKind::Builtins,
            (KindTag::Snippet, _) => UnitKind::Snippet,
            _ => UnitKind::Unknown,
        }
    }

    pub fn source_path(&self) -> Option<&Path> {
        match self {
            UnitKind::Script { path }
            | UnitKind::Precompiled { path }
            | UnitKind::ClassMeta { path } => Some(path),
            _ => None,
        }
    }

    /// Kinds whose cached copy is checked against the file's timestamp
    pub fn is_rechecked_on_disk(&self) -> bool {
        matches!(
            self,
            UnitKind::Script { .. } | UnitKind::Precompiled { .. } | UnitKind::ClassMeta { .. }
        )
    }

    /// Kinds identified by creation timestamp rather than by path
    pub fn is_ephemeral(&self) -> bool {
        matches!(self, UnitKind::Snippet | UnitKind::Unknown)
    }

    /// Kinds with a single shared instance that accumulates slots
    pub fn is_shared_table(&self) -> bool {
        matches!(self, UnitKind::Globals | UnitKind::Builtins)
    }

    /// Kinds with a body the walker can visit
    pub fn has_body(&self) -> bool {
        matches!(
            self,
            UnitKind::Script { .. } | UnitKind::Snippet | UnitKind::ClassMeta { .. }
        )
    }
}

impl fmt::Display for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            KindTag::Script => "script",
            KindTag::Precompiled => "precompiled",
            KindTag::Globals => "globals",
            KindTag::Builtins => "builtins",
            KindTag::Snippet => "snippet",
            KindTag::ClassMeta => "class-meta",
            KindTag::Unknown => "unknown",
        };
        f.write_str(name)
    }
}

/// Host-side descriptor the walker and code generator use to find a body.
///
/// Never persisted. Units loaded from the cache get a `File` handle back from
/// their path; snippet text is gone after the run that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DefinitionHandle {
    File(PathBuf),
    Inline { text: String },
    Table,
}

/// One translation unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilationUnit {
    pub id: UnitId,
    pub name: String,
    pub overload_id: u32,
    pub kind: UnitKind,
    pub timestamp: Timestamp,
    pub handle: Option<DefinitionHandle>,
    /// Exported sub-symbols in discovery order
    pub local_slots: Vec<String>,
}

impl CompilationUnit {
    pub fn source_path(&self) -> Option<&Path> {
        self.kind.source_path()
    }

    /// Directory the unit's file lives in, used as lookup context
    pub fn directory(&self) -> Option<&Path> {
        self.source_path().and_then(Path::parent)
    }

    /// File-name-safe identifier, unique per `(name, overload_id)`.
    ///
    /// ASCII alphanumerics are kept, '_' is doubled and any other character
    /// becomes `_<hex code point>_`, so distinct names never share a stem.
    pub fn artifact_stem(&self) -> String {
        let mut stem = String::with_capacity(self.name.len() + 4);
        for c in self.name.chars() {
            match c {
                c if c.is_ascii_alphanumeric() => stem.push(c),
                '_' => stem.push_str("__"),
                c => {
                    let _ = write!(stem, "_{:x}_", c as u32);
                }
            }
        }
        let _ = write!(stem, "_{}", self.overload_id);
        stem
    }

    /// Append a local slot. Returns `true` if it was not already present.
    pub fn add_local_slot(&mut self, name: &str) -> bool {
        if self.has_local_slot(name) {
            return false;
        }
        self.local_slots.push(name.to_string());
        true
    }

    pub fn has_local_slot(&self, name: &str) -> bool {
        self.local_slots.iter().any(|slot| slot == name)
    }
}

impl fmt::Display for CompilationUnit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.overload_id == 0 {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{}~{}", self.name, self.overload_id)
        }
    }
}

/// Per-run state of a unit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Freshness {
    /// Discovered for the first time this run
    New,
    /// Its file is newer than the cached copy
    Updated,
    /// Unchanged itself, but one of its imports now resolves elsewhere
    DependencyUpdated,
    Old,
}

impl Freshness {
    pub fn needs_build(self) -> bool {
        self != Freshness::Old
    }
}

/// Owner of every unit ever discovered, addressed by [`UnitId`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UnitArena {
    units: Vec<CompilationUnit>,
    by_name: BTreeMap<String, Vec<UnitId>>,
}

impl UnitArena {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a unit, allocating the next overload id for its name
    pub fn insert(
        &mut self,
        name: &str,
        kind: UnitKind,
        timestamp: Timestamp,
        handle: Option<DefinitionHandle>,
    ) -> UnitId {
        let overload_id = self
            .overloads(name)
            .map(|id| self[id].overload_id + 1)
            .max()
            .unwrap_or(0);

        self.push(CompilationUnit {
            id: UnitId(0),
            name: name.to_string(),
            overload_id,
            kind,
            timestamp,
            handle,
            local_slots: Vec::new(),
        })
    }

    /// Add a unit restored from the cache, keeping its overload id
    pub fn push(&mut self, mut unit: CompilationUnit) -> UnitId {
        let id = UnitId(self.units.len() as u32);
        unit.id = id;
        self.by_name.entry(unit.name.clone()).or_default().push(id);
        self.units.push(unit);
        id
    }

    /// All units sharing `name`, in creation order
    pub fn overloads<'a>(&'a self, name: &str) -> impl Iterator<Item = UnitId> + 'a {
        self.by_name.get(name).into_iter().flatten().copied()
    }

    /// The existing unit a definition of `name` denotes, if any.
    ///
    /// On-disk kinds match on kind and path, ephemeral kinds on kind and
    /// timestamp, shared tables on kind alone.
    pub fn find_match(&self, name: &str, kind: &UnitKind, timestamp: Timestamp) -> Option<UnitId> {
        self.overloads(name).find(|&id| {
            let unit = &self[id];
            if unit.kind.tag() != kind.tag() {
                return false;
            }
            if kind.is_shared_table() {
                true
            } else if kind.is_ephemeral() {
                unit.timestamp == timestamp
            } else {
                unit.source_path() == kind.source_path()
            }
        })
    }

    pub fn find(&self, name: &str, overload_id: u32) -> Option<UnitId> {
        self.overloads(name)
            .find(|&id| self[id].overload_id == overload_id)
    }

    pub fn get(&self, id: UnitId) -> Option<&CompilationUnit> {
        self.units.get(id.0 as usize)
    }

    pub fn get_mut(&mut self, id: UnitId) -> Option<&mut CompilationUnit> {
        self.units.get_mut(id.0 as usize)
    }

    pub fn iter(&self) -> impl Iterator<Item = &CompilationUnit> {
        self.units.iter()
    }

    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }
}

impl Index<UnitId> for UnitArena {
    type Output = CompilationUnit;

    fn index(&self, id: UnitId) -> &CompilationUnit {
        &self.units[id.0 as usize]
    }
}
