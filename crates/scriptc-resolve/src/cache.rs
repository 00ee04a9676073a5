//! Persisted build cache.
//!
//! One JSON document with two tables: a row per unit (identity, location,
//! kind, local slots, imported symbols per dependency, unresolved names) and
//! a row per entry of the dynamic-module registry. A cache that is missing,
//! unreadable, malformed or from another format version loads as empty.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{ResolveError, Result};
use crate::resolver::{ImportTarget, UnitGraph};
use crate::unit::{CompilationUnit, DefinitionHandle, KindTag, Timestamp, UnitId, UnitKind};

pub const CACHE_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyRow {
    pub name: String,
    pub overload_id: u32,
    pub symbols: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitRow {
    pub name: String,
    pub overload_id: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
    pub timestamp: Timestamp,
    pub kind: KindTag,
    #[serde(default)]
    pub local_slots: Vec<String>,
    #[serde(default)]
    pub dependencies: Vec<DependencyRow>,
    #[serde(default)]
    pub unresolved: Vec<String>,
}

impl UnitRow {
    fn from_unit(state: &UnitGraph, unit: &CompilationUnit) -> Self {
        let mut dependencies = Vec::new();
        let mut unresolved = Vec::new();

        for (target, symbols) in state.imports.get(&unit.id).into_iter().flatten() {
            match target {
                ImportTarget::Unit(id) => {
                    let Some(dependency) = state.units.get(*id) else {
                        continue;
                    };
                    dependencies.push(DependencyRow {
                        name: dependency.name.clone(),
                        overload_id: dependency.overload_id,
                        symbols: symbols.iter().cloned().collect(),
                    });
                }
                ImportTarget::Unresolved => unresolved.extend(symbols.iter().cloned()),
            }
        }

        Self {
            name: unit.name.clone(),
            overload_id: unit.overload_id,
            path: unit.source_path().map(Path::to_path_buf),
            timestamp: unit.timestamp,
            kind: unit.kind.tag(),
            local_slots: unit.local_slots.clone(),
            dependencies,
            unresolved,
        }
    }

    fn to_unit(&self) -> CompilationUnit {
        let kind = UnitKind::from_tag(self.kind, self.path.clone());
        let handle = match (&kind, kind.source_path()) {
            (_, Some(path)) => Some(DefinitionHandle::File(path.to_path_buf())),
            (kind, None) if kind.is_shared_table() => Some(DefinitionHandle::Table),
            _ => None,
        };

        CompilationUnit {
            id: UnitId(0),
            name: self.name.clone(),
            overload_id: self.overload_id,
            kind,
            timestamp: self.timestamp,
            handle,
            local_slots: self.local_slots.clone(),
        }
    }

    fn is_row_of(&self, name: &str, overload_id: u32) -> bool {
        self.name == name && self.overload_id == overload_id
    }
}

/// One dynamically loaded module symbol
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RegistryRow {
    pub name: String,
    pub overload_id: u32,
    pub symbol: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildCache {
    pub version: u32,
    #[serde(default)]
    pub units: Vec<UnitRow>,
    #[serde(default)]
    pub registry: Vec<RegistryRow>,
}

impl Default for BuildCache {
    fn default() -> Self {
        Self::new()
    }
}

impl BuildCache {
    pub fn new() -> Self {
        Self {
            version: CACHE_VERSION,
            units: Vec::new(),
            registry: Vec::new(),
        }
    }

    /// Snapshot every unit of `state`, in arena order
    pub fn from_graph(state: &UnitGraph) -> Self {
        Self {
            version: CACHE_VERSION,
            units: state
                .units
                .iter()
                .map(|unit| UnitRow::from_unit(state, unit))
                .collect(),
            registry: Vec::new(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Parse a cache document, falling back to an empty cache
    pub fn parse_or_empty(json: &str) -> Self {
        match Self::from_json(json) {
            Ok(cache) if cache.version == CACHE_VERSION => cache,
            Ok(cache) => {
                warn!(
                    found = cache.version,
                    expected = CACHE_VERSION,
                    "ignoring cache from another format version"
                );
                Self::new()
            }
            Err(e) => {
                warn!(error = %e, "ignoring malformed cache");
                Self::new()
            }
        }
    }

    /// Read the cache at `path`; anything unusable loads as empty
    pub fn load(path: &Path) -> Self {
        match fs::read_to_string(path) {
            Ok(json) => Self::parse_or_empty(&json),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!(path = %path.display(), "no build cache yet");
                Self::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "ignoring unreadable cache");
                Self::new()
            }
        }
    }

    /// Write the cache next to `path` and rename it into place
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = self.to_json()?;
        let tmp = path.with_extension("json.tmp");
        fs::write(&tmp, json).map_err(|e| ResolveError::io(&tmp, e))?;
        fs::rename(&tmp, path).map_err(|e| ResolveError::io(path, e))?;
        debug!(path = %path.display(), units = self.units.len(), "saved build cache");
        Ok(())
    }

    /// Replace the rows of `ids` with their current state, appending rows
    /// for units the cache has not seen yet.
    pub fn update_rows<I>(&mut self, state: &UnitGraph, ids: I)
    where
        I: IntoIterator<Item = UnitId>,
    {
        for id in ids {
            let Some(unit) = state.units.get(id) else {
                continue;
            };
            let row = UnitRow::from_unit(state, unit);
            match self
                .units
                .iter_mut()
                .find(|existing| existing.is_row_of(&unit.name, unit.overload_id))
            {
                Some(existing) => *existing = row,
                None => self.units.push(row),
            }
        }
    }

    /// Replace the registry rows of one unit
    pub fn update_registry(&mut self, name: &str, overload_id: u32, symbols: &[String]) {
        self.registry
            .retain(|row| !(row.name == name && row.overload_id == overload_id));
        self.registry
            .extend(symbols.iter().map(|symbol| RegistryRow {
                name: name.to_string(),
                overload_id,
                symbol: symbol.clone(),
            }));
        self.registry.sort();
    }

    /// Rebuild the unit graph. Every restored unit keeps its overload id;
    /// dependency rows naming units absent from the table are dropped.
    pub fn to_graph(&self) -> UnitGraph {
        let mut state = UnitGraph::new();
        let mut ids: BTreeMap<(&str, u32), UnitId> = BTreeMap::new();

        for row in &self.units {
            let key = (row.name.as_str(), row.overload_id);
            if ids.contains_key(&key) {
                warn!(unit = %row.name, overload = row.overload_id, "duplicate cache row");
                continue;
            }
            let id = state.units.push(row.to_unit());
            state.graph.add_node(id);
            ids.insert(key, id);
        }

        for row in &self.units {
            let Some(&from) = ids.get(&(row.name.as_str(), row.overload_id)) else {
                continue;
            };
            for dependency in &row.dependencies {
                let key = (dependency.name.as_str(), dependency.overload_id);
                let Some(&to) = ids.get(&key) else {
                    debug!(
                        unit = %row.name,
                        dependency = %dependency.name,
                        "dropping dangling dependency"
                    );
                    continue;
                };
                state.graph.add_edge(from, to);
                for symbol in &dependency.symbols {
                    state.record_import(from, ImportTarget::Unit(to), symbol);
                }
            }
            for name in &row.unresolved {
                state.record_import(from, ImportTarget::Unresolved, name);
            }
        }

        state
    }
}

/// Serialize the full persisted state
pub fn write_cache(state: &UnitGraph) -> Result<String> {
    BuildCache::from_graph(state).to_json()
}

/// Restore state from a serialized cache; malformed input yields an empty state
pub fn read_cache(json: &str) -> UnitGraph {
    BuildCache::parse_or_empty(json).to_graph()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::unit::UnitKind;
    use proptest::prelude::*;
    use tempfile::TempDir;

    fn script(state: &mut UnitGraph, name: &str, dir: &str, timestamp: Timestamp) -> UnitId {
        let path = PathBuf::from(format!("{}/{}.m", dir, name));
        let id = state.units.insert(
            name,
            UnitKind::Script { path: path.clone() },
            timestamp,
            Some(DefinitionHandle::File(path)),
        );
        state.graph.add_node(id);
        id
    }

    fn sample_state() -> UnitGraph {
        let mut state = UnitGraph::new();
        let foo = script(&mut state, "foo", "/src", 10);
        let bar = script(&mut state, "bar", "/src", 20);
        let bar_again = script(&mut state, "bar", "/lib", 30);
        let globals = state
            .units
            .insert("<globals>", UnitKind::Globals, 0, Some(DefinitionHandle::Table));
        state.graph.add_node(globals);

        state.units.get_mut(foo).unwrap().add_local_slot("foo");
        state.units.get_mut(foo).unwrap().add_local_slot("helper");
        state.units.get_mut(globals).unwrap().add_local_slot("counter");

        state.record_import(foo, ImportTarget::Unit(bar), "bar");
        state.record_import(foo, ImportTarget::Unit(globals), "counter");
        state.record_import(foo, ImportTarget::Unresolved, "mystery");
        state.record_import(bar, ImportTarget::Unit(foo), "foo");
        state.record_import(bar, ImportTarget::Unit(foo), "helper");
        state.record_import(bar_again, ImportTarget::Unit(bar), "bar");
        state
    }

    #[test]
    fn test_round_trip() {
        let state = sample_state();
        let json = write_cache(&state).unwrap();
        let restored = read_cache(&json);

        assert_eq!(restored, state);
        assert_eq!(
            restored.units.find("bar", 1).map(|id| restored.units[id].timestamp),
            Some(30)
        );
    }

    const NAMES: [&str; 4] = ["foo", "bar", "a_b", "<globals>"];
    const SYMBOLS: [&str; 3] = ["foo", "helper", "counter"];

    /// A kind and the handle a unit of that kind is restored with
    fn kind_for(choice: u8, name: &str, index: usize) -> (UnitKind, Option<DefinitionHandle>) {
        let path = PathBuf::from(format!("/src{}/{}.m", index, name));
        let handle = Some(DefinitionHandle::File(path.clone()));
        match choice % 7 {
            0 => (UnitKind::Script { path }, handle),
            1 => (UnitKind::Precompiled { path }, handle),
            2 => (UnitKind::ClassMeta { path }, handle),
            3 => (UnitKind::Snippet, None),
            4 => (UnitKind::Globals, Some(DefinitionHandle::Table)),
            5 => (UnitKind::Builtins, Some(DefinitionHandle::Table)),
            _ => (UnitKind::Unknown, None),
        }
    }

    fn arb_state() -> impl Strategy<Value = UnitGraph> {
        (1usize..8)
            .prop_flat_map(|count| {
                let unit = (
                    0..NAMES.len(),
                    any::<u8>(),
                    0u64..1_000_000,
                    prop::collection::vec(0..SYMBOLS.len(), 0..3),
                );
                let import = (0..count, prop::option::of(0..count), 0..SYMBOLS.len());
                (
                    prop::collection::vec(unit, count),
                    prop::collection::vec(import, 0..16),
                )
            })
            .prop_map(|(units, imports)| {
                let mut state = UnitGraph::new();
                for (index, (name, choice, timestamp, slots)) in units.into_iter().enumerate() {
                    let (kind, handle) = kind_for(choice, NAMES[name], index);
                    let id = state.units.insert(NAMES[name], kind, timestamp, handle);
                    state.graph.add_node(id);
                    if let Some(unit) = state.units.get_mut(id) {
                        for slot in slots {
                            unit.add_local_slot(SYMBOLS[slot]);
                        }
                    }
                }
                for (from, to, symbol) in imports {
                    let target = to.map_or(ImportTarget::Unresolved, |to| {
                        ImportTarget::Unit(UnitId(to as u32))
                    });
                    state.record_import(UnitId(from as u32), target, SYMBOLS[symbol]);
                }
                state
            })
    }

    proptest! {
        #[test]
        fn test_round_trip_any_state(state in arb_state()) {
            let json = write_cache(&state).unwrap();
            prop_assert_eq!(read_cache(&json), state);
        }
    }

    #[test]
    fn test_row_layout() {
        let state = sample_state();
        let cache = BuildCache::from_graph(&state);
        let foo = &cache.units[0];

        assert_eq!(foo.kind, KindTag::Script);
        assert_eq!(foo.path, Some(PathBuf::from("/src/foo.m")));
        assert_eq!(foo.local_slots, vec!["foo", "helper"]);
        assert_eq!(foo.unresolved, vec!["mystery"]);
        assert_eq!(foo.dependencies.len(), 2);

        let json = cache.to_json().unwrap();
        assert!(json.contains("\"version\": 1"));
        assert!(json.contains("\"kind\": \"globals\""));
    }

    #[test]
    fn test_malformed_cache_is_empty() {
        assert_eq!(read_cache("not json"), UnitGraph::new());
        assert_eq!(read_cache("{\"units\": 3}"), UnitGraph::new());
        assert_eq!(
            read_cache("{\"version\": 99, \"units\": [], \"registry\": []}"),
            UnitGraph::new()
        );
    }

    #[test]
    fn test_dangling_dependency_is_dropped() {
        let json = r#"{
            "version": 1,
            "units": [{
                "name": "foo",
                "overload_id": 0,
                "path": "/src/foo.m",
                "timestamp": 5,
                "kind": "script",
                "dependencies": [{"name": "gone", "overload_id": 0, "symbols": ["gone"]}]
            }]
        }"#;
        let state = read_cache(json);

        assert_eq!(state.units.len(), 1);
        assert_eq!(state.graph.edge_count(), 0);
        assert!(state.imports.is_empty());
        assert_eq!(
            state.units[UnitId(0)].handle,
            Some(DefinitionHandle::File(PathBuf::from("/src/foo.m")))
        );
    }

    #[test]
    fn test_save_and_load() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("build-cache.json");
        assert_eq!(BuildCache::load(&path), BuildCache::new());

        let mut cache = BuildCache::from_graph(&sample_state());
        cache.update_registry("foo", 0, &["foo".to_string(), "helper".to_string()]);
        cache.save(&path).unwrap();

        assert!(!path.with_extension("json.tmp").exists());
        assert_eq!(BuildCache::load(&path), cache);
    }

    #[test]
    fn test_update_rows_replaces_and_appends() {
        let mut state = sample_state();
        let mut cache = BuildCache::from_graph(&state);
        cache.units.truncate(1);

        let foo = state.units.find("foo", 0).unwrap();
        let bar = state.units.find("bar", 0).unwrap();
        state.units.get_mut(foo).unwrap().timestamp = 99;

        cache.update_rows(&state, [foo, bar]);
        assert_eq!(cache.units.len(), 2);
        assert_eq!(cache.units[0].timestamp, 99);
        assert_eq!(cache.units[1].name, "bar");
    }

    #[test]
    fn test_update_registry_replaces_unit_rows() {
        let mut cache = BuildCache::new();
        cache.update_registry("foo", 0, &["a".to_string(), "b".to_string()]);
        cache.update_registry("bar", 0, &["bar".to_string()]);
        cache.update_registry("foo", 0, &["c".to_string()]);

        let symbols: Vec<_> = cache.registry.iter().map(|r| r.symbol.as_str()).collect();
        assert_eq!(symbols, vec!["bar", "c"]);
    }
}
