//! The name-lookup capability the resolver depends on

use std::collections::BTreeSet;
use std::path::Path;

use crate::unit::{DefinitionHandle, Timestamp, UnitKind};

/// Where a name is defined, as reported by a [`NameLookup`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Definition {
    pub kind: UnitKind,
    pub timestamp: Timestamp,
    pub handle: DefinitionHandle,
}

impl Definition {
    pub fn new(kind: UnitKind, timestamp: Timestamp, handle: DefinitionHandle) -> Self {
        Self {
            kind,
            timestamp,
            handle,
        }
    }

    /// A command-line snippet created at `timestamp`
    pub fn snippet(text: impl Into<String>, timestamp: Timestamp) -> Self {
        Self::new(
            UnitKind::Snippet,
            timestamp,
            DefinitionHandle::Inline { text: text.into() },
        )
    }
}

pub trait NameLookup {
    /// Find the definition `name` denotes when referenced from `context`
    fn find_definition(&self, name: &str, context: Option<&Path>) -> Option<Definition>;

    /// Every name resolvable through the active search path
    fn search_path_names(&self) -> BTreeSet<String>;

    /// Names resolvable from inside `directory` only
    fn directory_names(&self, directory: &Path) -> BTreeSet<String>;
}
