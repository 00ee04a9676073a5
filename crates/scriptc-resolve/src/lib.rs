//! Semantic resolution for scriptc.
//!
//! Discovers every unit an entry point transitively references, keeps the
//! dependency graph current across runs and tracks which units need to be
//! rebuilt. The resolver talks to the outside world through two traits:
//! [`AstWalker`] reports the declarations and references of a unit body, and
//! [`NameLookup`] says where a name is defined. [`SourceWalker`] and
//! [`SearchPath`] implement them over the file system.

pub mod cache;
pub mod error;
pub mod lookup;
pub mod resolver;
pub mod scope;
pub mod search_path;
pub mod source_walker;
pub mod unit;
pub mod walker;

pub use cache::{read_cache, write_cache, BuildCache, DependencyRow, RegistryRow, UnitRow};
pub use error::{ResolveError, Result};
pub use lookup::{Definition, NameLookup};
pub use resolver::{
    ImportMap, ImportTarget, Resolver, UnitGraph, UnresolvedReference, BUILTINS_UNIT,
    GLOBALS_UNIT,
};
pub use scope::{Binding, Bucket, ScopeId, ScopeKind, ScopeTree};
pub use search_path::{file_timestamp, SearchPath};
pub use source_walker::SourceWalker;
pub use unit::{
    CompilationUnit, DefinitionHandle, Freshness, KindTag, Timestamp, UnitArena, UnitId, UnitKind,
};
pub use walker::{AstWalker, Declaration, Visitor};
