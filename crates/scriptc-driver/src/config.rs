//! Build configuration and on-disk artifact layout

use std::fs;
use std::path::{Path, PathBuf};

use scriptc_resolve::CompilationUnit;

use crate::error::{BuildError, Result};

/// Name of the cache file inside the cache directory
pub const CACHE_FILE: &str = "build-cache.json";

/// Shared-library extension of linked modules
pub const MODULE_EXTENSION: &str = "so";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ArtifactMode {
    /// One module per entry point with every unit linked in
    #[default]
    Single,
    /// One linkable module per unit, loaded dynamically at run time
    PerUnit,
}

#[derive(Debug, Clone)]
pub struct BuildConfig {
    pub cache_dir: PathBuf,
    pub out_dir: PathBuf,
    /// Output module name; defaults to the entry name
    pub output_name: Option<String>,
    pub search_path: Vec<PathBuf>,
    pub mode: ArtifactMode,
    pub cc: String,
    pub cflags: Vec<String>,
    pub ldflags: Vec<String>,
    /// Runtime library linked into every module
    pub runtime: Option<PathBuf>,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            cache_dir: PathBuf::from(".scriptc"),
            out_dir: PathBuf::from("."),
            output_name: None,
            search_path: Vec::new(),
            mode: ArtifactMode::default(),
            cc: "cc".to_string(),
            cflags: Vec::new(),
            ldflags: Vec::new(),
            runtime: None,
        }
    }
}

impl BuildConfig {
    pub fn layout(&self) -> ArtifactLayout {
        ArtifactLayout::new(&self.cache_dir)
    }

    /// Create the cache, object and output directories
    pub fn prepare(&self) -> Result<()> {
        let layout = self.layout();
        for dir in [&self.cache_dir, &layout.objects_dir, &self.out_dir] {
            fs::create_dir_all(dir).map_err(|e| {
                BuildError::config(format!("cannot create {}: {}", dir.display(), e))
            })?;
        }
        if let Some(runtime) = &self.runtime {
            if !runtime.is_file() {
                return Err(BuildError::config(format!(
                    "runtime library {} not found",
                    runtime.display()
                )));
            }
        }
        Ok(())
    }

    /// Path of the module produced for an entry point
    pub fn output_path(&self, entry: &str) -> PathBuf {
        let name = self.output_name.as_deref().unwrap_or(entry);
        self.out_dir.join(format!("{}.{}", name, MODULE_EXTENSION))
    }
}

/// Where generated files live inside the cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    pub cache_file: PathBuf,
    pub objects_dir: PathBuf,
}

impl ArtifactLayout {
    pub fn new(cache_dir: &Path) -> Self {
        Self {
            cache_file: cache_dir.join(CACHE_FILE),
            objects_dir: cache_dir.join("objects"),
        }
    }

    fn file(&self, unit: &CompilationUnit, suffix: &str) -> PathBuf {
        self.objects_dir
            .join(format!("{}{}", unit.artifact_stem(), suffix))
    }

    pub fn header(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, ".h")
    }

    pub fn source(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, ".c")
    }

    pub fn object(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, ".o")
    }

    /// Forward declarations used to link cycle members
    pub fn partial_source(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, "_fwd.c")
    }

    pub fn partial_object(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, "_fwd.o")
    }

    /// Stand-in module linked before the real one exists
    pub fn stand_in(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, &format!("_fwd.{}", MODULE_EXTENSION))
    }

    /// Per-unit module
    pub fn artifact(&self, unit: &CompilationUnit) -> PathBuf {
        self.file(unit, &format!(".{}", MODULE_EXTENSION))
    }
}
