//! File-system name lookup over an ordered list of directories

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use tracing::debug;

use crate::lookup::{Definition, NameLookup};
use crate::unit::{DefinitionHandle, Timestamp, UnitKind};

/// Extensions of compiled extension modules, preferred over scripts
pub const PRECOMPILED_EXTENSIONS: &[&str] = &["mexa64", "mexmaci64", "mexmaca64", "mexw64"];

/// Extension of script files
pub const SCRIPT_EXTENSION: &str = "m";

/// Names the runtime provides without any file behind them
const DEFAULT_BUILTINS: &[&str] = &[
    "abs", "all", "any", "cat", "ceil", "cell", "cellfun", "char", "class", "disp", "double",
    "eps", "error", "exp", "false", "feval", "floor", "fprintf", "horzcat", "Inf", "isa",
    "iscell", "ischar", "isempty", "isfield", "isnumeric", "isstruct", "length", "log",
    "max", "min", "mod", "NaN", "nargin", "nargout", "num2str", "numel", "ones", "pi",
    "rand", "rem", "repmat", "reshape", "round", "size", "sort", "sprintf", "sqrt",
    "strcat", "strcmp", "struct", "sum", "true", "varargin", "varargout", "vertcat",
    "warning", "zeros",
];

/// Modification time of `path` in milliseconds, 0 when unavailable
pub fn file_timestamp(path: &Path) -> Timestamp {
    fs::metadata(path)
        .and_then(|meta| meta.modified())
        .ok()
        .and_then(|time| time.duration_since(UNIX_EPOCH).ok())
        .map_or(0, |elapsed| elapsed.as_millis() as Timestamp)
}

/// Ordered search directories plus the builtin-name table.
///
/// A name referenced from directory `ctx` resolves to, first match wins:
/// `ctx/name.<mex>`, `ctx/name.m`, `ctx/private/name.m`, then per search
/// directory `@name/name.m`, `name.<mex>`, `name.m`, then the builtins.
#[derive(Debug, Clone)]
pub struct SearchPath {
    dirs: Vec<PathBuf>,
    builtins: BTreeSet<String>,
}

impl SearchPath {
    pub fn new(dirs: Vec<PathBuf>) -> Self {
        Self {
            dirs,
            builtins: DEFAULT_BUILTINS.iter().map(|name| name.to_string()).collect(),
        }
    }

    pub fn with_builtins<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.builtins.extend(names.into_iter().map(Into::into));
        self
    }

    pub fn dirs(&self) -> &[PathBuf] {
        &self.dirs
    }

    pub fn is_builtin(&self, name: &str) -> bool {
        self.builtins.contains(name)
    }

    /// Precompiled module or script named `name` directly inside `dir`
    fn find_in_dir(dir: &Path, name: &str) -> Option<Definition> {
        for ext in PRECOMPILED_EXTENSIONS {
            let candidate = dir.join(format!("{}.{}", name, ext));
            if candidate.is_file() {
                return Some(file_definition(UnitKind::Precompiled {
                    path: candidate,
                }));
            }
        }

        let script = dir.join(format!("{}.{}", name, SCRIPT_EXTENSION));
        if script.is_file() {
            return Some(file_definition(UnitKind::Script { path: script }));
        }
        None
    }

    /// Resolvable names found directly inside `dir`
    fn scan_dir(dir: &Path, names: &mut BTreeSet<String>) {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(dir = %dir.display(), error = %e, "skipping unreadable directory");
                return;
            }
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();

            if path.is_dir() {
                if let Some(class) = file_name.strip_prefix('@') {
                    names.insert(class.to_string());
                }
                continue;
            }

            let (Some(stem), Some(ext)) = (path.file_stem(), path.extension()) else {
                continue;
            };
            let ext = ext.to_string_lossy();
            if ext == SCRIPT_EXTENSION || PRECOMPILED_EXTENSIONS.contains(&ext.as_ref()) {
                names.insert(stem.to_string_lossy().into_owned());
            }
        }
    }
}

fn file_definition(kind: UnitKind) -> Definition {
    let path = kind.source_path().map(Path::to_path_buf).unwrap_or_default();
    Definition::new(kind, file_timestamp(&path), DefinitionHandle::File(path))
}

impl NameLookup for SearchPath {
    fn find_definition(&self, name: &str, context: Option<&Path>) -> Option<Definition> {
        if let Some(ctx) = context {
            if let Some(definition) = Self::find_in_dir(ctx, name) {
                return Some(definition);
            }
            let private = ctx.join("private").join(format!("{}.{}", name, SCRIPT_EXTENSION));
            if private.is_file() {
                return Some(file_definition(UnitKind::Script { path: private }));
            }
        }

        for dir in &self.dirs {
            let class = dir
                .join(format!("@{}", name))
                .join(format!("{}.{}", name, SCRIPT_EXTENSION));
            if class.is_file() {
                return Some(file_definition(UnitKind::ClassMeta { path: class }));
            }
            if let Some(definition) = Self::find_in_dir(dir, name) {
                return Some(definition);
            }
        }

        if self.is_builtin(name) {
            return Some(Definition::new(UnitKind::Builtins, 0, DefinitionHandle::Table));
        }

        None
    }

    fn search_path_names(&self) -> BTreeSet<String> {
        let mut names = self.builtins.clone();
        for dir in &self.dirs {
            Self::scan_dir(dir, &mut names);
        }
        names
    }

    fn directory_names(&self, directory: &Path) -> BTreeSet<String> {
        let mut names = BTreeSet::new();
        Self::scan_dir(directory, &mut names);
        Self::scan_dir(&directory.join("private"), &mut names);
        names
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn touch(path: &Path) {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).unwrap();
        }
        fs::write(path, "function y = f(x)\ny = x;\n").unwrap();
    }

    #[test]
    fn test_search_order() {
        let tmp = TempDir::new().unwrap();
        let first = tmp.path().join("first");
        let second = tmp.path().join("second");
        touch(&first.join("solve.m"));
        touch(&second.join("solve.m"));
        touch(&second.join("helper.m"));

        let path = SearchPath::new(vec![first.clone(), second.clone()]);
        let solve = path.find_definition("solve", None).unwrap();
        assert_eq!(
            solve.kind,
            UnitKind::Script {
                path: first.join("solve.m")
            }
        );
        assert!(solve.timestamp > 0);

        let helper = path.find_definition("helper", None).unwrap();
        assert_eq!(helper.kind.source_path(), Some(second.join("helper.m").as_path()));
        assert!(path.find_definition("missing", None).is_none());
    }

    #[test]
    fn test_precompiled_preferred_over_script() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("fast.m"));
        touch(&tmp.path().join("fast.mexa64"));

        let path = SearchPath::new(vec![tmp.path().to_path_buf()]);
        let fast = path.find_definition("fast", None).unwrap();
        assert_eq!(
            fast.kind,
            UnitKind::Precompiled {
                path: tmp.path().join("fast.mexa64")
            }
        );
    }

    #[test]
    fn test_context_directory_and_private() {
        let tmp = TempDir::new().unwrap();
        let lib = tmp.path().join("lib");
        let app = tmp.path().join("app");
        touch(&lib.join("util.m"));
        touch(&app.join("util.m"));
        touch(&app.join("private").join("secret.m"));

        let path = SearchPath::new(vec![lib.clone()]);
        let from_app = path.find_definition("util", Some(&app)).unwrap();
        assert_eq!(from_app.kind.source_path(), Some(app.join("util.m").as_path()));

        let secret = path.find_definition("secret", Some(&app)).unwrap();
        assert_eq!(
            secret.kind.source_path(),
            Some(app.join("private").join("secret.m").as_path())
        );
        assert!(path.find_definition("secret", None).is_none());
    }

    #[test]
    fn test_class_metadata() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("@Point").join("Point.m"));

        let path = SearchPath::new(vec![tmp.path().to_path_buf()]);
        let point = path.find_definition("Point", None).unwrap();
        assert_eq!(point.kind.tag(), crate::unit::KindTag::ClassMeta);
        assert!(path.search_path_names().contains("Point"));
    }

    #[test]
    fn test_builtins_and_names() {
        let tmp = TempDir::new().unwrap();
        touch(&tmp.path().join("alpha.m"));
        touch(&tmp.path().join("private").join("beta.m"));
        fs::write(tmp.path().join("notes.txt"), "x").unwrap();

        let path = SearchPath::new(vec![tmp.path().to_path_buf()]).with_builtins(["mybuiltin"]);
        let zeros = path.find_definition("zeros", None).unwrap();
        assert_eq!(zeros.kind, UnitKind::Builtins);
        assert_eq!(zeros.handle, DefinitionHandle::Table);

        let names = path.search_path_names();
        assert!(names.contains("alpha"));
        assert!(names.contains("mybuiltin"));
        assert!(!names.contains("beta"));
        assert!(!names.contains("notes"));

        let local = path.directory_names(tmp.path());
        assert!(local.contains("alpha"));
        assert!(local.contains("beta"));
    }
}
