//! Native compiler and linker invocation

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::debug;

use crate::config::BuildConfig;
use crate::error::{BuildError, Result};

#[derive(Debug, Clone, Copy)]
pub struct CompileFlags<'a> {
    pub output: &'a Path,
    pub include_dirs: &'a [PathBuf],
}

#[derive(Debug, Clone, Copy)]
pub struct LinkFlags<'a> {
    pub output: &'a Path,
    /// Shared libraries and archives the module links against
    pub libraries: &'a [PathBuf],
}

/// Turns generated sources into objects and objects into loadable modules.
pub trait Toolchain {
    fn compile(&mut self, source: &Path, flags: &CompileFlags<'_>) -> Result<PathBuf>;
    fn link(&mut self, objects: &[PathBuf], flags: &LinkFlags<'_>) -> Result<PathBuf>;
}

/// Toolchain driving a `cc`-compatible compiler driver
#[derive(Debug, Clone)]
pub struct CcToolchain {
    cc: String,
    cflags: Vec<String>,
    ldflags: Vec<String>,
}

impl CcToolchain {
    pub fn new(cc: impl Into<String>) -> Self {
        Self {
            cc: cc.into(),
            cflags: Vec::new(),
            ldflags: Vec::new(),
        }
    }

    pub fn from_config(config: &BuildConfig) -> Self {
        Self {
            cc: config.cc.clone(),
            cflags: config.cflags.clone(),
            ldflags: config.ldflags.clone(),
        }
    }

    fn run(&self, mut cmd: Command, subject: &Path) -> Result<()> {
        debug!(command = ?cmd, "running toolchain");
        let output = cmd.output().map_err(|source| BuildError::Spawn {
            tool: self.cc.clone(),
            source,
        })?;

        if !output.status.success() {
            return Err(BuildError::Toolchain {
                tool: self.cc.clone(),
                path: subject.to_path_buf(),
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(())
    }
}

impl Toolchain for CcToolchain {
    fn compile(&mut self, source: &Path, flags: &CompileFlags<'_>) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.cc);
        cmd.args(["-c", "-fPIC"]).args(&self.cflags);
        for dir in flags.include_dirs {
            cmd.arg("-I").arg(dir);
        }
        cmd.arg("-o").arg(flags.output).arg(source);

        self.run(cmd, source)?;
        Ok(flags.output.to_path_buf())
    }

    fn link(&mut self, objects: &[PathBuf], flags: &LinkFlags<'_>) -> Result<PathBuf> {
        let mut cmd = Command::new(&self.cc);
        cmd.arg("-shared").arg("-o").arg(flags.output);

        // Runtime symbols are resolved by the host process at load time
        if cfg!(target_os = "macos") {
            cmd.args(["-undefined", "dynamic_lookup"]);
        }

        cmd.args(objects).args(flags.libraries).args(&self.ldflags);

        self.run(cmd, flags.output)?;
        Ok(flags.output.to_path_buf())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_compiler_is_a_spawn_error() {
        let tmp = TempDir::new().unwrap();
        let mut toolchain = CcToolchain::new("scriptc-no-such-compiler");
        let output = tmp.path().join("x.o");
        let result = toolchain.compile(
            &tmp.path().join("x.c"),
            &CompileFlags {
                output: &output,
                include_dirs: &[],
            },
        );
        assert!(matches!(result, Err(BuildError::Spawn { .. })));
    }

    #[cfg(unix)]
    #[test]
    fn test_failing_compiler_reports_status() {
        let tmp = TempDir::new().unwrap();
        let mut toolchain = CcToolchain::new("false");
        let output = tmp.path().join("x.so");
        let result = toolchain.link(
            &[tmp.path().join("x.o")],
            &LinkFlags {
                output: &output,
                libraries: &[],
            },
        );
        match result {
            Err(BuildError::Toolchain { tool, path, .. }) => {
                assert_eq!(tool, "false");
                assert_eq!(path, output);
            }
            other => panic!("expected toolchain error, got {:?}", other),
        }
    }
}
