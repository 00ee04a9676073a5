//! Code generation interface and the C stub generator

use std::collections::BTreeSet;
use std::fmt::Write;

use scriptc_resolve::{CompilationUnit, UnitKind};

use crate::error::{BuildError, Result};

/// Everything a generator needs to translate one unit
#[derive(Debug)]
pub struct GenerateRequest<'a> {
    pub unit: &'a CompilationUnit,
    /// Units this one imports from, with the imported symbols
    pub dependencies: Vec<(&'a CompilationUnit, &'a BTreeSet<String>)>,
    /// Names that resolved to nothing; generated code defers them to run time
    pub unresolved: Vec<&'a str>,
    /// Whether the unit is a member of a dependency cycle
    pub cyclic: bool,
}

/// Output of one generation step
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratedSource {
    pub header: String,
    pub source: String,
    /// Forward declarations for linking cycle members; only for cyclic units
    pub partial: Option<String>,
}

pub trait CodeGenerator {
    fn generate(&mut self, request: &GenerateRequest<'_>) -> Result<GeneratedSource>;
}

/// Symbols a unit exports: its local slots, or its own name when it has none
pub fn exports(unit: &CompilationUnit) -> Vec<String> {
    if unit.local_slots.is_empty() {
        vec![unit.name.clone()]
    } else {
        unit.local_slots.clone()
    }
}

/// C identifier of an exported symbol
pub fn symbol_name(unit: &CompilationUnit, slot: &str) -> String {
    let slot: String = slot
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect();
    format!("sc_{}_{}", unit.artifact_stem(), slot)
}

fn guard_name(unit: &CompilationUnit) -> String {
    format!("SC_{}_H", unit.artifact_stem())
}

/// Emits C stubs that mirror the call structure of each unit.
///
/// Every exported slot becomes a function; the first one calls every symbol
/// imported from a translated dependency, so the linker sees the same
/// dependency edges the resolver found. Globals become data symbols.
#[derive(Debug, Default)]
pub struct StubGenerator;

impl StubGenerator {
    pub fn new() -> Self {
        Self
    }

    fn header(unit: &CompilationUnit) -> String {
        let guard = guard_name(unit);
        let mut out = String::new();
        let _ = writeln!(out, "/* {} */", unit);
        let _ = writeln!(out, "#ifndef {}", guard);
        let _ = writeln!(out, "#define {}", guard);
        for slot in exports(unit) {
            match unit.kind {
                UnitKind::Globals => {
                    let _ = writeln!(out, "extern void *{};", symbol_name(unit, &slot));
                }
                _ => {
                    let _ = writeln!(out, "void {}(void);", symbol_name(unit, &slot));
                }
            }
        }
        let _ = writeln!(out, "#endif");
        out
    }

    fn globals_source(unit: &CompilationUnit) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "#include \"{}.h\"", unit.artifact_stem());
        for slot in &unit.local_slots {
            let _ = writeln!(out, "void *{} = 0;", symbol_name(unit, slot));
        }
        out
    }

    fn function_source(request: &GenerateRequest<'_>) -> String {
        let unit = request.unit;
        let mut out = String::new();
        let _ = writeln!(out, "#include \"{}.h\"", unit.artifact_stem());

        let callable: Vec<_> = request
            .dependencies
            .iter()
            .filter(|(dep, _)| !matches!(dep.kind, UnitKind::Builtins | UnitKind::Precompiled { .. }))
            .collect();
        for (dep, _) in &callable {
            let _ = writeln!(out, "#include \"{}.h\"", dep.artifact_stem());
        }
        for name in &request.unresolved {
            let _ = writeln!(out, "/* resolved at run time: {} */", name);
        }

        for (i, slot) in exports(unit).iter().enumerate() {
            let _ = writeln!(out, "\nvoid {}(void)\n{{", symbol_name(unit, slot));
            if i == 0 {
                for (dep, symbols) in &callable {
                    for symbol in symbols.iter() {
                        if matches!(dep.kind, UnitKind::Globals) {
                            let _ = writeln!(out, "    (void){};", symbol_name(dep, symbol));
                        } else if exports(dep).contains(symbol) {
                            let _ = writeln!(out, "    {}();", symbol_name(dep, symbol));
                        }
                    }
                }
            }
            let _ = writeln!(out, "}}");
        }
        out
    }

    fn partial_source(unit: &CompilationUnit) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "/* forward declarations of {} */", unit);
        for slot in exports(unit) {
            let _ = writeln!(out, "void {}(void) {{}}", symbol_name(unit, &slot));
        }
        out
    }
}

impl CodeGenerator for StubGenerator {
    fn generate(&mut self, request: &GenerateRequest<'_>) -> Result<GeneratedSource> {
        let unit = request.unit;
        let source = match unit.kind {
            UnitKind::Globals => Self::globals_source(unit),
            UnitKind::Script { .. } | UnitKind::Snippet | UnitKind::ClassMeta { .. } => {
                Self::function_source(request)
            }
            _ => {
                return Err(BuildError::Codegen {
                    unit: unit.to_string(),
                    message: format!("{} units are not translated", unit.kind.tag()),
                })
            }
        };

        Ok(GeneratedSource {
            header: Self::header(unit),
            source,
            partial: request.cyclic.then(|| Self::partial_source(unit)),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scriptc_resolve::UnitArena;
    use std::path::PathBuf;

    #[test]
    fn test_function_calls_imported_symbols() {
        let mut arena = UnitArena::new();
        let main = arena.insert(
            "main",
            UnitKind::Script {
                path: PathBuf::from("/src/main.m"),
            },
            1,
            None,
        );
        let util = arena.insert(
            "util",
            UnitKind::Script {
                path: PathBuf::from("/src/util.m"),
            },
            1,
            None,
        );
        let globals = arena.insert("<globals>", UnitKind::Globals, 0, None);
        arena.get_mut(globals).unwrap().add_local_slot("counter");

        let util_symbols: BTreeSet<String> = ["util".to_string()].into();
        let global_symbols: BTreeSet<String> = ["counter".to_string()].into();
        let request = GenerateRequest {
            unit: &arena[main],
            dependencies: vec![(&arena[util], &util_symbols), (&arena[globals], &global_symbols)],
            unresolved: vec!["mystery"],
            cyclic: false,
        };

        let generated = StubGenerator::new().generate(&request).unwrap();
        assert!(generated.header.contains("void sc_main_0_main(void);"));
        assert!(generated.source.contains("#include \"util_0.h\""));
        assert!(generated.source.contains("    sc_util_0_util();"));
        assert!(generated.source.contains("(void)sc__3c_globals_3e__0_counter;"));
        assert!(generated.source.contains("mystery"));
        assert_eq!(generated.partial, None);
    }

    #[test]
    fn test_cyclic_unit_gets_forward_declarations() {
        let mut arena = UnitArena::new();
        let id = arena.insert("ping", UnitKind::Snippet, 3, None);
        let request = GenerateRequest {
            unit: &arena[id],
            dependencies: Vec::new(),
            unresolved: Vec::new(),
            cyclic: true,
        };

        let generated = StubGenerator::new().generate(&request).unwrap();
        let partial = generated.partial.unwrap();
        assert!(partial.contains("void sc_ping_0_ping(void) {}"));
    }

    #[test]
    fn test_globals_are_data() {
        let mut arena = UnitArena::new();
        let id = arena.insert("<globals>", UnitKind::Globals, 0, None);
        arena.get_mut(id).unwrap().add_local_slot("limit");
        let request = GenerateRequest {
            unit: &arena[id],
            dependencies: Vec::new(),
            unresolved: Vec::new(),
            cyclic: false,
        };

        let generated = StubGenerator::new().generate(&request).unwrap();
        assert!(generated.header.contains("extern void *sc__3c_globals_3e__0_limit;"));
        assert!(generated.source.contains("void *sc__3c_globals_3e__0_limit = 0;"));
    }

    #[test]
    fn test_builtins_are_rejected() {
        let mut arena = UnitArena::new();
        let id = arena.insert("<builtins>", UnitKind::Builtins, 0, None);
        let request = GenerateRequest {
            unit: &arena[id],
            dependencies: Vec::new(),
            unresolved: Vec::new(),
            cyclic: false,
        };
        assert!(matches!(
            StubGenerator::new().generate(&request),
            Err(BuildError::Codegen { .. })
        ));
    }
}
