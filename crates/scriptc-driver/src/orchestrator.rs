//! Build orchestration.
//!
//! An [`Orchestrator`] owns the resolver and the persisted cache. For every
//! entry point it resolves the dependency graph, plans the build, runs the
//! plan through the code generator and toolchain, and at the end writes the
//! rows of every unit it touched back to the cache. A failing step aborts the
//! whole build before anything is persisted.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use scriptc_graph::{extract_subgraph, find_roots};
use scriptc_resolve::{
    AstWalker, BuildCache, Definition, ImportTarget, NameLookup, Resolver, Timestamp,
    UnresolvedReference, UnitId,
};
use tracing::{debug, info, warn};

use crate::codegen::{exports, CodeGenerator, GenerateRequest};
use crate::config::{ArtifactLayout, ArtifactMode, BuildConfig};
use crate::error::{BuildError, Result};
use crate::plan::{kind_action, Action, BuildPlan, KindAction, Planner};
use crate::toolchain::{CompileFlags, LinkFlags, Toolchain};

/// An entry point to build
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryRequest {
    /// Looked up on the search path
    Name(String),
    /// Looked up in `context` only; a same-named function elsewhere on the
    /// search path does not count
    Located { name: String, context: PathBuf },
    /// Code given inline
    Snippet { name: String, text: String },
}

impl EntryRequest {
    pub fn name(&self) -> &str {
        match self {
            EntryRequest::Name(name)
            | EntryRequest::Located { name, .. }
            | EntryRequest::Snippet { name, .. } => name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryOutcome {
    Built {
        name: String,
        unit: UnitId,
        artifact: PathBuf,
    },
    /// Resolved to a unit that produces no module
    NotBuildable { name: String, unit: UnitId },
    Unresolved { name: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepRecord {
    pub unit: UnitId,
    /// Display name of the unit
    pub name: String,
    pub action: Action,
    /// The outputs were already up to date
    pub skipped: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BuildReport {
    pub entries: Vec<EntryOutcome>,
    pub steps: Vec<StepRecord>,
    pub warnings: Vec<String>,
    pub unresolved: Vec<UnresolvedReference>,
}

impl BuildReport {
    /// Modules produced, one per built entry
    pub fn artifacts(&self) -> impl Iterator<Item = &Path> {
        self.entries.iter().filter_map(|entry| match entry {
            EntryOutcome::Built { artifact, .. } => Some(artifact.as_path()),
            _ => None,
        })
    }

    pub fn built_count(&self) -> usize {
        self.artifacts().count()
    }

    /// Number of steps of `action` that actually ran
    pub fn performed(&self, action: Action) -> usize {
        self.steps
            .iter()
            .filter(|step| step.action == action && !step.skipped)
            .count()
    }

    /// Whether a step of `action` ran for the unit displayed as `name`
    pub fn performed_for(&self, name: &str, action: Action) -> bool {
        self.steps
            .iter()
            .any(|step| step.name == name && step.action == action && !step.skipped)
    }
}

/// Where the definition of an entry comes from
enum EntryDefinition<'e> {
    /// The bare name, looked up on the search path
    Search,
    Found(Definition),
    /// Nothing by that name in the entry's own directory
    Missing(&'e Path),
}

pub struct Orchestrator<W, L, G, T> {
    config: BuildConfig,
    layout: ArtifactLayout,
    resolver: Resolver<W, L>,
    cache: BuildCache,
    codegen: G,
    toolchain: T,
}

impl<W, L, G, T> Orchestrator<W, L, G, T>
where
    W: AstWalker,
    L: NameLookup,
    G: CodeGenerator,
    T: Toolchain,
{
    /// Load the cache named by `config` and continue from its graph
    pub fn new(config: BuildConfig, walker: W, lookup: L, codegen: G, toolchain: T) -> Self {
        let layout = config.layout();
        let cache = BuildCache::load(&layout.cache_file);
        let resolver = Resolver::with_state(walker, lookup, cache.to_graph());
        debug!(
            cache = %layout.cache_file.display(),
            units = resolver.units().len(),
            "build cache loaded"
        );

        Self {
            config,
            layout,
            resolver,
            cache,
            codegen,
            toolchain,
        }
    }

    pub fn config(&self) -> &BuildConfig {
        &self.config
    }

    pub fn layout(&self) -> &ArtifactLayout {
        &self.layout
    }

    pub fn resolver(&self) -> &Resolver<W, L> {
        &self.resolver
    }

    pub fn cache(&self) -> &BuildCache {
        &self.cache
    }

    /// Build every entry, then persist the touched units.
    ///
    /// Entries that resolve to nothing are reported, not fatal. Any failing
    /// step aborts the build and leaves the cache on disk untouched.
    pub fn build(&mut self, entries: &[EntryRequest]) -> Result<BuildReport> {
        self.resolver.reset_run();
        let mut report = BuildReport::default();
        let mut touched = BTreeSet::new();

        for entry in entries {
            let name = entry.name();
            let definition = match self.definition_for(entry) {
                EntryDefinition::Search => None,
                EntryDefinition::Found(definition) => Some(definition),
                EntryDefinition::Missing(context) => {
                    warn!(
                        entry = name,
                        dir = %context.display(),
                        "entry point not found in its directory"
                    );
                    report.warnings.push(format!(
                        "`{}` is not defined in {}",
                        name,
                        context.display()
                    ));
                    report.entries.push(EntryOutcome::Unresolved {
                        name: name.to_string(),
                    });
                    continue;
                }
            };
            let Some(root) = self.resolver.analyze(name, definition)? else {
                report
                    .warnings
                    .push(format!("`{}` does not name a buildable function", name));
                report.entries.push(EntryOutcome::Unresolved {
                    name: name.to_string(),
                });
                continue;
            };

            let plan = self.plan(root);
            report.warnings.extend(plan.warnings.iter().cloned());
            self.execute(name, &plan, &mut report)?;

            for id in plan.units() {
                if self.resolver.freshness(id).needs_build() {
                    self.resolver.mark_built(id);
                    touched.insert(id);
                }
            }

            let outcome = if plan.has_step(root, Action::Emit) {
                EntryOutcome::Built {
                    name: name.to_string(),
                    unit: root,
                    artifact: self.config.output_path(name),
                }
            } else {
                EntryOutcome::NotBuildable {
                    name: name.to_string(),
                    unit: root,
                }
            };
            report.entries.push(outcome);
        }

        report.unresolved = self.resolver.unresolved().to_vec();
        self.persist(&touched)?;
        Ok(report)
    }

    /// Rebuild every cached entry point whose file still exists.
    ///
    /// Entry points are the units nothing else depends on.
    pub fn refresh_all(&mut self) -> Result<BuildReport> {
        let units = self.resolver.units();
        let entries: Vec<EntryRequest> = find_roots(self.resolver.graph())
            .into_iter()
            .filter_map(|id| {
                let unit = &units[id];
                if kind_action(&unit.kind) != KindAction::Translate {
                    return None;
                }
                let context = unit.directory()?;
                Some(EntryRequest::Located {
                    name: unit.name.clone(),
                    context: context.to_path_buf(),
                })
            })
            .collect();

        info!(entries = entries.len(), "refreshing cached entry points");
        self.build(&entries)
    }

    /// Resolve an entry and plan its build without running anything
    pub fn plan_entry(&mut self, entry: &EntryRequest) -> Result<Option<BuildPlan>> {
        self.resolver.reset_run();
        let definition = match self.definition_for(entry) {
            EntryDefinition::Search => None,
            EntryDefinition::Found(definition) => Some(definition),
            EntryDefinition::Missing(_) => return Ok(None),
        };
        let root = self.resolver.analyze(entry.name(), definition)?;
        Ok(root.map(|root| self.plan(root)))
    }

    fn definition_for<'e>(&self, entry: &'e EntryRequest) -> EntryDefinition<'e> {
        match entry {
            EntryRequest::Name(_) => EntryDefinition::Search,
            EntryRequest::Located { name, context } => self
                .resolver
                .lookup()
                .find_definition(name, Some(context.as_path()))
                .filter(|definition| {
                    definition
                        .kind
                        .source_path()
                        .map_or(false, |path| path.starts_with(context))
                })
                .map_or(EntryDefinition::Missing(context.as_path()), EntryDefinition::Found),
            EntryRequest::Snippet { text, .. } => {
                EntryDefinition::Found(Definition::snippet(text.clone(), now_millis()))
            }
        }
    }

    fn plan(&self, root: UnitId) -> BuildPlan {
        let resolver = &self.resolver;
        Planner::new(
            resolver.units(),
            resolver.graph(),
            &self.layout,
            self.config.mode,
        )
        .plan(root, |id| resolver.freshness(id))
    }

    fn execute(&mut self, entry: &str, plan: &BuildPlan, report: &mut BuildReport) -> Result<()> {
        let mut generated = BTreeSet::new();

        for step in &plan.steps {
            let performed = match step.action {
                Action::Generate => {
                    self.generate(plan, step.unit)?;
                    generated.insert(step.unit);
                    true
                }
                Action::Compile => {
                    self.compile(step.unit)?;
                    true
                }
                Action::ForwardLink => {
                    self.forward_link(step.unit)?;
                    true
                }
                Action::Link => self.link(plan, step.unit, false, &generated)?,
                Action::Relink => self.link(plan, step.unit, true, &generated)?,
                Action::Emit => self.emit(entry, plan, &generated)?,
            };

            let name = self.resolver.units()[step.unit].to_string();
            if performed {
                info!(action = %step.action, unit = %name, "step finished");
            } else {
                debug!(action = %step.action, unit = %name, "up to date");
            }
            report.steps.push(StepRecord {
                unit: step.unit,
                name,
                action: step.action,
                skipped: !performed,
            });
        }
        Ok(())
    }

    fn generate(&mut self, plan: &BuildPlan, id: UnitId) -> Result<()> {
        let units = self.resolver.units();
        let unit = &units[id];

        let mut dependencies = Vec::new();
        let mut unresolved = Vec::new();
        for (target, symbols) in self.resolver.imports().get(&id).into_iter().flatten() {
            match target {
                ImportTarget::Unit(dep) => dependencies.push((&units[*dep], symbols)),
                ImportTarget::Unresolved => unresolved.extend(symbols.iter().map(String::as_str)),
            }
        }

        let request = GenerateRequest {
            unit,
            dependencies,
            unresolved,
            cyclic: plan.is_cyclic(id),
        };
        let output = self.codegen.generate(&request)?;

        write_file(&self.layout.header(unit), &output.header)?;
        write_file(&self.layout.source(unit), &output.source)?;
        if let Some(partial) = &output.partial {
            write_file(&self.layout.partial_source(unit), partial)?;
        }
        Ok(())
    }

    fn compile(&mut self, id: UnitId) -> Result<()> {
        let unit = &self.resolver.units()[id];
        let include_dirs = [self.layout.objects_dir.clone()];
        self.toolchain.compile(
            &self.layout.source(unit),
            &CompileFlags {
                output: &self.layout.object(unit),
                include_dirs: &include_dirs,
            },
        )?;
        Ok(())
    }

    fn forward_link(&mut self, id: UnitId) -> Result<()> {
        let unit = &self.resolver.units()[id];
        let partial = self.layout.partial_source(unit);
        if !partial.exists() {
            return Err(BuildError::Codegen {
                unit: unit.to_string(),
                message: format!("no forward declarations at {}", partial.display()),
            });
        }

        let object = self.layout.partial_object(unit);
        let include_dirs = [self.layout.objects_dir.clone()];
        self.toolchain.compile(
            &partial,
            &CompileFlags {
                output: &object,
                include_dirs: &include_dirs,
            },
        )?;

        let libraries: Vec<PathBuf> = self.config.runtime.iter().cloned().collect();
        self.toolchain.link(
            &[object],
            &LinkFlags {
                output: &self.layout.stand_in(unit),
                libraries: &libraries,
            },
        )?;
        Ok(())
    }

    /// Link the per-unit module of `id`. Returns `false` when the module was
    /// already up to date.
    ///
    /// On the first pass through a rebuilt cycle, peers are linked through
    /// their stand-ins; `relink` links against their real modules and always
    /// runs.
    fn link(
        &mut self,
        plan: &BuildPlan,
        id: UnitId,
        relink: bool,
        generated: &BTreeSet<UnitId>,
    ) -> Result<bool> {
        let forward = !relink && plan.has_step(id, Action::ForwardLink);
        let peers = plan.peers(id);
        let units = self.resolver.units();
        let unit = &units[id];
        let object = self.layout.object(unit);
        let artifact = self.layout.artifact(unit);

        let mut libraries = Vec::new();
        let mut inputs = vec![object.clone()];
        for dep in plan.subgraph.successors(id) {
            let dep_unit = &units[dep];
            let library = match kind_action(&dep_unit.kind) {
                KindAction::Translate | KindAction::Table if forward && peers.contains(&dep) => {
                    self.layout.stand_in(dep_unit)
                }
                KindAction::Translate | KindAction::Table => self.layout.artifact(dep_unit),
                KindAction::LinkAsIs => match dep_unit.source_path() {
                    Some(path) => path.to_path_buf(),
                    None => continue,
                },
                KindAction::Runtime | KindAction::Skip => continue,
            };
            if !peers.contains(&dep) {
                inputs.push(library.clone());
            }
            libraries.push(library);
        }
        if let Some(runtime) = &self.config.runtime {
            inputs.push(runtime.clone());
            libraries.push(runtime.clone());
        }

        if !relink && !forward {
            let upstream_changed = extract_subgraph(&plan.subgraph, id)
                .nodes()
                .any(|node| generated.contains(&node));
            if !upstream_changed && is_up_to_date(&artifact, &inputs) {
                return Ok(false);
            }
        }

        self.toolchain.link(
            &[object],
            &LinkFlags {
                output: &artifact,
                libraries: &libraries,
            },
        )?;
        self.cache
            .update_registry(&unit.name, unit.overload_id, &exports(unit));
        Ok(true)
    }

    fn emit(&mut self, entry: &str, plan: &BuildPlan, generated: &BTreeSet<UnitId>) -> Result<bool> {
        let output = self.config.output_path(entry);
        let units = self.resolver.units();

        if self.config.mode == ArtifactMode::PerUnit {
            let artifact = self.layout.artifact(&units[plan.root]);
            fs::copy(&artifact, &output).map_err(|e| BuildError::io(&artifact, e))?;
            return Ok(true);
        }

        let mut objects = Vec::new();
        let mut libraries = Vec::new();
        for id in plan.units() {
            let unit = &units[id];
            match kind_action(&unit.kind) {
                action if action.produces_object() => objects.push(self.layout.object(unit)),
                KindAction::LinkAsIs => libraries.extend(unit.source_path().map(Path::to_path_buf)),
                _ => {}
            }
        }
        libraries.extend(self.config.runtime.iter().cloned());

        let inputs: Vec<PathBuf> = objects.iter().chain(&libraries).cloned().collect();
        if generated.is_empty() && is_up_to_date(&output, &inputs) {
            return Ok(false);
        }

        self.toolchain.link(
            &objects,
            &LinkFlags {
                output: &output,
                libraries: &libraries,
            },
        )?;
        Ok(true)
    }

    fn persist(&mut self, touched: &BTreeSet<UnitId>) -> Result<()> {
        self.cache
            .update_rows(self.resolver.state(), touched.iter().copied());
        self.cache.save(&self.layout.cache_file)?;
        info!(
            touched = touched.len(),
            cache = %self.layout.cache_file.display(),
            "build cache saved"
        );
        Ok(())
    }
}

fn write_file(path: &Path, contents: &str) -> Result<()> {
    fs::write(path, contents).map_err(|e| BuildError::io(path, e))
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|meta| meta.modified()).ok()
}

/// Whether `output` exists and is no older than any of `inputs`
fn is_up_to_date(output: &Path, inputs: &[PathBuf]) -> bool {
    let Some(built) = modified(output) else {
        return false;
    };
    inputs
        .iter()
        .all(|input| modified(input).map_or(false, |time| time <= built))
}

fn now_millis() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_millis() as Timestamp)
}
