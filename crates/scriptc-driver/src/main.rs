use clap::{Args, Parser, Subcommand, ValueEnum};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

use scriptc_driver::diagnostics::{report_error, report_unresolved};
use scriptc_driver::{
    ArtifactMode, BuildConfig, BuildReport, CcToolchain, EntryOutcome, EntryRequest,
    Orchestrator, PlanNode, StubGenerator,
};
use scriptc_resolve::{SearchPath, SourceWalker};

type Driver = Orchestrator<SourceWalker, SearchPath, StubGenerator, CcToolchain>;

#[derive(Parser)]
#[command(
    name = "scriptc",
    version = "0.1.0",
    about = "Incremental native builds for MATLAB-style scripts",
    long_about = "Resolves the functions an entry point calls, orders them so that\ncallees build first, and rebuilds only what changed since the last run."
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build native modules for one or more entry points
    Build {
        /// Function names or paths to `.m` files
        entries: Vec<String>,

        /// Build a snippet of code given on the command line
        #[arg(long)]
        eval: Option<String>,

        /// Output module name (single entry only)
        #[arg(short, long)]
        output: Option<String>,

        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// Print the build plan for an entry point without running it
    Plan {
        /// Function name or path to a `.m` file
        entry: String,

        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// Rebuild every cached entry point that still exists on disk
    Refresh {
        #[command(flatten)]
        common: CommonArgs,

        #[command(flatten)]
        toolchain: ToolchainArgs,
    },

    /// Remove the build cache and generated objects
    Clean {
        /// Cache directory
        #[arg(long, env = "SCRIPTC_CACHE_DIR", default_value = ".scriptc")]
        cache_dir: PathBuf,
    },
}

#[derive(Args)]
struct CommonArgs {
    /// Cache directory
    #[arg(long, env = "SCRIPTC_CACHE_DIR", default_value = ".scriptc")]
    cache_dir: PathBuf,

    /// Search path directory, in lookup order
    #[arg(short = 'p', long = "path", env = "SCRIPTC_PATH", value_delimiter = ':')]
    search_path: Vec<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Args)]
struct ToolchainArgs {
    /// Directory the entry modules are written to
    #[arg(long, default_value = ".")]
    out_dir: PathBuf,

    /// Artifact layout
    #[arg(long, default_value = "single")]
    mode: Mode,

    /// C compiler driver
    #[arg(long, env = "SCRIPTC_CC", default_value = "cc")]
    cc: String,

    /// Extra compiler flag
    #[arg(long = "cflag", allow_hyphen_values = true)]
    cflags: Vec<String>,

    /// Extra linker flag
    #[arg(long = "ldflag", allow_hyphen_values = true)]
    ldflags: Vec<String>,

    /// Runtime library linked into every module
    #[arg(long, env = "SCRIPTC_RUNTIME")]
    runtime: Option<PathBuf>,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Mode {
    /// One module per entry point
    Single,
    /// One module per unit, loaded dynamically
    PerUnit,
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    match cli.command {
        Commands::Build {
            entries,
            eval,
            output,
            common,
            toolchain,
        } => build_command(entries, eval, output, common, toolchain),
        Commands::Plan {
            entry,
            common,
            toolchain,
        } => plan_command(entry, common, toolchain),
        Commands::Refresh { common, toolchain } => refresh_command(common, toolchain),
        Commands::Clean { cache_dir } => clean_command(cache_dir),
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn build_config(common: &CommonArgs, toolchain: ToolchainArgs, output: Option<String>) -> BuildConfig {
    let search_path = if common.search_path.is_empty() {
        vec![PathBuf::from(".")]
    } else {
        common.search_path.clone()
    };

    BuildConfig {
        cache_dir: common.cache_dir.clone(),
        out_dir: toolchain.out_dir,
        output_name: output,
        search_path,
        mode: match toolchain.mode {
            Mode::Single => ArtifactMode::Single,
            Mode::PerUnit => ArtifactMode::PerUnit,
        },
        cc: toolchain.cc,
        cflags: toolchain.cflags,
        ldflags: toolchain.ldflags,
        runtime: toolchain.runtime,
    }
}

/// Prepare the directories and load the cache
fn open_driver(config: BuildConfig) -> Result<Driver, ExitCode> {
    if let Err(e) = config.prepare() {
        report_error(&e);
        return Err(ExitCode::FAILURE);
    }

    let lookup = SearchPath::new(config.search_path.clone());
    let toolchain = CcToolchain::from_config(&config);
    Ok(Orchestrator::new(
        config,
        SourceWalker::new(),
        lookup,
        StubGenerator::new(),
        toolchain,
    ))
}

/// A bare name is looked up on the search path; a path to a `.m` file is
/// looked up in its own directory only.
fn entry_request(entry: String) -> EntryRequest {
    let path = Path::new(&entry);
    if path.extension().map_or(false, |ext| ext == "m") {
        if let Some(name) = path.file_stem().and_then(|stem| stem.to_str()) {
            let context = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
                _ => PathBuf::from("."),
            };
            return EntryRequest::Located {
                name: name.to_string(),
                context,
            };
        }
    }
    EntryRequest::Name(entry)
}

fn build_command(
    entries: Vec<String>,
    eval: Option<String>,
    output: Option<String>,
    common: CommonArgs,
    toolchain: ToolchainArgs,
) -> ExitCode {
    init_logging(common.verbose);

    let entry_count = entries.len() + usize::from(eval.is_some());
    if entry_count == 0 {
        eprintln!("error: nothing to build; name an entry point or pass --eval");
        return ExitCode::FAILURE;
    }
    if output.is_some() && entry_count > 1 {
        eprintln!("error: --output needs exactly one entry point");
        return ExitCode::FAILURE;
    }

    let mut requests: Vec<EntryRequest> = entries.into_iter().map(entry_request).collect();
    if let Some(text) = eval {
        requests.push(EntryRequest::Snippet {
            name: "snippet".to_string(),
            text,
        });
    }

    let config = build_config(&common, toolchain, output);
    let mut driver = match open_driver(config) {
        Ok(driver) => driver,
        Err(code) => return code,
    };

    match driver.build(&requests) {
        Ok(report) => finish(&driver, &report, common.verbose),
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn plan_command(entry: String, common: CommonArgs, toolchain: ToolchainArgs) -> ExitCode {
    init_logging(common.verbose);

    let config = build_config(&common, toolchain, None);
    let mut driver = match open_driver(config) {
        Ok(driver) => driver,
        Err(code) => return code,
    };

    let plan = match driver.plan_entry(&entry_request(entry.clone())) {
        Ok(Some(plan)) => plan,
        Ok(None) => {
            eprintln!("error: `{}` does not name a buildable function", entry);
            return ExitCode::FAILURE;
        }
        Err(e) => {
            report_error(&e);
            return ExitCode::FAILURE;
        }
    };

    let units = driver.resolver().units();
    println!("Build order:");
    for (i, node) in plan.order.iter().enumerate() {
        match node {
            PlanNode::Unit(id) => println!("  {}. {}", i + 1, units[*id]),
            PlanNode::Cycle { members, .. } => {
                let names: Vec<String> = members.iter().map(|id| units[*id].to_string()).collect();
                println!("  {}. cycle [{}]", i + 1, names.join(", "));
            }
        }
    }

    println!("Steps:");
    for step in &plan.steps {
        println!(
            "  {:>12}  {} ({:?})",
            step.action.to_string(),
            units[step.unit],
            driver.resolver().freshness(step.unit)
        );
    }
    for warning in &plan.warnings {
        eprintln!("warning: {}", warning);
    }
    report_unresolved(units, driver.resolver().unresolved());
    ExitCode::SUCCESS
}

fn refresh_command(common: CommonArgs, toolchain: ToolchainArgs) -> ExitCode {
    init_logging(common.verbose);

    let config = build_config(&common, toolchain, None);
    let mut driver = match open_driver(config) {
        Ok(driver) => driver,
        Err(code) => return code,
    };

    match driver.refresh_all() {
        Ok(report) if report.entries.is_empty() => {
            println!("Nothing to refresh");
            ExitCode::SUCCESS
        }
        Ok(report) => finish(&driver, &report, common.verbose),
        Err(e) => {
            report_error(&e);
            ExitCode::FAILURE
        }
    }
}

fn clean_command(cache_dir: PathBuf) -> ExitCode {
    let layout = BuildConfig {
        cache_dir,
        ..BuildConfig::default()
    }
    .layout();

    let removed = remove_if_present(fs::remove_file(&layout.cache_file))
        .and_then(|_| remove_if_present(fs::remove_dir_all(&layout.objects_dir)));

    match removed {
        Ok(()) => {
            println!("Removed {}", layout.objects_dir.display());
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: failed to clean cache: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn remove_if_present(result: io::Result<()>) -> io::Result<()> {
    match result {
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        other => other,
    }
}

fn finish(driver: &Driver, report: &BuildReport, verbose: bool) -> ExitCode {
    if verbose {
        for step in &report.steps {
            let status = if step.skipped { "up to date" } else { "done" };
            println!("  {:>12}  {} ({})", step.action.to_string(), step.name, status);
        }
    }

    for warning in &report.warnings {
        eprintln!("warning: {}", warning);
    }
    report_unresolved(driver.resolver().units(), &report.unresolved);

    for entry in &report.entries {
        if let EntryOutcome::Built { name, artifact, .. } = entry {
            println!("Built {} -> {}", name, artifact.display());
        }
    }

    if report.built_count() > 0 {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
