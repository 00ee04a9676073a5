//! scriptc build driver
//!
//! Orchestrates incremental builds of script entry points into native
//! modules: resolve the dependency graph, plan the build order, generate and
//! compile each unit that changed, link the result and persist the cache.

pub mod codegen;
pub mod config;
pub mod diagnostics;
pub mod error;
pub mod orchestrator;
pub mod plan;
pub mod toolchain;

pub use codegen::{CodeGenerator, GenerateRequest, GeneratedSource, StubGenerator};
pub use config::{ArtifactLayout, ArtifactMode, BuildConfig};
pub use error::{BuildError, Result};
pub use orchestrator::{BuildReport, EntryOutcome, EntryRequest, Orchestrator, StepRecord};
pub use plan::{Action, BuildPlan, PlanNode, Planner, Step};
pub use toolchain::{CcToolchain, CompileFlags, LinkFlags, Toolchain};
