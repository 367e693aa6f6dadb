//! # Stagegraph
//!
//! Compiles layer graphs drawn in a visual design tool into ordered,
//! shape-consistent pipelines, then runs them with tiered fallback so that
//! every run leaves a diagnostics directory behind.
//!
//! - **Compilation**: node filtering, dependency ordering, shape inference,
//!   adapter insertion and a guaranteed classifier head
//! - **Stage catalogue**: a static registry of stage kinds, their fields,
//!   defaults and shape rules
//! - **Tiered execution**: Full, Reduced, StructureOnly and Emergency tiers
//!   behind a pluggable compute engine
//! - **Diagnostics**: per-run artifacts directory, manifest and ready marker
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use stagegraph::prelude::*;
//!
//! let graph = GraphDocument::from_path(Path::new("graph.json"))?.into_graph();
//! let config = RunConfig::new();
//! let mut ctx = RunContext::new();
//!
//! let runner = ResilientRunner::new(Box::new(UnavailableEngine), config.clone());
//! let shape = resolve_input_shape(&graph.nodes, None, &config);
//! let options = CompileOptions::from_config(&config, shape);
//! let report = runner.run_graph(&graph, StageRegistry::global(), options, &mut ctx)?;
//! println!("{}", report.artifacts_dir.display());
//! ```

#![forbid(unsafe_code)]
#![warn(
    clippy::all,
    clippy::pedantic,
    missing_docs,
    rust_2018_idioms
)]
#![allow(
    clippy::module_name_repetitions,
    clippy::must_use_candidate,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc
)]

pub mod config;
pub mod context;
pub mod core;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod events;
pub mod graph;
pub mod registry;
pub mod runner;
pub mod utils;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::{LabelEncoding, LossFunction, RunConfig, TrainingPolicy};
    pub use crate::context::RunContext;
    pub use crate::core::{Shape, Tier};
    pub use crate::diagnostics::{DiagnosticsWriter, FsLinker, LinkOrCopy, RunManifest};
    pub use crate::engine::{
        ComputeEngine, ProcessEngine, SampleData, StructuralDescription, TrainingOutcome,
        UnavailableEngine,
    };
    pub use crate::errors::{
        ErrorKind, ErrorRecord, ExecutionError, GraphError, InputError, StagegraphError,
    };
    pub use crate::events::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};
    pub use crate::graph::{
        resolve_input_shape, CompileOptions, CompiledPipeline, Edge, GraphCompiler,
        GraphDocument, Node, ParsedGraph,
    };
    pub use crate::registry::{StageRegistry, StageTag};
    pub use crate::runner::{ExecutionTierResult, ResilientRunner, RunReport};
    pub use crate::utils::{iso_timestamp, Timestamp};
}
