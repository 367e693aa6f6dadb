//! The resilient runner.
//!
//! Tiers run strictly in order, each entered only when the one above did not
//! complete. Every transition is an explicit value returned by the tier,
//! panics included, and the Emergency tier cannot fail the run.

use super::tiers::{next_tier, ExecutionTierResult, TierFailure};
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::core::{Shape, Tier};
use crate::diagnostics::{DiagnosticsWriter, FsLinker, LinkOrCopy, RunManifest};
use crate::engine::{ComputeEngine, SampleData, StructuralDescription};
use crate::errors::{ErrorKind, ErrorRecord, ExecutionError, GraphError, StagegraphError};
use crate::events::names;
use crate::graph::{
    resolve_input_shape, CompileOptions, CompiledPipeline, GraphCompiler, GraphDocument, ParsedGraph,
};
use crate::registry::StageRegistry;
use serde_json::json;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};

/// Default output directory.
pub const DEFAULT_OUTPUT_DIR: &str = "tb_logs";

/// Outcome of one run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    /// Absolute artifacts directory.
    pub artifacts_dir: PathBuf,
    /// The tier that ended the run.
    pub final_tier: Tier,
    /// Every attempted tier, in order.
    pub results: Vec<ExecutionTierResult>,
    /// Whether the manifest and ready marker were written.
    pub manifest_written: bool,
}

impl RunReport {
    /// Returns true if the final tier produced its artifacts.
    #[must_use]
    pub fn succeeded(&self) -> bool {
        self.results.last().is_some_and(|r| r.succeeded)
    }

    /// Returns the tiers attempted, in order.
    #[must_use]
    pub fn tiers(&self) -> Vec<Tier> {
        self.results.iter().map(|r| r.tier).collect()
    }
}

/// Drives a compiled pipeline through Full, Reduced, StructureOnly and
/// Emergency tiers.
pub struct ResilientRunner {
    engine: Box<dyn ComputeEngine>,
    config: RunConfig,
    output_dir: PathBuf,
    linker: Box<dyn LinkOrCopy>,
}

impl std::fmt::Debug for ResilientRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResilientRunner")
            .field("engine", &self.engine.name())
            .field("output_dir", &self.output_dir)
            .finish_non_exhaustive()
    }
}

impl ResilientRunner {
    /// Creates a runner writing under [`DEFAULT_OUTPUT_DIR`].
    #[must_use]
    pub fn new(engine: Box<dyn ComputeEngine>, config: RunConfig) -> Self {
        Self {
            engine,
            config,
            output_dir: PathBuf::from(DEFAULT_OUTPUT_DIR),
            linker: Box::new(FsLinker),
        }
    }

    /// Sets the output directory.
    #[must_use]
    pub fn with_output_dir(mut self, output_dir: impl Into<PathBuf>) -> Self {
        self.output_dir = output_dir.into();
        self
    }

    /// Sets the latest-link collaborator.
    #[must_use]
    pub fn with_linker(mut self, linker: Box<dyn LinkOrCopy>) -> Self {
        self.linker = linker;
        self
    }

    /// Returns the configuration.
    #[must_use]
    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Returns the output directory.
    #[must_use]
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Runs a compiled pipeline. Never fails.
    ///
    /// `sample_shape_hint` overrides the pipeline's input shape for sample
    /// synthesis.
    pub fn run(
        &self,
        pipeline: &CompiledPipeline,
        sample_shape_hint: Option<&Shape>,
        ctx: &mut RunContext,
    ) -> RunReport {
        let writer = DiagnosticsWriter::new(&self.output_dir, ctx);
        let results = self.drive(Some(pipeline), sample_shape_hint, Tier::Full, Vec::new(), &writer, ctx);
        self.finish(&writer, Some(pipeline), results, ctx)
    }

    /// Compiles a parsed graph and runs it.
    ///
    /// A panic during compilation sends the run straight to Emergency.
    ///
    /// # Errors
    ///
    /// Returns the fatal [`GraphError`]s (`EmptyInput`, `Cycle`) unchanged.
    pub fn run_graph(
        &self,
        graph: &ParsedGraph,
        registry: &StageRegistry,
        options: CompileOptions,
        ctx: &mut RunContext,
    ) -> Result<RunReport, GraphError> {
        ctx.record_warnings(graph.warnings.iter().cloned());
        let compiler = GraphCompiler::new(registry, options);
        let compiled = catch_unwind(AssertUnwindSafe(|| {
            compiler.compile(&graph.nodes, &graph.edges, ctx)
        }));

        match compiled {
            Ok(Ok(pipeline)) => Ok(self.run(&pipeline, None, ctx)),
            Ok(Err(err)) => {
                error!(run_id = %ctx.run_id(), code = err.code(), "{err}");
                Err(err)
            }
            Err(payload) => {
                let message = format!("compilation panicked: {}", panic_message(payload.as_ref()));
                error!(run_id = %ctx.run_id(), "{message}");
                let writer = DiagnosticsWriter::new(&self.output_dir, ctx);
                let failed = ExecutionTierResult::failure(
                    Tier::Full,
                    writer.artifacts_dir().to_path_buf(),
                    ErrorRecord::new(ErrorKind::Internal, message),
                );
                let results = self.drive(None, None, Tier::Emergency, vec![failed], &writer, ctx);
                Ok(self.finish(&writer, None, results, ctx))
            }
        }
    }

    /// Reads a graph document, compiles it against the built-in registry
    /// and runs it.
    ///
    /// # Errors
    ///
    /// Returns [`StagegraphError::Input`] if the document cannot be read or
    /// parsed and [`StagegraphError::Graph`] for fatal graph errors.
    pub fn run_document(
        &self,
        path: &Path,
        input_shape: Option<&Shape>,
        ctx: &mut RunContext,
    ) -> Result<RunReport, StagegraphError> {
        let graph = GraphDocument::from_path(path)?.into_graph();
        info!(
            run_id = %ctx.run_id(),
            input = %path.display(),
            nodes = graph.nodes.len(),
            edges = graph.edges.len(),
            "Loaded graph document"
        );
        let shape = resolve_input_shape(&graph.nodes, input_shape, &self.config);
        let options = CompileOptions::from_config(&self.config, shape);
        Ok(self.run_graph(&graph, StageRegistry::global(), options, ctx)?)
    }

    fn drive(
        &self,
        pipeline: Option<&CompiledPipeline>,
        hint: Option<&Shape>,
        start: Tier,
        mut results: Vec<ExecutionTierResult>,
        writer: &DiagnosticsWriter,
        ctx: &RunContext,
    ) -> Vec<ExecutionTierResult> {
        let mut tier = start;
        loop {
            info!(run_id = %ctx.run_id(), tier = %tier, "Entering tier");
            ctx.emit(names::TIER_STARTED, Some(json!({"tier": tier})));
            let started = Instant::now();

            let Some(pipeline) = pipeline.filter(|_| !tier.is_terminal()) else {
                let result = self
                    .emergency_tier(writer, &results)
                    .with_duration_ms(elapsed_ms(started));
                let event = if result.succeeded { names::TIER_SUCCEEDED } else { names::TIER_FAILED };
                ctx.emit(event, Some(json!({"tier": Tier::Emergency, "error": result.error})));
                results.push(result);
                return results;
            };

            let attempt = catch_unwind(AssertUnwindSafe(|| match tier {
                Tier::StructureOnly => self.structure_tier(pipeline, writer),
                _ => self.training_tier(tier, pipeline, hint, writer),
            }))
            .unwrap_or_else(|payload| {
                Err(TierFailure::Internal(format!(
                    "{tier} tier panicked: {}",
                    panic_message(payload.as_ref())
                )))
            });

            match attempt {
                Ok(result) => {
                    info!(run_id = %ctx.run_id(), tier = %tier, outputs = result.outputs.len(), "Tier succeeded");
                    ctx.emit(names::TIER_SUCCEEDED, Some(json!({"tier": tier})));
                    results.push(result.with_duration_ms(elapsed_ms(started)));
                    return results;
                }
                Err(failure) => {
                    let record = failure.to_record();
                    warn!(run_id = %ctx.run_id(), tier = %tier, error = %failure, "Tier failed");
                    ctx.emit(names::TIER_FAILED, Some(json!({"tier": tier, "error": record})));
                    results.push(
                        ExecutionTierResult::failure(tier, writer.artifacts_dir().to_path_buf(), record)
                            .with_duration_ms(elapsed_ms(started)),
                    );
                    match next_tier(tier, &failure) {
                        Some(next) => tier = next,
                        None => return results,
                    }
                }
            }
        }
    }

    /// Full or Reduced: train, then write metrics and the structure summary.
    fn training_tier(
        &self,
        tier: Tier,
        pipeline: &CompiledPipeline,
        hint: Option<&Shape>,
        writer: &DiagnosticsWriter,
    ) -> Result<ExecutionTierResult, TierFailure> {
        let policy = match tier {
            Tier::Reduced => self.config.policy.reduced(),
            _ => self.config.policy.clone(),
        };
        let samples = SampleData::synthesize(
            hint.unwrap_or(pipeline.input_shape()),
            self.config.sample_count,
            self.config.num_classes,
            self.config.seed,
            self.config.max_sample_elements,
        )?;
        debug!(
            tier = %tier,
            loss = %policy.loss,
            samples = samples.count,
            shape = %samples.shape,
            "Handing pipeline to engine"
        );

        let outcome = guarded(|| self.engine.train(pipeline, &samples, &policy))?;
        let mut outputs = writer.write_metrics(&outcome)?;
        match writer.write_structure(&StructuralDescription::from_pipeline(pipeline)) {
            Ok(written) => outputs.extend(written),
            Err(err) => warn!(error = %err, "Structure summary not written"),
        }

        Ok(
            ExecutionTierResult::success(tier, writer.artifacts_dir().to_path_buf(), outputs)
                .with_metric_names(outcome.metric_names()),
        )
    }

    /// StructureOnly: describe the pipeline without running it.
    fn structure_tier(
        &self,
        pipeline: &CompiledPipeline,
        writer: &DiagnosticsWriter,
    ) -> Result<ExecutionTierResult, TierFailure> {
        let description = guarded(|| self.engine.describe(pipeline))?;
        let outputs = writer.write_structure(&description)?;
        Ok(ExecutionTierResult::success(
            Tier::StructureOnly,
            writer.artifacts_dir().to_path_buf(),
            outputs,
        ))
    }

    /// Emergency: placeholder records plus every captured error. Never fails.
    fn emergency_tier(&self, writer: &DiagnosticsWriter, results: &[ExecutionTierResult]) -> ExecutionTierResult {
        let mut message: String = results
            .iter()
            .filter_map(|r| r.error.as_ref().map(|e| format!("{}: {e}\n", r.tier)))
            .collect();
        if message.is_empty() {
            message.push_str("no tier produced artifacts\n");
        }

        let written = catch_unwind(AssertUnwindSafe(|| {
            writer
                .write_emergency(&message, self.config.emergency_placeholder_count, self.config.seed)
                .map_err(|err| err.to_string())
        }))
        .unwrap_or_else(|payload| Err(panic_message(payload.as_ref())));

        let dir = writer.artifacts_dir().to_path_buf();
        match written {
            Ok(outputs) => ExecutionTierResult::success(Tier::Emergency, dir, outputs),
            Err(reason) => {
                error!(error = %reason, "Emergency artifact not written");
                ExecutionTierResult::failure(
                    Tier::Emergency,
                    dir,
                    ErrorRecord::new(ErrorKind::EmergencyWriteFailure, reason),
                )
            }
        }
    }

    fn finish(
        &self,
        writer: &DiagnosticsWriter,
        pipeline: Option<&CompiledPipeline>,
        results: Vec<ExecutionTierResult>,
        ctx: &RunContext,
    ) -> RunReport {
        let final_tier = results.last().map_or(Tier::Emergency, |r| r.tier);
        let manifest = RunManifest::new(ctx, writer.artifacts_dir().to_path_buf(), pipeline, results.clone())
            .with_engine(self.engine.name());

        let manifest_written = match writer.persist(&manifest) {
            Ok(_) => {
                self.update_latest(writer);
                true
            }
            Err(err) => {
                error!(run_id = %ctx.run_id(), error = %err, "Manifest not written");
                false
            }
        };

        ctx.emit(
            names::RUN_COMPLETED,
            Some(json!({
                "final_tier": final_tier,
                "artifacts_dir": writer.artifacts_dir(),
                "manifest_written": manifest_written,
            })),
        );
        RunReport {
            artifacts_dir: writer.artifacts_dir().to_path_buf(),
            final_tier,
            results,
            manifest_written,
        }
    }

    fn update_latest(&self, writer: &DiagnosticsWriter) {
        if self.config.latest_link_name.is_empty() {
            return;
        }
        let link = writer.output_dir().join(&self.config.latest_link_name);
        match self.linker.link_or_copy(writer.artifacts_dir(), &link) {
            Ok(kind) => debug!(link = %link.display(), ?kind, "Updated latest link"),
            Err(err) => warn!(link = %link.display(), error = %err, "Could not update latest link"),
        }
    }
}

/// Calls the engine, turning a panic into [`ExecutionError::Panicked`].
fn guarded<T>(call: impl FnOnce() -> Result<T, ExecutionError>) -> Result<T, ExecutionError> {
    catch_unwind(AssertUnwindSafe(call))
        .unwrap_or_else(|payload| Err(ExecutionError::Panicked(panic_message(payload.as_ref()))))
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string())
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_panic_message() {
        let payload = catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = catch_unwind(|| panic!("formatted {}", 7)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 7");
    }

    #[test]
    fn test_guarded_maps_panics() {
        let result: Result<(), ExecutionError> = guarded(|| panic!("kernel crashed"));
        assert_eq!(result, Err(ExecutionError::Panicked("kernel crashed".into())));

        let ok: Result<u8, ExecutionError> = guarded(|| Ok(3));
        assert_eq!(ok, Ok(3));
    }
}
