//! Machine-readable run manifest.

use crate::context::RunContext;
use crate::core::{Shape, Tier};
use crate::errors::ErrorRecord;
use crate::graph::CompiledPipeline;
use crate::registry::StageTag;
use crate::runner::ExecutionTierResult;
use crate::utils::{iso_timestamp, now_utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Summary of a run, written as `manifest.json` whatever tier produced data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    /// Run id.
    pub run_id: String,
    /// When the run started (ISO 8601).
    pub started_at: String,
    /// When the manifest was built (ISO 8601).
    pub completed_at: String,
    /// Absolute artifacts directory.
    pub artifacts_dir: PathBuf,
    /// The tier that ended the run.
    pub final_tier: Tier,
    /// Whether the final tier produced its artifacts.
    pub succeeded: bool,
    /// Engine name.
    pub engine: String,
    /// Every attempted tier, in order.
    pub tiers: Vec<ExecutionTierResult>,
    /// Compiled stage tags, empty if nothing compiled.
    pub stage_tags: Vec<StageTag>,
    /// Per-sample input shape of the pipeline.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_shape: Option<Shape>,
    /// Pipeline fingerprint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fingerprint: Option<String>,
    /// Names of captured training metrics.
    pub metric_names: Vec<String>,
    /// Recoverable anomalies recorded during the run.
    pub warnings: Vec<ErrorRecord>,
}

impl RunManifest {
    /// Builds a manifest from the tier results.
    #[must_use]
    pub fn new(
        ctx: &RunContext,
        artifacts_dir: PathBuf,
        pipeline: Option<&CompiledPipeline>,
        tiers: Vec<ExecutionTierResult>,
    ) -> Self {
        let last = tiers.last();
        let final_tier = last.map_or(Tier::Emergency, |t| t.tier);
        let succeeded = last.is_some_and(|t| t.succeeded);
        let metric_names = tiers
            .iter()
            .rev()
            .find(|t| t.succeeded && !t.metric_names.is_empty())
            .map(|t| t.metric_names.clone())
            .unwrap_or_default();
        Self {
            run_id: ctx.run_id().to_string(),
            started_at: ctx.started_at_iso(),
            completed_at: iso_timestamp(&now_utc()),
            artifacts_dir,
            final_tier,
            succeeded,
            engine: String::new(),
            tiers,
            stage_tags: pipeline.map(CompiledPipeline::tags).unwrap_or_default(),
            input_shape: pipeline.map(|p| p.input_shape().clone()),
            fingerprint: pipeline.map(CompiledPipeline::fingerprint),
            metric_names,
            warnings: ctx.warnings().to_vec(),
        }
    }

    /// Sets the engine name.
    #[must_use]
    pub fn with_engine(mut self, engine: impl Into<String>) -> Self {
        self.engine = engine.into();
        self
    }
}
