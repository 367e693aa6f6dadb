//! Compute engine boundary.
//!
//! Numeric execution is out of process scope: the runner only hands a
//! [`CompiledPipeline`] and synthesized samples to a [`ComputeEngine`] and
//! reacts to the typed result.

mod description;
mod process;
mod samples;

pub use description::{StageRow, StructuralDescription};
pub use process::ProcessEngine;
pub use samples::SampleData;

use crate::config::TrainingPolicy;
use crate::errors::ExecutionError;
use crate::graph::CompiledPipeline;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// What a successful training run returns.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingOutcome {
    /// Metric name to per-epoch values.
    #[serde(default)]
    pub metrics: BTreeMap<String, Vec<f64>>,
    /// Opaque handle or export of the trained graph.
    #[serde(default)]
    pub graph: Option<Value>,
}

impl TrainingOutcome {
    /// Returns the metric names in sorted order.
    #[must_use]
    pub fn metric_names(&self) -> Vec<String> {
        self.metrics.keys().cloned().collect()
    }

    /// Adds a metric series.
    #[must_use]
    pub fn with_metric(mut self, name: impl Into<String>, values: Vec<f64>) -> Self {
        self.metrics.insert(name.into(), values);
        self
    }
}

/// The external service that trains or describes a pipeline.
///
/// Calls are synchronous and may block for a long time; there is no
/// cancellation hook.
#[cfg_attr(test, mockall::automock)]
pub trait ComputeEngine: Send {
    /// Name used in logs and the manifest.
    fn name(&self) -> String;

    /// Trains the pipeline on the samples under a policy.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] describing why training failed.
    fn train(
        &self,
        pipeline: &CompiledPipeline,
        samples: &SampleData,
        policy: &TrainingPolicy,
    ) -> Result<TrainingOutcome, ExecutionError>;

    /// Describes the pipeline without running it.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionError`] if the engine cannot describe it.
    fn describe(&self, pipeline: &CompiledPipeline) -> Result<StructuralDescription, ExecutionError> {
        Ok(StructuralDescription::from_pipeline(pipeline))
    }
}

/// Engine used when none is configured. Training always reports `Unavailable`.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnavailableEngine;

impl ComputeEngine for UnavailableEngine {
    fn name(&self) -> String {
        "unavailable".to_string()
    }

    fn train(
        &self,
        _pipeline: &CompiledPipeline,
        _samples: &SampleData,
        _policy: &TrainingPolicy,
    ) -> Result<TrainingOutcome, ExecutionError> {
        Err(ExecutionError::Unavailable(
            "no compute engine configured".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::graph::{GraphCompiler, Node};

    #[test]
    fn test_unavailable_engine() {
        let pipeline = GraphCompiler::default()
            .compile(&[Node::new("dense", 0)], &[], &mut RunContext::new())
            .unwrap();
        let samples =
            SampleData::synthesize(pipeline.input_shape(), 1, 10, 0, usize::MAX).unwrap();
        let engine = UnavailableEngine;

        let err = engine
            .train(&pipeline, &samples, &TrainingPolicy::default())
            .unwrap_err();
        assert!(matches!(err, ExecutionError::Unavailable(_)));
        assert_eq!(engine.describe(&pipeline).unwrap().stages.len(), pipeline.len());
    }

    #[test]
    fn test_outcome_parsing() {
        let outcome: TrainingOutcome =
            serde_json::from_str(r#"{"metrics": {"loss": [1.0], "accuracy": [0.1]}}"#).unwrap();
        assert_eq!(outcome.metric_names(), vec!["accuracy", "loss"]);
        assert!(outcome.graph.is_none());
    }
}
