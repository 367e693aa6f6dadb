//! Compiled pipeline types.

use crate::core::Shape;
use crate::registry::{StageConfig, StageParams, StageTag};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;

/// Where a compiled stage came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum StageOrigin {
    /// An authored node, by id.
    Node(String),
    /// Inserted to bridge a rank mismatch.
    Adapter,
    /// Part of the minimal pipeline used when nothing compiled.
    Fallback,
    /// The appended classification head.
    Classifier,
}

impl fmt::Display for StageOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Node(id) => write!(f, "node {id}"),
            Self::Adapter => write!(f, "adapter"),
            Self::Fallback => write!(f, "fallback"),
            Self::Classifier => write!(f, "classifier"),
        }
    }
}

/// One stage of a compiled pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledStage {
    /// Stage tag.
    pub tag: StageTag,
    /// Resolved configuration.
    pub config: StageConfig,
    /// Shape entering the stage.
    pub input_shape: Option<Shape>,
    /// Shape leaving the stage.
    pub output_shape: Option<Shape>,
    /// Provenance.
    pub origin: StageOrigin,
}

impl CompiledStage {
    /// Returns true for a dense stage with a normalized-probability activation.
    #[must_use]
    pub fn is_classifier(&self) -> bool {
        matches!(&self.config.params, StageParams::Dense(dense) if dense.is_classifier())
    }
}

/// An ordered, non-empty list of stages ending in a classifier.
///
/// Built only by [`GraphCompiler`](super::GraphCompiler) and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledPipeline {
    stages: Vec<CompiledStage>,
    input_shape: Shape,
    ends_in_classifier: bool,
}

impl CompiledPipeline {
    pub(crate) fn new(stages: Vec<CompiledStage>, input_shape: Shape) -> Self {
        let ends_in_classifier = stages.last().is_some_and(CompiledStage::is_classifier);
        Self {
            stages,
            input_shape,
            ends_in_classifier,
        }
    }

    /// Returns the stages in execution order.
    #[must_use]
    pub fn stages(&self) -> &[CompiledStage] {
        &self.stages
    }

    /// Returns the stage tags in execution order.
    #[must_use]
    pub fn tags(&self) -> Vec<StageTag> {
        self.stages.iter().map(|s| s.tag).collect()
    }

    /// Returns the shape the pipeline expects per sample.
    #[must_use]
    pub fn input_shape(&self) -> &Shape {
        &self.input_shape
    }

    /// Returns the shape of the final stage's output.
    #[must_use]
    pub fn output_shape(&self) -> Option<&Shape> {
        self.stages.last().and_then(|s| s.output_shape.as_ref())
    }

    /// Returns true if the last stage is classification-capable.
    #[must_use]
    pub fn ends_in_classifier(&self) -> bool {
        self.ends_in_classifier
    }

    /// Returns the number of stages.
    #[must_use]
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Returns true if there are no stages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// SHA-256 hex digest of the canonical JSON form.
    #[must_use]
    pub fn fingerprint(&self) -> String {
        let bytes = serde_json::to_vec(self).unwrap_or_default();
        hex::encode(Sha256::digest(&bytes))
    }
}
