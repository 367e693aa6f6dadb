//! Synthesized training samples.

use crate::config::LabelEncoding;
use crate::core::Shape;
use crate::errors::ExecutionError;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Random features and labels shaped for a pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleData {
    /// Per-sample shape.
    pub shape: Shape,
    /// Number of samples.
    pub count: usize,
    /// Label range.
    pub num_classes: u32,
    /// Row-major features, `count * shape.element_count()` values in `[0, 1)`.
    pub features: Vec<f32>,
    /// One class index per sample.
    pub labels: Vec<u32>,
}

impl SampleData {
    /// Builds deterministic samples from a seed.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutionError::ResourceExhausted`] when the feature buffer
    /// would exceed `max_elements` or cannot be allocated.
    pub fn synthesize(
        shape: &Shape,
        count: usize,
        num_classes: u32,
        seed: u64,
        max_elements: usize,
    ) -> Result<Self, ExecutionError> {
        let total = shape
            .checked_element_count()
            .and_then(|per_sample| per_sample.checked_mul(count))
            .filter(|&total| total <= max_elements)
            .ok_or_else(|| {
                ExecutionError::ResourceExhausted(format!(
                    "{count} samples of shape {shape} exceed the limit of {max_elements} values"
                ))
            })?;

        let mut features = Vec::new();
        let mut labels = Vec::new();
        features
            .try_reserve_exact(total)
            .and_then(|()| labels.try_reserve_exact(count))
            .map_err(|e| ExecutionError::ResourceExhausted(format!("sample buffer: {e}")))?;

        let num_classes = num_classes.max(1);
        let mut rng = StdRng::seed_from_u64(seed);
        features.extend((0..total).map(|_| rng.gen::<f32>()));
        labels.extend((0..count).map(|_| rng.gen_range(0..num_classes)));
        Ok(Self {
            shape: shape.clone(),
            count,
            num_classes,
            features,
            labels,
        })
    }

    /// Re-encodes labels as one-hot rows.
    #[must_use]
    pub fn one_hot(&self) -> Vec<Vec<f32>> {
        self.labels
            .iter()
            .map(|&label| {
                (0..self.num_classes)
                    .map(|class| if class == label { 1.0 } else { 0.0 })
                    .collect()
            })
            .collect()
    }

    /// Labels in the requested encoding, as JSON.
    #[must_use]
    pub fn encoded_labels(&self, encoding: LabelEncoding) -> Value {
        match encoding {
            LabelEncoding::Integer => serde_json::json!(self.labels),
            LabelEncoding::OneHot => serde_json::json!(self.one_hot()),
        }
    }
}
