//! Run configuration.

use crate::core::Shape;
use crate::errors::InputError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Objective function handed to the compute engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LossFunction {
    /// Cross-entropy over integer labels.
    SparseCategoricalCrossentropy,
    /// Cross-entropy over one-hot labels.
    CategoricalCrossentropy,
}

impl fmt::Display for LossFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::SparseCategoricalCrossentropy => write!(f, "sparse_categorical_crossentropy"),
            Self::CategoricalCrossentropy => write!(f, "categorical_crossentropy"),
        }
    }
}

/// How sample labels are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelEncoding {
    /// One integer class index per sample.
    Integer,
    /// One probability row per sample.
    OneHot,
}

/// Training settings for one tier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingPolicy {
    /// Optimizer name.
    #[serde(default = "default_optimizer")]
    pub optimizer: String,
    /// Objective function.
    #[serde(default = "default_loss")]
    pub loss: LossFunction,
    /// Label encoding; must agree with `loss`.
    #[serde(default = "default_label_encoding")]
    pub label_encoding: LabelEncoding,
    /// Number of passes over the samples.
    #[serde(default = "default_epochs")]
    pub epochs: u32,
    /// Samples per step.
    #[serde(default = "default_batch_size")]
    pub batch_size: u32,
    /// Fraction of samples held out for validation.
    #[serde(default = "default_validation_split")]
    pub validation_split: f64,
}

fn default_optimizer() -> String {
    "adam".to_string()
}

fn default_loss() -> LossFunction {
    LossFunction::SparseCategoricalCrossentropy
}

fn default_label_encoding() -> LabelEncoding {
    LabelEncoding::Integer
}

fn default_epochs() -> u32 {
    5
}

fn default_batch_size() -> u32 {
    32
}

fn default_validation_split() -> f64 {
    0.2
}

impl Default for TrainingPolicy {
    fn default() -> Self {
        Self {
            optimizer: default_optimizer(),
            loss: default_loss(),
            label_encoding: default_label_encoding(),
            epochs: default_epochs(),
            batch_size: default_batch_size(),
            validation_split: default_validation_split(),
        }
    }
}

impl TrainingPolicy {
    /// The alternate policy used by the Reduced tier.
    ///
    /// Labels are re-encoded one-hot, the loss switches to categorical
    /// cross-entropy and training is capped at a single epoch.
    #[must_use]
    pub fn reduced(&self) -> Self {
        Self {
            loss: LossFunction::CategoricalCrossentropy,
            label_encoding: LabelEncoding::OneHot,
            epochs: self.epochs.min(1),
            ..self.clone()
        }
    }

    /// Sets the number of epochs.
    #[must_use]
    pub fn with_epochs(mut self, epochs: u32) -> Self {
        self.epochs = epochs;
        self
    }

    /// Sets the loss and its matching label encoding.
    #[must_use]
    pub fn with_loss(mut self, loss: LossFunction, label_encoding: LabelEncoding) -> Self {
        self.loss = loss;
        self.label_encoding = label_encoding;
        self
    }
}

/// Settings for one run. Every field has a default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Output width of the appended classifier and label range.
    #[serde(default = "default_num_classes")]
    pub num_classes: u32,
    /// Number of synthesized samples.
    #[serde(default = "default_sample_count")]
    pub sample_count: usize,
    /// Upper bound on synthesized feature values across all samples.
    #[serde(default = "default_max_sample_elements")]
    pub max_sample_elements: usize,
    /// Seed for sample synthesis.
    #[serde(default = "default_seed")]
    pub seed: u64,
    /// Input shape when neither the flag nor a data-source node decides.
    #[serde(default = "default_input_shape")]
    pub default_input_shape: Shape,
    /// Feature count for a tabular data source without `inputFeatures`.
    #[serde(default = "default_tabular_input_features")]
    pub tabular_input_features: usize,
    /// Number of placeholder records in the emergency artifact.
    #[serde(default = "default_emergency_placeholder_count")]
    pub emergency_placeholder_count: usize,
    /// Name of the "latest" link under the output directory.
    #[serde(default = "default_latest_link_name")]
    pub latest_link_name: String,
    /// Full-run training policy (its fields sit at the top level).
    #[serde(flatten)]
    pub policy: TrainingPolicy,
}

fn default_num_classes() -> u32 {
    10
}

fn default_sample_count() -> usize {
    100
}

fn default_max_sample_elements() -> usize {
    64 * 1024 * 1024
}

fn default_seed() -> u64 {
    42
}

fn default_input_shape() -> Shape {
    Shape::image_default()
}

fn default_tabular_input_features() -> usize {
    4
}

fn default_emergency_placeholder_count() -> usize {
    10
}

fn default_latest_link_name() -> String {
    "latest".to_string()
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            num_classes: default_num_classes(),
            sample_count: default_sample_count(),
            max_sample_elements: default_max_sample_elements(),
            seed: default_seed(),
            default_input_shape: default_input_shape(),
            tabular_input_features: default_tabular_input_features(),
            emergency_placeholder_count: default_emergency_placeholder_count(),
            latest_link_name: default_latest_link_name(),
            policy: TrainingPolicy::default(),
        }
    }
}

impl RunConfig {
    /// Creates a configuration with defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a configuration from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if the file cannot be read or parsed.
    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path).map_err(|source| InputError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self =
            serde_json::from_str(&text).map_err(|e| InputError::malformed(path, e.to_string()))?;
        let num_classes = config.num_classes;
        Ok(config.with_num_classes(num_classes))
    }

    /// Sets the number of classes.
    #[must_use]
    pub fn with_num_classes(mut self, num_classes: u32) -> Self {
        self.num_classes = num_classes.max(1);
        self
    }

    /// Sets the number of synthesized samples.
    #[must_use]
    pub fn with_sample_count(mut self, sample_count: usize) -> Self {
        self.sample_count = sample_count;
        self
    }

    /// Sets the limit on synthesized feature values.
    #[must_use]
    pub fn with_max_sample_elements(mut self, limit: usize) -> Self {
        self.max_sample_elements = limit;
        self
    }

    /// Sets the synthesis seed.
    #[must_use]
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Sets the default input shape.
    #[must_use]
    pub fn with_default_input_shape(mut self, shape: Shape) -> Self {
        self.default_input_shape = shape;
        self
    }

    /// Sets the emergency placeholder count.
    #[must_use]
    pub fn with_emergency_placeholder_count(mut self, count: usize) -> Self {
        self.emergency_placeholder_count = count;
        self
    }

    /// Sets the "latest" link name.
    #[must_use]
    pub fn with_latest_link_name(mut self, name: impl Into<String>) -> Self {
        self.latest_link_name = name.into();
        self
    }

    /// Sets the full-run training policy.
    #[must_use]
    pub fn with_policy(mut self, policy: TrainingPolicy) -> Self {
        self.policy = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = RunConfig::default();
        assert_eq!(config.num_classes, 10);
        assert_eq!(config.sample_count, 100);
        assert_eq!(config.policy.epochs, 5);
        assert_eq!(config.policy.batch_size, 32);
        assert_eq!(config.policy.loss, LossFunction::SparseCategoricalCrossentropy);
        assert_eq!(config.default_input_shape, Shape::new(vec![28, 28, 1]));
        assert_eq!(config.latest_link_name, "latest");
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RunConfig = serde_json::from_str(r#"{"num_classes": 3, "epochs": 2}"#).unwrap();
        assert_eq!(config.num_classes, 3);
        assert_eq!(config.policy.epochs, 2);
        assert_eq!(config.policy.batch_size, 32);
        assert_eq!(config.seed, 42);
    }

    #[test]
    fn test_reduced_policy() {
        let reduced = TrainingPolicy::default().reduced();
        assert_eq!(reduced.loss, LossFunction::CategoricalCrossentropy);
        assert_eq!(reduced.label_encoding, LabelEncoding::OneHot);
        assert_eq!(reduced.epochs, 1);
        assert_eq!(reduced.optimizer, "adam");
        assert_eq!(LossFunction::CategoricalCrossentropy.to_string(), "categorical_crossentropy");
    }

    #[test]
    fn test_from_path() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"sample_count": 12, "loss": "categorical_crossentropy"}}"#).unwrap();

        let config = RunConfig::from_path(file.path()).unwrap();
        assert_eq!(config.sample_count, 12);
        assert_eq!(config.policy.loss, LossFunction::CategoricalCrossentropy);
    }

    #[test]
    fn test_from_path_errors() {
        let missing = RunConfig::from_path(Path::new("/nonexistent/stagegraph.json"));
        assert!(matches!(missing, Err(InputError::Unreadable { .. })));

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        assert!(matches!(
            RunConfig::from_path(file.path()),
            Err(InputError::Malformed { .. })
        ));
    }

    #[test]
    fn test_from_path_clamps_num_classes() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"num_classes": 0, "max_sample_elements": 500}}"#).unwrap();

        let config = RunConfig::from_path(file.path()).unwrap();
        assert_eq!(config.num_classes, 1);
        assert_eq!(config.max_sample_elements, 500);
    }

    #[test]
    fn test_builders() {
        let config = RunConfig::new()
            .with_num_classes(0)
            .with_seed(7)
            .with_default_input_shape(Shape::new(vec![16]))
            .with_emergency_placeholder_count(3)
            .with_latest_link_name("current")
            .with_policy(
                TrainingPolicy::default()
                    .with_epochs(2)
                    .with_loss(LossFunction::CategoricalCrossentropy, LabelEncoding::OneHot),
            );

        assert_eq!(config.num_classes, 1);
        assert_eq!(config.seed, 7);
        assert_eq!(config.default_input_shape, Shape::new(vec![16]));
        assert_eq!(config.emergency_placeholder_count, 3);
        assert_eq!(config.latest_link_name, "current");
        assert_eq!(config.policy.epochs, 2);
        assert_eq!(config.policy.label_encoding, LabelEncoding::OneHot);
    }
}
