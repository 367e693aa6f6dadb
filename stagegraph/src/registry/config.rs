//! Typed stage configuration.
//!
//! Raw node configs are open string-keyed maps. They are resolved here into
//! one closed variant per stage tag; keys the stage does not understand are
//! kept in [`StageConfig::extra`] and never interpreted.

use super::{StageSpec, StageTag};
use crate::core::Shape;
use crate::errors::{ErrorKind, ErrorRecord};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;

/// Keys consumed by the compiler itself rather than by a stage.
const NODE_KEYS: [&str; 3] = ["sequenceId", "index", "id"];

/// Padding mode for convolution and pooling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Padding {
    /// No padding; output shrinks.
    #[default]
    Valid,
    /// Zero padding; output is `ceil(input / stride)`.
    Same,
}

/// Convolution parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Conv2dParams {
    /// Number of output channels.
    pub filters: u32,
    /// Kernel height and width.
    pub kernel_size: [u32; 2],
    /// Stride height and width.
    pub strides: [u32; 2],
    /// Padding mode.
    pub padding: Padding,
    /// Activation function name.
    pub activation: String,
}

/// Pooling parameters (max and average).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PoolParams {
    /// Pool window height and width.
    pub pool_size: [u32; 2],
    /// Stride height and width.
    pub strides: [u32; 2],
    /// Padding mode.
    pub padding: Padding,
}

/// Fully connected layer parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DenseParams {
    /// Output width.
    pub units: u32,
    /// Activation function name.
    pub activation: String,
}

impl DenseParams {
    /// Returns true if the activation yields normalized class scores.
    #[must_use]
    pub fn is_classifier(&self) -> bool {
        matches!(self.activation.as_str(), "softmax" | "sigmoid")
    }
}

/// Dropout parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DropoutParams {
    /// Fraction of inputs dropped, in `[0, 1)`.
    pub rate: f64,
}

/// Standalone activation parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivationParams {
    /// Activation function name.
    pub activation: String,
}

/// LSTM and GRU parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecurrentParams {
    /// Hidden state width.
    pub units: u32,
    /// Output activation.
    pub activation: String,
    /// Gate activation.
    pub recurrent_activation: String,
    /// Emit the full sequence instead of the last step.
    pub return_sequences: bool,
}

/// Reshape parameters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReshapeParams {
    /// Target dimensions; at most one `None` which is inferred.
    pub target_shape: Vec<Option<usize>>,
}

impl ReshapeParams {
    /// Resolves the target against an incoming shape.
    ///
    /// Returns `None` when the element counts cannot match.
    #[must_use]
    pub fn resolve_against(&self, input: &Shape) -> Option<Shape> {
        let total = input.checked_element_count()?;
        let known = self
            .target_shape
            .iter()
            .flatten()
            .try_fold(1usize, |acc, &d| acc.checked_mul(d))?;
        let unknown = self.target_shape.iter().filter(|d| d.is_none()).count();
        match unknown {
            0 if known == total => Some(Shape::new(self.concrete(0))),
            1 if known > 0 && total % known == 0 => Some(Shape::new(self.concrete(total / known))),
            _ => None,
        }
    }

    fn concrete(&self, inferred: usize) -> Vec<usize> {
        self.target_shape.iter().map(|d| d.unwrap_or(inferred)).collect()
    }
}

/// Closed, typed parameters of a stage, one variant per tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum StageParams {
    /// Convolution.
    Conv2d(Conv2dParams),
    /// Max pooling.
    MaxPooling2d(PoolParams),
    /// Average pooling.
    AvgPooling2d(PoolParams),
    /// Flatten.
    Flatten,
    /// Fully connected.
    Dense(DenseParams),
    /// Dropout.
    Dropout(DropoutParams),
    /// Batch normalization.
    BatchNorm,
    /// Activation.
    Activation(ActivationParams),
    /// LSTM.
    Lstm(RecurrentParams),
    /// GRU.
    Gru(RecurrentParams),
    /// Reshape.
    Reshape(ReshapeParams),
}

impl StageParams {
    /// Returns the tag this variant belongs to.
    #[must_use]
    pub fn tag(&self) -> StageTag {
        match self {
            Self::Conv2d(_) => StageTag::Conv2d,
            Self::MaxPooling2d(_) => StageTag::MaxPooling2d,
            Self::AvgPooling2d(_) => StageTag::AvgPooling2d,
            Self::Flatten => StageTag::Flatten,
            Self::Dense(_) => StageTag::Dense,
            Self::Dropout(_) => StageTag::Dropout,
            Self::BatchNorm => StageTag::BatchNorm,
            Self::Activation(_) => StageTag::Activation,
            Self::Lstm(_) => StageTag::Lstm,
            Self::Gru(_) => StageTag::Gru,
            Self::Reshape(_) => StageTag::Reshape,
        }
    }
}

/// Resolved configuration of one compiled stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Typed parameters.
    pub params: StageParams,
    /// Keys the stage does not understand, preserved verbatim.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: BTreeMap<String, Value>,
}

impl StageConfig {
    /// Wraps parameters with no extra keys.
    #[must_use]
    pub fn new(params: StageParams) -> Self {
        Self {
            params,
            extra: BTreeMap::new(),
        }
    }

    /// Merges `raw` over the spec defaults and resolves typed parameters.
    ///
    /// Explicit values always win. A value of the wrong type falls back to the
    /// default and a `MalformedConfig` warning is pushed.
    pub fn resolve(spec: &StageSpec, raw: &Map<String, Value>, warnings: &mut Vec<ErrorRecord>) -> Self {
        let mut merged = spec.defaults.clone();
        let mut extra = BTreeMap::new();
        for (key, value) in raw {
            if NODE_KEYS.contains(&key.as_str()) {
                continue;
            }
            if spec.required_fields.contains(&key.as_str()) {
                merged.insert(key.clone(), value.clone());
            } else {
                extra.insert(key.clone(), value.clone());
            }
        }

        let mut fields = FieldReader {
            tag: spec.tag,
            merged: &merged,
            defaults: &spec.defaults,
            warnings,
        };
        let params = match spec.tag {
            StageTag::Conv2d => StageParams::Conv2d(Conv2dParams {
                filters: fields.read("filters", parse_positive, 32),
                kernel_size: fields.read("kernelSize", parse_pair, [3, 3]),
                strides: fields.read("strides", parse_pair, [1, 1]),
                padding: fields.read("padding", parse_padding, Padding::Valid),
                activation: fields.read("activation", parse_name, "relu".to_string()),
            }),
            StageTag::MaxPooling2d => StageParams::MaxPooling2d(fields.pool()),
            StageTag::AvgPooling2d => StageParams::AvgPooling2d(fields.pool()),
            StageTag::Flatten => StageParams::Flatten,
            StageTag::Dense => StageParams::Dense(DenseParams {
                units: fields.read("units", parse_positive, 128),
                activation: fields.read("activation", parse_name, "relu".to_string()),
            }),
            StageTag::Dropout => StageParams::Dropout(DropoutParams {
                rate: fields.read("rate", parse_rate, 0.5),
            }),
            StageTag::BatchNorm => StageParams::BatchNorm,
            StageTag::Activation => StageParams::Activation(ActivationParams {
                activation: fields.read("activation", parse_name, "relu".to_string()),
            }),
            StageTag::Lstm => StageParams::Lstm(fields.recurrent()),
            StageTag::Gru => StageParams::Gru(fields.recurrent()),
            StageTag::Reshape => StageParams::Reshape(ReshapeParams {
                target_shape: fields.read(
                    "targetShape",
                    parse_target_shape,
                    vec![Some(7), Some(7), Some(16)],
                ),
            }),
        };

        Self { params, extra }
    }
}

struct FieldReader<'a> {
    tag: StageTag,
    merged: &'a Map<String, Value>,
    defaults: &'a Map<String, Value>,
    warnings: &'a mut Vec<ErrorRecord>,
}

impl FieldReader<'_> {
    fn read<T>(&mut self, key: &str, parse: fn(&Value) -> Option<T>, fallback: T) -> T {
        if let Some(value) = self.merged.get(key).and_then(parse) {
            return value;
        }
        if let Some(raw) = self.merged.get(key) {
            self.warnings.push(
                ErrorRecord::new(
                    ErrorKind::MalformedConfig,
                    format!("field '{key}' has unusable value {raw}; using default"),
                )
                .with_stage(self.tag),
            );
        }
        self.defaults.get(key).and_then(parse).unwrap_or(fallback)
    }

    fn pool(&mut self) -> PoolParams {
        let pool_size = self.read("poolSize", parse_pair, [2, 2]);
        // null strides mean "same as the window"
        let strides = match self.merged.get("strides") {
            None | Some(Value::Null) => pool_size,
            Some(_) => self.read("strides", parse_pair, pool_size),
        };
        PoolParams {
            pool_size,
            strides,
            padding: self.read("padding", parse_padding, Padding::Valid),
        }
    }

    fn recurrent(&mut self) -> RecurrentParams {
        RecurrentParams {
            units: self.read("units", parse_positive, 64),
            activation: self.read("activation", parse_name, "tanh".to_string()),
            recurrent_activation: self.read("recurrentActivation", parse_name, "sigmoid".to_string()),
            return_sequences: self.read("returnSequences", Value::as_bool, false),
        }
    }
}

fn parse_positive(value: &Value) -> Option<u32> {
    let n = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    }?;
    u32::try_from(n).ok().filter(|n| *n > 0)
}

fn integer_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"-?\d+").unwrap_or_else(|_| unreachable!()))
}

/// Accepts `3`, `[3]`, `[3, 2]` or tuple strings like `"(2, 2)"`.
fn parse_pair(value: &Value) -> Option<[u32; 2]> {
    let numbers: Vec<u32> = match value {
        Value::Number(_) => vec![parse_positive(value)?],
        Value::Array(items) => items.iter().map(parse_positive).collect::<Option<_>>()?,
        Value::String(s) => integer_pattern()
            .find_iter(s)
            .map(|m| m.as_str().parse::<u32>().ok().filter(|n| *n > 0))
            .collect::<Option<_>>()?,
        _ => return None,
    };
    match numbers.as_slice() {
        [n] => Some([*n, *n]),
        [h, w] => Some([*h, *w]),
        _ => None,
    }
}

fn parse_padding(value: &Value) -> Option<Padding> {
    match value.as_str()?.to_ascii_lowercase().as_str() {
        "valid" => Some(Padding::Valid),
        "same" => Some(Padding::Same),
        _ => None,
    }
}

fn parse_name(value: &Value) -> Option<String> {
    value
        .as_str()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_rate(value: &Value) -> Option<f64> {
    let rate = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }?;
    (0.0..1.0).contains(&rate).then_some(rate)
}

/// Accepts arrays (`[7, 7, 16]`, `[-1, 4]`) or tuple strings (`"(None, 7, 4)"`).
///
/// In a tuple string a leading `None` is the batch dimension and is dropped.
/// Any other `None`, `null` or `-1` is inferred later; at most one is allowed.
fn parse_target_shape(value: &Value) -> Option<Vec<Option<usize>>> {
    let dims: Vec<Option<usize>> = match value {
        Value::Array(items) => items.iter().map(parse_dim).collect::<Option<_>>()?,
        Value::String(s) => {
            let inner = s.trim().trim_start_matches(['(', '[']).trim_end_matches([')', ']']);
            let mut tokens: Vec<&str> = inner
                .split(',')
                .map(str::trim)
                .filter(|t| !t.is_empty())
                .collect();
            if tokens.first() == Some(&"None") {
                tokens.remove(0);
            }
            tokens
                .into_iter()
                .map(|t| match t {
                    "None" | "null" | "-1" => Some(None),
                    other => other.parse::<usize>().ok().filter(|d| *d > 0).map(Some),
                })
                .collect::<Option<_>>()?
        }
        _ => return None,
    };
    let unknown = dims.iter().filter(|d| d.is_none()).count();
    (!dims.is_empty() && unknown <= 1).then_some(dims)
}

fn parse_dim(value: &Value) -> Option<Option<usize>> {
    match value {
        Value::Null => Some(None),
        Value::Number(n) if n.as_i64() == Some(-1) => Some(None),
        Value::Number(n) => n
            .as_u64()
            .and_then(|d| usize::try_from(d).ok())
            .filter(|d| *d > 0)
            .map(Some),
        _ => None,
    }
}
