//! Static catalogue of pipeline stages.
//!
//! The registry maps each [`StageTag`] to its configuration fields, default
//! values, accepted input rank and shape rule. It is built once and never
//! mutated afterwards.

mod config;
mod tags;

pub use config::{
    ActivationParams, Conv2dParams, DenseParams, DropoutParams, Padding, PoolParams,
    RecurrentParams, ReshapeParams, StageConfig, StageParams,
};
pub use tags::{NodeKind, ReservedTag, StageTag};

use crate::core::Shape;
use serde_json::{json, Map, Value};
use std::collections::BTreeMap;
use std::sync::OnceLock;
use thiserror::Error;

/// Computes a stage's output shape from its input shape and parameters.
pub type ShapeRule = fn(&Shape, &StageParams) -> Shape;

/// Input rank a stage accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputRank {
    /// Exactly this many dimensions.
    Exactly(usize),
    /// At least this many dimensions.
    AtLeast(usize),
    /// Any rank.
    Any,
}

impl InputRank {
    /// Returns true if `rank` is acceptable.
    #[must_use]
    pub fn accepts(&self, rank: usize) -> bool {
        match *self {
            Self::Exactly(expected) => rank == expected,
            Self::AtLeast(min) => rank >= min,
            Self::Any => true,
        }
    }
}

/// Immutable description of one stage type.
#[derive(Debug, Clone)]
pub struct StageSpec {
    /// The stage tag.
    pub tag: StageTag,
    /// Configuration fields the stage understands.
    pub required_fields: &'static [&'static str],
    /// Default values for those fields, keyed by wire name.
    pub defaults: Map<String, Value>,
    /// Input rank the stage accepts.
    pub accepted_ranks: InputRank,
    /// Shape rule; `None` for shape-agnostic stages.
    pub shape_rule: Option<ShapeRule>,
}

impl StageSpec {
    /// Returns true if the stage accepts an input of this rank.
    #[must_use]
    pub fn accepts(&self, rank: usize) -> bool {
        self.accepted_ranks.accepts(rank)
    }

    /// Applies the shape rule, or returns the input for shape-agnostic stages.
    #[must_use]
    pub fn output_shape(&self, input: &Shape, params: &StageParams) -> Shape {
        self.shape_rule
            .map_or_else(|| input.clone(), |rule| rule(input, params))
    }
}

/// The tag is not in the catalogue.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Stage '{tag}' is not registered")]
pub struct NotFound {
    /// The missing tag.
    pub tag: StageTag,
}

/// Catalogue of stage specs keyed by tag.
#[derive(Debug, Clone, Default)]
pub struct StageRegistry {
    specs: BTreeMap<StageTag, StageSpec>,
}

impl StageRegistry {
    /// Creates a registry with no stages.
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Creates a registry with every built-in stage.
    #[must_use]
    pub fn builtin() -> Self {
        builtin_specs()
            .into_iter()
            .fold(Self::empty(), Self::register)
    }

    /// Returns the shared built-in registry.
    pub fn global() -> &'static Self {
        static REGISTRY: OnceLock<StageRegistry> = OnceLock::new();
        REGISTRY.get_or_init(Self::builtin)
    }

    /// Adds or replaces a spec.
    #[must_use]
    pub fn register(mut self, spec: StageSpec) -> Self {
        self.specs.insert(spec.tag, spec);
        self
    }

    /// Looks up a tag.
    pub fn lookup(&self, tag: StageTag) -> Result<&StageSpec, NotFound> {
        self.specs.get(&tag).ok_or(NotFound { tag })
    }

    /// Returns true if the tag is registered.
    #[must_use]
    pub fn contains(&self, tag: StageTag) -> bool {
        self.specs.contains_key(&tag)
    }

    /// Returns the registered tags in catalogue order.
    pub fn tags(&self) -> impl Iterator<Item = StageTag> + '_ {
        self.specs.keys().copied()
    }
}

fn defaults(value: Value) -> Map<String, Value> {
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}

fn builtin_specs() -> Vec<StageSpec> {
    let pool = |tag| StageSpec {
        tag,
        required_fields: &["poolSize", "strides", "padding"],
        defaults: defaults(json!({"poolSize": 2, "strides": null, "padding": "valid"})),
        accepted_ranks: InputRank::Exactly(3),
        shape_rule: Some(pool_shape),
    };
    let recurrent = |tag| StageSpec {
        tag,
        required_fields: &["units", "activation", "recurrentActivation", "returnSequences"],
        defaults: defaults(json!({
            "units": 64,
            "activation": "tanh",
            "recurrentActivation": "sigmoid",
            "returnSequences": false,
        })),
        accepted_ranks: InputRank::Exactly(2),
        shape_rule: Some(recurrent_shape),
    };
    let agnostic = |tag, required_fields: &'static [&'static str], value| StageSpec {
        tag,
        required_fields,
        defaults: defaults(value),
        accepted_ranks: InputRank::Any,
        shape_rule: None,
    };

    vec![
        StageSpec {
            tag: StageTag::Conv2d,
            required_fields: &["filters", "kernelSize", "strides", "padding", "activation"],
            defaults: defaults(json!({
                "filters": 32,
                "kernelSize": 3,
                "strides": 1,
                "padding": "valid",
                "activation": "relu",
            })),
            accepted_ranks: InputRank::Exactly(3),
            shape_rule: Some(conv_shape),
        },
        pool(StageTag::MaxPooling2d),
        pool(StageTag::AvgPooling2d),
        StageSpec {
            tag: StageTag::Flatten,
            required_fields: &[],
            defaults: Map::new(),
            accepted_ranks: InputRank::AtLeast(1),
            shape_rule: Some(flatten_shape),
        },
        StageSpec {
            tag: StageTag::Dense,
            required_fields: &["units", "activation"],
            defaults: defaults(json!({"units": 128, "activation": "relu"})),
            accepted_ranks: InputRank::Exactly(1),
            shape_rule: Some(dense_shape),
        },
        agnostic(StageTag::Dropout, &["rate"], json!({"rate": 0.5})),
        agnostic(StageTag::BatchNorm, &[], json!({})),
        agnostic(StageTag::Activation, &["activation"], json!({"activation": "relu"})),
        recurrent(StageTag::Lstm),
        recurrent(StageTag::Gru),
        StageSpec {
            tag: StageTag::Reshape,
            required_fields: &["targetShape"],
            defaults: defaults(json!({"targetShape": [7, 7, 16]})),
            accepted_ranks: InputRank::Any,
            shape_rule: Some(reshape_shape),
        },
    ]
}

/// Output length of one spatial axis.
fn window_output(size: usize, window: u32, stride: u32, padding: Padding) -> usize {
    let window = window as usize;
    let stride = (stride as usize).max(1);
    match padding {
        Padding::Valid => (size.saturating_sub(window) / stride + 1).max(1),
        Padding::Same => size.div_ceil(stride).max(1),
    }
}

fn spatial(input: &Shape) -> (usize, usize, usize) {
    match *input.dims() {
        [h, w, c] => (h, w, c),
        [h, w] => (h, w, 1),
        _ => (input.element_count(), 1, 1),
    }
}

fn conv_shape(input: &Shape, params: &StageParams) -> Shape {
    let StageParams::Conv2d(conv) = params else {
        return input.clone();
    };
    let (h, w, _) = spatial(input);
    Shape::new(vec![
        window_output(h, conv.kernel_size[0], conv.strides[0], conv.padding),
        window_output(w, conv.kernel_size[1], conv.strides[1], conv.padding),
        conv.filters as usize,
    ])
}

fn pool_shape(input: &Shape, params: &StageParams) -> Shape {
    let (StageParams::MaxPooling2d(pool) | StageParams::AvgPooling2d(pool)) = params else {
        return input.clone();
    };
    let (h, w, c) = spatial(input);
    Shape::new(vec![
        window_output(h, pool.pool_size[0], pool.strides[0], pool.padding),
        window_output(w, pool.pool_size[1], pool.strides[1], pool.padding),
        c,
    ])
}

fn flatten_shape(input: &Shape, _params: &StageParams) -> Shape {
    input.flattened()
}

fn dense_shape(input: &Shape, params: &StageParams) -> Shape {
    match params {
        StageParams::Dense(dense) => Shape::new(vec![dense.units as usize]),
        _ => input.clone(),
    }
}

fn recurrent_shape(input: &Shape, params: &StageParams) -> Shape {
    let (StageParams::Lstm(rnn) | StageParams::Gru(rnn)) = params else {
        return input.clone();
    };
    let units = rnn.units as usize;
    if rnn.return_sequences {
        let steps = input.dims().first().copied().unwrap_or(1);
        Shape::new(vec![steps, units])
    } else {
        Shape::new(vec![units])
    }
}

fn reshape_shape(input: &Shape, params: &StageParams) -> Shape {
    match params {
        StageParams::Reshape(reshape) => reshape
            .resolve_against(input)
            .unwrap_or_else(|| input.clone()),
        _ => input.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(tag: StageTag, raw: Value) -> StageParams {
        let registry = StageRegistry::builtin();
        let mut warnings = Vec::new();
        let raw = raw.as_object().cloned().unwrap_or_default();
        StageConfig::resolve(registry.lookup(tag).unwrap(), &raw, &mut warnings).params
    }

    fn output(tag: StageTag, input: &[usize], raw: Value) -> Vec<usize> {
        let registry = StageRegistry::builtin();
        let spec = registry.lookup(tag).unwrap();
        spec.output_shape(&Shape::new(input.to_vec()), &params(tag, raw))
            .dims()
            .to_vec()
    }

    #[test]
    fn test_builtin_registers_every_tag() {
        let registry = StageRegistry::builtin();
        for tag in StageTag::ALL {
            assert!(registry.contains(tag), "{tag} missing");
        }
        assert_eq!(registry.tags().count(), StageTag::ALL.len());
    }

    #[test]
    fn test_lookup_not_found() {
        let registry = StageRegistry::empty();
        let err = registry.lookup(StageTag::Dense).unwrap_err();
        assert_eq!(err, NotFound { tag: StageTag::Dense });
        assert_eq!(err.to_string(), "Stage 'dense' is not registered");
    }

    #[test]
    fn test_register_replaces_spec() {
        let registry = StageRegistry::empty().register(StageSpec {
            tag: StageTag::Dense,
            required_fields: &["units"],
            defaults: defaults(json!({"units": 8})),
            accepted_ranks: InputRank::Any,
            shape_rule: None,
        });
        let spec = registry.lookup(StageTag::Dense).unwrap();
        assert!(spec.accepts(3));
        assert_eq!(spec.defaults.get("units"), Some(&json!(8)));
    }

    #[test]
    fn test_accepted_ranks() {
        let registry = StageRegistry::global();
        assert!(registry.lookup(StageTag::Conv2d).unwrap().accepts(3));
        assert!(!registry.lookup(StageTag::Conv2d).unwrap().accepts(1));
        assert!(registry.lookup(StageTag::Flatten).unwrap().accepts(1));
        assert!(!registry.lookup(StageTag::Dense).unwrap().accepts(2));
        assert!(registry.lookup(StageTag::Lstm).unwrap().accepts(2));
        assert!(registry.lookup(StageTag::Dropout).unwrap().accepts(5));
    }

    #[test]
    fn test_conv_and_pool_arithmetic() {
        assert_eq!(output(StageTag::Conv2d, &[28, 28, 1], json!({})), vec![26, 26, 32]);
        assert_eq!(
            output(StageTag::Conv2d, &[28, 28, 1], json!({"padding": "same", "strides": 2, "filters": 8})),
            vec![14, 14, 8]
        );
        assert_eq!(output(StageTag::MaxPooling2d, &[26, 26, 32], json!({})), vec![13, 13, 32]);
        assert_eq!(output(StageTag::AvgPooling2d, &[1, 1, 4], json!({})), vec![1, 1, 4]);
    }

    #[test]
    fn test_flatten_dense_recurrent() {
        assert_eq!(output(StageTag::Flatten, &[13, 13, 32], json!({})), vec![5408]);
        assert_eq!(output(StageTag::Dense, &[5408], json!({"units": 64})), vec![64]);
        assert_eq!(output(StageTag::Lstm, &[28, 28], json!({})), vec![64]);
        assert_eq!(
            output(StageTag::Gru, &[28, 28], json!({"returnSequences": true, "units": 16})),
            vec![28, 16]
        );
    }

    #[test]
    fn test_shape_agnostic_stages_are_identity() {
        for tag in [StageTag::Dropout, StageTag::BatchNorm, StageTag::Activation] {
            assert!(StageRegistry::global().lookup(tag).unwrap().shape_rule.is_none());
            assert_eq!(output(tag, &[7, 3], json!({})), vec![7, 3]);
        }
    }

    #[test]
    fn test_reshape_rule() {
        assert_eq!(output(StageTag::Reshape, &[784], json!({})), vec![7, 7, 16]);
        assert_eq!(
            output(StageTag::Reshape, &[28], json!({"targetShape": "(None, 7, 4)"})),
            vec![7, 4]
        );
    }
}
