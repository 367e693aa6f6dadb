//! Graph compilation.

use super::input::{Edge, Node};
use super::order::resolve_order;
use super::pipeline::{CompiledPipeline, CompiledStage, StageOrigin};
use crate::config::RunConfig;
use crate::context::RunContext;
use crate::core::Shape;
use crate::errors::{ErrorKind, ErrorRecord, GraphError};
use crate::registry::{InputRank, NodeKind, StageConfig, StageParams, StageRegistry, StageSpec, StageTag};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use tracing::{debug, info};

/// Settings that shape a compilation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompileOptions {
    /// Shape entering the first stage.
    pub input_shape: Shape,
    /// Output width of the appended classifier.
    pub num_classes: u32,
}

impl Default for CompileOptions {
    fn default() -> Self {
        Self {
            input_shape: Shape::image_default(),
            num_classes: 10,
        }
    }
}

impl CompileOptions {
    /// Derives options from the run configuration.
    #[must_use]
    pub fn from_config(config: &RunConfig, input_shape: Shape) -> Self {
        Self {
            input_shape,
            num_classes: config.num_classes.max(1),
        }
    }

    /// Sets the input shape.
    #[must_use]
    pub fn with_input_shape(mut self, shape: Shape) -> Self {
        self.input_shape = shape;
        self
    }

    /// Sets the classifier width.
    #[must_use]
    pub fn with_num_classes(mut self, num_classes: u32) -> Self {
        self.num_classes = num_classes.max(1);
        self
    }
}

/// Turns raw nodes and edges into a [`CompiledPipeline`].
///
/// Compilation is a pure function of its inputs: the same nodes, edges and
/// options always yield the same pipeline.
#[derive(Debug, Clone)]
pub struct GraphCompiler<'r> {
    registry: &'r StageRegistry,
    options: CompileOptions,
}

impl Default for GraphCompiler<'static> {
    fn default() -> Self {
        Self::new(StageRegistry::global(), CompileOptions::default())
    }
}

impl<'r> GraphCompiler<'r> {
    /// Creates a compiler over a registry.
    #[must_use]
    pub fn new(registry: &'r StageRegistry, options: CompileOptions) -> Self {
        Self { registry, options }
    }

    /// Returns the options.
    #[must_use]
    pub fn options(&self) -> &CompileOptions {
        &self.options
    }

    /// Compiles a graph.
    ///
    /// Recoverable anomalies are recorded on `ctx` and never fail the call.
    ///
    /// # Errors
    ///
    /// Returns [`GraphError::EmptyInput`] when `nodes` is empty and
    /// [`GraphError::Cycle`] when the edges cannot be ordered.
    pub fn compile(
        &self,
        nodes: &[Node],
        edges: &[Edge],
        ctx: &mut RunContext,
    ) -> Result<CompiledPipeline, GraphError> {
        if nodes.is_empty() {
            return Err(GraphError::EmptyInput);
        }

        let mut warnings = Vec::new();
        let (retained, filtered_ids) = self.filter(nodes, &mut warnings);
        let order = match resolve_order(&retained, edges, &filtered_ids, &mut warnings) {
            Ok(order) => order,
            Err(err) => {
                ctx.record_warnings(warnings);
                return Err(err);
            }
        };

        let mut builder = StageListBuilder::new(self, self.options.input_shape.clone());
        for index in order {
            builder.push_node(&retained[index], &mut warnings);
        }
        if builder.stages.is_empty() {
            debug!("No stages compiled; substituting fallback pipeline");
            builder.push_fallback(&mut warnings);
        }
        builder.push_classifier(&mut warnings);

        ctx.record_warnings(warnings);
        let pipeline = CompiledPipeline::new(builder.stages, self.options.input_shape.clone());
        info!(
            run_id = %ctx.run_id(),
            stages = pipeline.len(),
            input_shape = %pipeline.input_shape(),
            "Compiled pipeline"
        );
        Ok(pipeline)
    }

    /// Keeps stage nodes the registry knows. Returns them with the ids of
    /// every node that was dropped.
    fn filter(&self, nodes: &[Node], warnings: &mut Vec<ErrorRecord>) -> (Vec<Node>, HashSet<String>) {
        let mut retained = Vec::new();
        let mut filtered = HashSet::new();
        for node in nodes {
            match &node.kind {
                NodeKind::Stage(tag) if self.registry.contains(*tag) => retained.push(node.clone()),
                NodeKind::Reserved(_) => {
                    filtered.insert(node.id.clone());
                }
                other => {
                    warnings.push(ErrorRecord::new(
                        ErrorKind::UnknownStageType,
                        format!("dropping node '{}' of unknown type '{}'", node.id, other.as_str()),
                    ));
                    filtered.insert(node.id.clone());
                }
            }
        }
        (retained, filtered)
    }

    /// Looks up a spec for a stage the compiler inserts itself.
    fn internal_spec(&self, tag: StageTag) -> Option<&StageSpec> {
        self.registry
            .lookup(tag)
            .or_else(|_| StageRegistry::global().lookup(tag))
            .ok()
    }
}

/// Accumulates stages while tracking the running shape.
struct StageListBuilder<'c, 'r> {
    compiler: &'c GraphCompiler<'r>,
    current: Shape,
    stages: Vec<CompiledStage>,
}

impl<'c, 'r> StageListBuilder<'c, 'r> {
    fn new(compiler: &'c GraphCompiler<'r>, input: Shape) -> Self {
        Self {
            compiler,
            current: input,
            stages: Vec::new(),
        }
    }

    fn push_node(&mut self, node: &Node, warnings: &mut Vec<ErrorRecord>) {
        let NodeKind::Stage(tag) = node.kind else {
            return;
        };
        let spec = match self.compiler.registry.lookup(tag) {
            Ok(spec) => spec,
            Err(err) => {
                warnings.push(ErrorRecord::new(ErrorKind::UnknownStageType, err.to_string()).with_stage(tag));
                return;
            }
        };

        let mut config_warnings = Vec::new();
        let config = StageConfig::resolve(spec, &node.config, &mut config_warnings);
        warnings.extend(
            config_warnings
                .into_iter()
                .map(|w| ErrorRecord { message: format!("{} ({})", w.message, node.id), ..w }),
        );

        if !spec.accepts(self.current.rank()) {
            match adapter_target(&self.current, spec.accepted_ranks) {
                Some(adapter) => {
                    warnings.push(
                        ErrorRecord::new(
                            ErrorKind::ShapeMismatch,
                            format!(
                                "'{}' cannot take {}; inserted {} adapter",
                                node.id, self.current, adapter.0
                            ),
                        )
                        .with_stage(tag),
                    );
                    self.push_internal(adapter.0, adapter.1, StageOrigin::Adapter, warnings);
                }
                None => {
                    warnings.push(
                        ErrorRecord::new(
                            ErrorKind::ShapeMismatch,
                            format!("'{}' cannot take {}; skipping it", node.id, self.current),
                        )
                        .with_stage(tag),
                    );
                    return;
                }
            }
        }

        if let StageParams::Reshape(reshape) = &config.params {
            if reshape.resolve_against(&self.current).is_none() {
                warnings.push(
                    ErrorRecord::new(
                        ErrorKind::ShapeMismatch,
                        format!(
                            "'{}' cannot reshape {} into {:?}; skipping it",
                            node.id, self.current, reshape.target_shape
                        ),
                    )
                    .with_stage(tag),
                );
                return;
            }
        }

        let output = spec.output_shape(&self.current, &config.params);
        self.push(tag, config, output, StageOrigin::Node(node.id.clone()));
    }

    /// Minimal pipeline used when nothing compiled.
    fn push_fallback(&mut self, warnings: &mut Vec<ErrorRecord>) {
        if self.current.is_spatial() {
            self.push_internal(StageTag::Conv2d, Map::new(), StageOrigin::Fallback, warnings);
            self.push_internal(StageTag::Flatten, Map::new(), StageOrigin::Adapter, warnings);
        } else {
            self.push_internal(StageTag::Flatten, Map::new(), StageOrigin::Adapter, warnings);
            self.push_internal(StageTag::Dense, Map::new(), StageOrigin::Fallback, warnings);
        }
    }

    /// Appends the classification head unless the last stage already is one.
    fn push_classifier(&mut self, warnings: &mut Vec<ErrorRecord>) {
        if self.stages.last().is_some_and(CompiledStage::is_classifier) {
            return;
        }
        if self.current.rank() != 1 {
            self.push_internal(StageTag::Flatten, Map::new(), StageOrigin::Adapter, warnings);
        }
        let mut raw = Map::new();
        raw.insert("units".to_string(), json!(self.compiler.options.num_classes));
        raw.insert("activation".to_string(), json!("softmax"));
        self.push_internal(StageTag::Dense, raw, StageOrigin::Classifier, warnings);
    }

    fn push_internal(
        &mut self,
        tag: StageTag,
        raw: Map<String, Value>,
        origin: StageOrigin,
        warnings: &mut Vec<ErrorRecord>,
    ) {
        let Some(spec) = self.compiler.internal_spec(tag) else {
            return;
        };
        let mut config_warnings = Vec::new();
        let config = StageConfig::resolve(spec, &raw, &mut config_warnings);
        warnings.extend(
            config_warnings
                .into_iter()
                .map(|w| ErrorRecord { message: format!("{} ({origin})", w.message), ..w }),
        );
        let output = spec.output_shape(&self.current, &config.params);
        self.push(tag, config, output, origin);
    }

    fn push(&mut self, tag: StageTag, config: StageConfig, output: Shape, origin: StageOrigin) {
        debug!(stage = %tag, origin = %origin, output = %output, "Compiled stage");
        let input = std::mem::replace(&mut self.current, output.clone());
        self.stages.push(CompiledStage {
            tag,
            config,
            input_shape: Some(input),
            output_shape: Some(output),
            origin,
        });
    }
}

/// Adapter bridging `current` to a stage that wants `wanted`.
fn adapter_target(current: &Shape, wanted: InputRank) -> Option<(StageTag, Map<String, Value>)> {
    let target_rank = match wanted {
        InputRank::Exactly(rank) | InputRank::AtLeast(rank) => rank,
        InputRank::Any => return None,
    };
    let dims = current.dims();
    let target: Vec<usize> = match (target_rank, dims) {
        (1, _) => return Some((StageTag::Flatten, Map::new())),
        (2, [n]) => vec![*n, 1],
        (2, [head, rest @ ..]) => vec![*head, rest.iter().product()],
        (3, [n]) => vec![*n, 1, 1],
        (3, [t, f]) => vec![*t, *f, 1],
        (3, [h, w, rest @ ..]) => vec![*h, *w, rest.iter().product()],
        _ => return None,
    };
    let mut raw = Map::new();
    raw.insert("targetShape".to_string(), json!(target));
    Some((StageTag::Reshape, raw))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::CollectingEventSink;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use std::sync::Arc;

    fn compile_with(
        shape: &[usize],
        nodes: &[Node],
        edges: &[Edge],
    ) -> (Result<CompiledPipeline, GraphError>, RunContext) {
        let options = CompileOptions::default().with_input_shape(Shape::new(shape.to_vec()));
        let compiler = GraphCompiler::new(StageRegistry::global(), options);
        let mut ctx = RunContext::new();
        let result = compiler.compile(nodes, edges, &mut ctx);
        (result, ctx)
    }

    fn shapes(pipeline: &CompiledPipeline) -> Vec<Vec<usize>> {
        pipeline
            .stages()
            .iter()
            .map(|s| s.output_shape.as_ref().unwrap().dims().to_vec())
            .collect()
    }

    #[test]
    fn test_flatten_dense_example() {
        let nodes = vec![
            Node::new("flatten", 0),
            Node::new("dense", 1).with_config(json!({"sequenceId": 1, "units": 64})),
        ];
        let edges = vec![Edge::new("flatten-0", "dense-1")];

        let (result, ctx) = compile_with(&[28, 28, 1], &nodes, &edges);
        let pipeline = result.unwrap();

        assert_eq!(pipeline.tags(), vec![StageTag::Flatten, StageTag::Dense, StageTag::Dense]);
        assert_eq!(shapes(&pipeline), vec![vec![784], vec![64], vec![10]]);
        assert_eq!(pipeline.stages()[2].origin, StageOrigin::Classifier);
        assert!(pipeline.ends_in_classifier());
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_empty_input_is_fatal() {
        let (result, _) = compile_with(&[28, 28, 1], &[], &[]);
        assert_eq!(result.unwrap_err(), GraphError::EmptyInput);
    }

    #[test]
    fn test_cycle_is_fatal() {
        let nodes = vec![Node::new("dense", 0), Node::new("dense", 1)];
        let edges = vec![Edge::new("dense-0", "dense-1"), Edge::new("dense-1", "dense-0")];
        let (result, _) = compile_with(&[4], &nodes, &edges);
        assert_eq!(
            result.unwrap_err(),
            GraphError::cycle(vec!["dense-0".into(), "dense-1".into()])
        );
    }

    #[test]
    fn test_only_reserved_nodes_use_fallback() {
        let nodes = vec![Node::new("mnist", 0), Node::new("trainButton", 1)];
        let (result, ctx) = compile_with(&[28, 28, 1], &nodes, &[]);
        let pipeline = result.unwrap();

        assert_eq!(pipeline.tags(), vec![StageTag::Conv2d, StageTag::Flatten, StageTag::Dense]);
        assert_eq!(pipeline.stages()[0].origin, StageOrigin::Fallback);
        assert!(pipeline.ends_in_classifier());
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_fallback_for_flat_input() {
        let nodes = vec![Node::new("useData", 0)];
        let (result, _) = compile_with(&[4], &nodes, &[]);
        let pipeline = result.unwrap();

        assert_eq!(pipeline.tags(), vec![StageTag::Flatten, StageTag::Dense, StageTag::Dense]);
        assert_eq!(shapes(&pipeline), vec![vec![4], vec![128], vec![10]]);
    }

    #[test]
    fn test_unknown_type_dropped_with_warning() {
        let sink = Arc::new(CollectingEventSink::new());
        let nodes = vec![Node::new("optimizer", 0), Node::new("dense", 1)];
        let options = CompileOptions::default().with_input_shape(Shape::new(vec![8]));
        let mut ctx = RunContext::new().with_sink(sink.clone());

        let pipeline = GraphCompiler::new(StageRegistry::global(), options)
            .compile(&nodes, &[], &mut ctx)
            .unwrap();

        assert_eq!(pipeline.tags(), vec![StageTag::Dense, StageTag::Dense]);
        assert_eq!(ctx.warnings()[0].kind, ErrorKind::UnknownStageType);
        assert_eq!(sink.events_of_type("compile.warning").len(), 1);
    }

    #[test]
    fn test_spatial_to_sequence_adapter() {
        let nodes = vec![Node::new("lstm", 0)];
        let (result, ctx) = compile_with(&[28, 28, 1], &nodes, &[]);
        let pipeline = result.unwrap();

        assert_eq!(pipeline.tags(), vec![StageTag::Reshape, StageTag::Lstm, StageTag::Dense]);
        assert_eq!(shapes(&pipeline), vec![vec![28, 28], vec![64], vec![10]]);
        assert_eq!(pipeline.stages()[0].origin, StageOrigin::Adapter);
        assert_eq!(ctx.warnings()[0].kind, ErrorKind::ShapeMismatch);
        assert_eq!(ctx.warnings()[0].stage_tag, Some(StageTag::Lstm));
    }

    #[test]
    fn test_dense_after_conv_gets_flatten() {
        let nodes = vec![
            Node::new("conv2d", 0),
            Node::new("maxPooling2d", 1),
            Node::new("dense", 2).with_config(json!({"units": 32})),
        ];
        let (result, _) = compile_with(&[28, 28, 1], &nodes, &[]);
        let pipeline = result.unwrap();

        assert_eq!(
            pipeline.tags(),
            vec![
                StageTag::Conv2d,
                StageTag::MaxPooling2d,
                StageTag::Flatten,
                StageTag::Dense,
                StageTag::Dense
            ]
        );
        assert_eq!(shapes(&pipeline)[2], vec![13 * 13 * 32]);
    }

    #[test]
    fn test_flat_input_to_conv_gets_reshape() {
        let nodes = vec![Node::new("conv2d", 0).with_config(json!({"kernelSize": 1}))];
        let (result, _) = compile_with(&[16], &nodes, &[]);
        let pipeline = result.unwrap();

        let shapes = shapes(&pipeline);
        assert_eq!(shapes[0], vec![16, 1, 1]);
        assert_eq!(shapes[1], vec![16, 1, 32]);
    }

    #[test]
    fn test_infeasible_reshape_skipped() {
        let nodes = vec![
            Node::new("reshape", 0).with_config(json!({"targetShape": [3, 3]})),
            Node::new("dense", 1).with_config(json!({"units": 10, "activation": "softmax"})),
        ];
        let (result, ctx) = compile_with(&[10], &nodes, &[]);
        let pipeline = result.unwrap();

        assert_eq!(pipeline.tags(), vec![StageTag::Dense]);
        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(ctx.warnings()[0].kind, ErrorKind::ShapeMismatch);
    }

    #[test]
    fn test_existing_classifier_kept() {
        let nodes = vec![Node::new("dense", 0).with_config(json!({"units": 3, "activation": "sigmoid"}))];
        let (result, _) = compile_with(&[5], &nodes, &[]);
        let pipeline = result.unwrap();
        assert_eq!(pipeline.len(), 1);
        assert!(pipeline.ends_in_classifier());
    }

    #[test]
    fn test_classifier_width_follows_options() {
        let options = CompileOptions::default()
            .with_input_shape(Shape::new(vec![6]))
            .with_num_classes(3);
        let mut ctx = RunContext::new();
        let pipeline = GraphCompiler::new(StageRegistry::global(), options)
            .compile(&[Node::new("dropout", 0)], &[], &mut ctx)
            .unwrap();
        assert_eq!(pipeline.output_shape(), Some(&Shape::new(vec![3])));
    }

    #[test]
    fn test_zero_classes_from_config_file() {
        let config: RunConfig = serde_json::from_str(r#"{"num_classes": 0}"#).unwrap();
        let options = CompileOptions::from_config(&config, Shape::new(vec![6]));
        let mut ctx = RunContext::new();
        let pipeline = GraphCompiler::new(StageRegistry::global(), options)
            .compile(&[Node::new("dropout", 0)], &[], &mut ctx)
            .unwrap();

        assert_eq!(pipeline.output_shape(), Some(&Shape::new(vec![1])));
        assert!(ctx.warnings().is_empty());
    }

    #[test]
    fn test_internal_stage_warnings_are_kept() {
        let options = CompileOptions {
            input_shape: Shape::new(vec![6]),
            num_classes: 0,
        };
        let mut ctx = RunContext::new();
        GraphCompiler::new(StageRegistry::global(), options)
            .compile(&[Node::new("dropout", 0)], &[], &mut ctx)
            .unwrap();

        assert_eq!(ctx.warnings().len(), 1);
        assert_eq!(ctx.warnings()[0].kind, ErrorKind::MalformedConfig);
        assert!(ctx.warnings()[0].message.contains("classifier"));
    }

    #[test]
    fn test_malformed_config_recorded() {
        let nodes = vec![Node::new("dense", 0).with_config(json!({"units": "many"}))];
        let (result, ctx) = compile_with(&[5], &nodes, &[]);
        let pipeline = result.unwrap();

        assert_eq!(shapes(&pipeline)[0], vec![128]);
        assert_eq!(ctx.warnings()[0].kind, ErrorKind::MalformedConfig);
        assert!(ctx.warnings()[0].message.contains("dense-0"));
    }

    #[test]
    fn test_compile_is_deterministic() {
        let nodes = vec![
            Node::new("conv2d", 2),
            Node::new("flatten", 3),
            Node::new("dense", 4),
            Node::new("mnist", 0),
        ];
        let edges = vec![
            Edge::new("mnist-0", "conv2d-2"),
            Edge::new("conv2d-2", "flatten-3"),
            Edge::new("flatten-3", "dense-4"),
        ];
        let (first, _) = compile_with(&[28, 28, 1], &nodes, &edges);
        let (second, _) = compile_with(&[28, 28, 1], &nodes, &edges);
        let (first, second) = (first.unwrap(), second.unwrap());

        assert_eq!(first, second);
        assert_eq!(first.fingerprint(), second.fingerprint());
    }
}
