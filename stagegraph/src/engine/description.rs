//! Built-in structural description of a compiled pipeline.

use crate::graph::{CompiledPipeline, StageOrigin};
use crate::registry::StageTag;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt::Write as _;

const RULE_WIDTH: usize = 78;

/// One row of the stage table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageRow {
    /// Position in the pipeline.
    pub index: usize,
    /// Stage tag.
    pub tag: StageTag,
    /// Human readable stage description.
    pub description: String,
    /// Input shape, formatted with the batch dimension.
    pub input_shape: Option<String>,
    /// Output shape, formatted with the batch dimension.
    pub output_shape: Option<String>,
    /// Where the stage came from.
    pub origin: StageOrigin,
    /// Resolved parameters.
    pub params: Value,
}

/// Text, table and diagram describing a pipeline without running it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralDescription {
    /// Layer-table style text summary.
    pub summary: String,
    /// Stage list.
    pub stages: Vec<StageRow>,
    /// Graphviz DOT diagram.
    pub dot: String,
}

impl StructuralDescription {
    /// Describes a pipeline.
    #[must_use]
    pub fn from_pipeline(pipeline: &CompiledPipeline) -> Self {
        let stages: Vec<StageRow> = pipeline
            .stages()
            .iter()
            .enumerate()
            .map(|(index, stage)| StageRow {
                index,
                tag: stage.tag,
                description: stage.tag.description().to_string(),
                input_shape: stage.input_shape.as_ref().map(ToString::to_string),
                output_shape: stage.output_shape.as_ref().map(ToString::to_string),
                origin: stage.origin.clone(),
                params: serde_json::to_value(&stage.config).unwrap_or(Value::Null),
            })
            .collect();
        Self {
            summary: render_summary(pipeline, &stages),
            dot: render_dot(pipeline, &stages),
            stages,
        }
    }
}

fn render_summary(pipeline: &CompiledPipeline, rows: &[StageRow]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Pipeline: {} stages, input {}", rows.len(), pipeline.input_shape());
    let _ = writeln!(out, "{}", "_".repeat(RULE_WIDTH));
    let _ = writeln!(out, " {:<4}{:<38}{:<20}{}", "#", "Stage (type)", "Output Shape", "Origin");
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    for row in rows {
        let name = format!("{} ({})", row.tag, row.description);
        let _ = writeln!(
            out,
            " {:<4}{:<38}{:<20}{}",
            row.index,
            name,
            row.output_shape.as_deref().unwrap_or("?"),
            row.origin
        );
    }
    let _ = writeln!(out, "{}", "=".repeat(RULE_WIDTH));
    let _ = writeln!(
        out,
        "Ends in classifier: {}",
        if pipeline.ends_in_classifier() { "yes" } else { "no" }
    );
    let _ = writeln!(out, "Fingerprint: {}", pipeline.fingerprint());
    out
}

fn render_dot(pipeline: &CompiledPipeline, rows: &[StageRow]) -> String {
    let mut out = String::from("digraph pipeline {\n  rankdir=TB;\n  node [shape=box, fontname=\"monospace\"];\n");
    let _ = writeln!(out, "  input [shape=ellipse, label=\"input\\n{}\"];", pipeline.input_shape());
    let mut previous = "input".to_string();
    for row in rows {
        let id = format!("s{}", row.index);
        let style = match row.origin {
            StageOrigin::Adapter => ", style=dashed",
            StageOrigin::Fallback | StageOrigin::Classifier => ", style=bold",
            StageOrigin::Node(_) => "",
        };
        let _ = writeln!(
            out,
            "  {id} [label=\"{}: {}\\n{}\"{style}];",
            row.index,
            row.tag,
            row.output_shape.as_deref().unwrap_or("?")
        );
        let _ = writeln!(out, "  {previous} -> {id};");
        previous = id;
    }
    out.push_str("}\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::RunContext;
    use crate::graph::{Edge, GraphCompiler, Node};
    use serde_json::json;

    fn pipeline() -> CompiledPipeline {
        let nodes = vec![
            Node::new("flatten", 0),
            Node::new("dense", 1).with_config(json!({"units": 64})),
        ];
        GraphCompiler::default()
            .compile(&nodes, &[Edge::new("flatten-0", "dense-1")], &mut RunContext::new())
            .unwrap()
    }

    #[test]
    fn test_rows_follow_stages() {
        let description = StructuralDescription::from_pipeline(&pipeline());
        assert_eq!(description.stages.len(), 3);
        assert_eq!(description.stages[1].tag, StageTag::Dense);
        assert_eq!(description.stages[1].output_shape.as_deref(), Some("(None, 64)"));
        assert_eq!(description.stages[1].params["params"]["units"], 64);
        assert_eq!(description.stages[2].origin, StageOrigin::Classifier);
    }

    #[test]
    fn test_summary_text() {
        let summary = StructuralDescription::from_pipeline(&pipeline()).summary;
        assert!(summary.starts_with("Pipeline: 3 stages, input (None, 28, 28, 1)"));
        assert!(summary.contains("dense (fully connected)"));
        assert!(summary.contains("node flatten-0"));
        assert!(summary.contains("Ends in classifier: yes"));
    }

    #[test]
    fn test_dot_chain() {
        let dot = StructuralDescription::from_pipeline(&pipeline()).dot;
        assert!(dot.starts_with("digraph pipeline {"));
        assert!(dot.contains("input -> s0;"));
        assert!(dot.contains("s1 -> s2;"));
        assert!(dot.trim_end().ends_with('}'));
    }
}
