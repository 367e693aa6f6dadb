//! The design tool's graph document.

use crate::config::RunConfig;
use crate::core::Shape;
use crate::errors::{ErrorKind, ErrorRecord, InputError};
use crate::registry::{NodeKind, ReservedTag};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// Top-level input document.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GraphDocument {
    /// Raw nodes in authoring order.
    #[serde(default, alias = "structure")]
    pub model_structure: Vec<RawNode>,
    /// Raw edges.
    #[serde(default, alias = "connections")]
    pub edges: Vec<RawEdge>,
}

/// One `modelStructure` entry as written by the design tool.
#[derive(Debug, Clone, Deserialize)]
pub struct RawNode {
    /// Node type tag.
    #[serde(rename = "type")]
    pub node_type: String,
    /// Explicit node id, if the tool provided one.
    #[serde(default)]
    pub id: Option<String>,
    /// Free-form configuration.
    #[serde(default)]
    pub config: Value,
}

/// One edge as written by the design tool.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Deserialize)]
pub struct RawEdge {
    /// Reference of the upstream node.
    pub source: String,
    /// Reference of the downstream node.
    pub target: String,
}

/// A parsed node.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    /// Reference used by edges.
    pub id: String,
    /// What the type tag refers to.
    pub kind: NodeKind,
    /// Configuration map.
    pub config: Map<String, Value>,
    /// Ordering hint from `sequenceId`.
    pub sequence_hint: i64,
}

impl Node {
    /// Creates a node with an id derived from type and sequence hint.
    #[must_use]
    pub fn new(node_type: &str, sequence_hint: i64) -> Self {
        Self {
            id: format!("{node_type}-{sequence_hint}"),
            kind: NodeKind::classify(node_type),
            config: Map::new(),
            sequence_hint,
        }
    }

    /// Sets the configuration.
    #[must_use]
    pub fn with_config(mut self, config: Value) -> Self {
        if let Value::Object(map) = config {
            self.config = map;
        }
        self
    }

    /// Sets an explicit id.
    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }
}

/// A parsed edge.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Edge {
    /// Reference of the upstream node.
    pub source: String,
    /// Reference of the downstream node.
    pub target: String,
}

impl Edge {
    /// Creates an edge.
    #[must_use]
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Nodes and edges parsed from a document, plus anything noticed on the way.
#[derive(Debug, Clone, Default)]
pub struct ParsedGraph {
    /// Parsed nodes in authoring order.
    pub nodes: Vec<Node>,
    /// Parsed edges.
    pub edges: Vec<Edge>,
    /// Recoverable anomalies.
    pub warnings: Vec<ErrorRecord>,
}

impl GraphDocument {
    /// Reads and parses a document.
    ///
    /// # Errors
    ///
    /// Returns [`InputError`] if the file cannot be read or is not a graph document.
    pub fn from_path(path: &Path) -> Result<Self, InputError> {
        let text = std::fs::read_to_string(path).map_err(|source| InputError::Unreadable {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|reason| InputError::malformed(path, reason))
    }

    /// Parses a document from JSON text.
    ///
    /// # Errors
    ///
    /// Returns the parser message if the text is not a graph document.
    pub fn from_json_str(text: &str) -> Result<Self, String> {
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    /// Converts raw entries into nodes and edges.
    #[must_use]
    pub fn into_graph(self) -> ParsedGraph {
        let mut warnings = Vec::new();
        let nodes = self
            .model_structure
            .into_iter()
            .map(|raw| raw.into_node(&mut warnings))
            .collect();
        let edges = self
            .edges
            .into_iter()
            .map(|raw| Edge::new(raw.source, raw.target))
            .collect();
        ParsedGraph {
            nodes,
            edges,
            warnings,
        }
    }
}

impl RawNode {
    fn into_node(self, warnings: &mut Vec<ErrorRecord>) -> Node {
        let config = match self.config {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => {
                warnings.push(ErrorRecord::new(
                    ErrorKind::MalformedConfig,
                    format!("config of '{}' node is {other}, not an object; ignoring it", self.node_type),
                ));
                Map::new()
            }
        };
        let sequence_hint = sequence_hint(&config, &self.node_type, warnings);
        let id = self
            .id
            .filter(|id| !id.is_empty())
            .unwrap_or_else(|| format!("{}-{sequence_hint}", self.node_type));
        Node {
            id,
            kind: NodeKind::classify(&self.node_type),
            config,
            sequence_hint,
        }
    }
}

/// `sequenceId`, else `index`, else 0.
fn sequence_hint(config: &Map<String, Value>, node_type: &str, warnings: &mut Vec<ErrorRecord>) -> i64 {
    for key in ["sequenceId", "index"] {
        let Some(value) = config.get(key) else {
            continue;
        };
        let parsed = match value {
            Value::Number(n) => n.as_i64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        match parsed {
            Some(hint) => return hint,
            None => warnings.push(ErrorRecord::new(
                ErrorKind::MalformedConfig,
                format!("'{key}' of '{node_type}' node is {value}, not an integer"),
            )),
        }
    }
    0
}

/// Picks the pipeline's input shape.
///
/// An explicit shape wins. Otherwise an image data source implies 28x28x1
/// and a tabular data source implies `[inputFeatures]`.
#[must_use]
pub fn resolve_input_shape(nodes: &[Node], explicit: Option<&Shape>, config: &RunConfig) -> Shape {
    if let Some(shape) = explicit {
        return shape.clone();
    }
    let source = |tag: ReservedTag| nodes.iter().find(|n| n.kind == NodeKind::Reserved(tag));
    if source(ReservedTag::Mnist).is_some() {
        return Shape::image_default();
    }
    if let Some(node) = source(ReservedTag::UseData) {
        let features = node
            .config
            .get("inputFeatures")
            .and_then(Value::as_u64)
            .and_then(|n| usize::try_from(n).ok())
            .filter(|n| *n > 0)
            .unwrap_or(config.tabular_input_features);
        return Shape::new(vec![features]);
    }
    config.default_input_shape.clone()
}
