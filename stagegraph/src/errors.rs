//! Error types for stagegraph.
//!
//! Only two error families stop a run: unreadable input ([`InputError`]) and
//! structurally impossible graphs ([`GraphError`]). Everything else is folded
//! into an [`ErrorRecord`] and carried in the run manifest.

use crate::registry::StageTag;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// The main error type for stagegraph operations.
#[derive(Debug, Error)]
pub enum StagegraphError {
    /// The input document could not be read or parsed.
    #[error("{0}")]
    Input(#[from] InputError),

    /// The graph cannot be compiled.
    #[error("{0}")]
    Graph(#[from] GraphError),

    /// The compute engine failed.
    #[error("{0}")]
    Execution(#[from] ExecutionError),

    /// Artifacts could not be written.
    #[error("{0}")]
    Diagnostics(#[from] DiagnosticsError),
}

/// Code, summary and remediation for a fatal error.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq, Eq)]
pub struct ErrorInfo {
    /// Stable code such as `GRAPH-002-CYCLE`.
    pub code: String,
    /// One-line summary.
    pub summary: String,
    /// What the graph author can change.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_hint: Option<String>,
    /// Offending values by name.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub context: BTreeMap<String, String>,
}

impl ErrorInfo {
    /// Creates info with a code and summary.
    #[must_use]
    pub fn new(code: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            summary: summary.into(),
            ..Self::default()
        }
    }

    /// Sets the fix hint.
    #[must_use]
    pub fn with_fix_hint(mut self, hint: impl Into<String>) -> Self {
        self.fix_hint = Some(hint.into());
        self
    }

    /// Adds a context value.
    #[must_use]
    pub fn with_context_entry(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// JSON object form; empty members are omitted.
    #[must_use]
    pub fn to_dict(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }
}

/// Errors raised while loading the input document or a config file.
#[derive(Debug, Error)]
pub enum InputError {
    /// The file could not be read.
    #[error("Cannot read {}: {source}", path.display())]
    Unreadable {
        /// The offending path.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid JSON or does not have the expected layout.
    #[error("Malformed document {}: {reason}", path.display())]
    Malformed {
        /// The offending path.
        path: PathBuf,
        /// What went wrong.
        reason: String,
    },
}

impl InputError {
    /// Creates a malformed-document error.
    #[must_use]
    pub fn malformed(path: impl Into<PathBuf>, reason: impl Into<String>) -> Self {
        Self::Malformed {
            path: path.into(),
            reason: reason.into(),
        }
    }

    /// Converts to an error record.
    #[must_use]
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::InputError, self.to_string())
    }
}

/// Fatal compile-time errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GraphError {
    /// The raw input carries no nodes at all.
    #[error("Input graph contains no nodes")]
    EmptyInput,

    /// The edges form at least one cycle.
    #[error("Cycle detected among nodes: {}", node_ids.join(", "))]
    Cycle {
        /// Ids of every node that could not be ordered.
        node_ids: Vec<String>,
    },
}

impl GraphError {
    /// Creates a cycle error.
    #[must_use]
    pub fn cycle(node_ids: Vec<String>) -> Self {
        Self::Cycle { node_ids }
    }

    /// Returns the stable error code.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::EmptyInput => "GRAPH-001-EMPTY",
            Self::Cycle { .. } => "GRAPH-002-CYCLE",
        }
    }

    /// Returns the error kind.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EmptyInput => ErrorKind::EmptyInput,
            Self::Cycle { .. } => ErrorKind::Cycle,
        }
    }

    /// Builds diagnostic info with a fix hint.
    #[must_use]
    pub fn error_info(&self) -> ErrorInfo {
        match self {
            Self::EmptyInput => ErrorInfo::new(self.code(), self.to_string())
                .with_fix_hint("Add at least one layer node to modelStructure."),
            Self::Cycle { node_ids } => ErrorInfo::new(self.code(), self.to_string())
                .with_fix_hint("Remove one of the edges in the cycle to break it.")
                .with_context_entry("nodes", node_ids.join(",")),
        }
    }

    /// Converts to an error record.
    #[must_use]
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(self.kind(), self.to_string())
    }
}

/// Failures reported by the compute engine. Always recoverable by tier downgrade.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The engine rejected the configuration (e.g. loss vs. label encoding).
    #[error("Engine configuration incompatible: {0}")]
    ConfigIncompatible(String),

    /// The engine ran out of memory or another resource.
    #[error("Engine resources exhausted: {0}")]
    ResourceExhausted(String),

    /// No engine is available to run the pipeline.
    #[error("Compute engine unavailable: {0}")]
    Unavailable(String),

    /// The engine failed for another reason.
    #[error("Engine failed: {0}")]
    EngineFailed(String),

    /// The engine produced output that could not be understood.
    #[error("Engine protocol error: {0}")]
    Protocol(String),

    /// The engine panicked.
    #[error("Engine panicked: {0}")]
    Panicked(String),
}

impl ExecutionError {
    /// Returns true if a retry under the alternate policy can help.
    #[must_use]
    pub fn permits_reduced_retry(&self) -> bool {
        !matches!(self, Self::Unavailable(_))
    }

    /// Returns a short label for the failure.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::ConfigIncompatible(_) => "config_incompatible",
            Self::ResourceExhausted(_) => "resource_exhausted",
            Self::Unavailable(_) => "unavailable",
            Self::EngineFailed(_) => "engine_failed",
            Self::Protocol(_) => "protocol",
            Self::Panicked(_) => "panicked",
        }
    }

    /// Converts to an error record.
    #[must_use]
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::ExecutionError, self.to_string())
    }
}

/// Errors raised while writing artifacts.
#[derive(Debug, Error)]
pub enum DiagnosticsError {
    /// A filesystem operation failed.
    #[error("IO error at {}: {source}", path.display())]
    Io {
        /// The path being written.
        path: PathBuf,
        /// The underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// An artifact could not be serialized.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl DiagnosticsError {
    /// Wraps an IO error with the path it concerns.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Converts to an error record.
    #[must_use]
    pub fn to_record(&self) -> ErrorRecord {
        ErrorRecord::new(ErrorKind::DiagnosticsError, self.to_string())
    }
}

/// Classification of a recorded error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Unreadable or malformed input.
    InputError,
    /// No nodes in the raw input.
    EmptyInput,
    /// The edge set contains a cycle.
    Cycle,
    /// A node type is not in the stage catalogue.
    UnknownStageType,
    /// A stage was fed a shape it does not accept.
    ShapeMismatch,
    /// An edge endpoint does not resolve to any node.
    DanglingEdge,
    /// Several nodes share the same reference.
    AmbiguousNodeRef,
    /// A config field has the wrong type or range.
    MalformedConfig,
    /// The compute engine failed.
    ExecutionError,
    /// The emergency artifact could not be written.
    EmergencyWriteFailure,
    /// Another artifact could not be written.
    DiagnosticsError,
    /// An unexpected failure outside the engine, such as a panic while compiling.
    Internal,
}

impl ErrorKind {
    /// Returns true if this kind stops the whole run.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::InputError | Self::EmptyInput | Self::Cycle)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::InputError => "input_error",
            Self::EmptyInput => "empty_input",
            Self::Cycle => "cycle",
            Self::UnknownStageType => "unknown_stage_type",
            Self::ShapeMismatch => "shape_mismatch",
            Self::DanglingEdge => "dangling_edge",
            Self::AmbiguousNodeRef => "ambiguous_node_ref",
            Self::MalformedConfig => "malformed_config",
            Self::ExecutionError => "execution_error",
            Self::EmergencyWriteFailure => "emergency_write_failure",
            Self::DiagnosticsError => "diagnostics_error",
            Self::Internal => "internal",
        };
        f.write_str(name)
    }
}

/// A recorded, non-fatal (or already handled) error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// What kind of error this is.
    pub kind: ErrorKind,
    /// Human readable message.
    pub message: String,
    /// The stage involved, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage_tag: Option<StageTag>,
}

impl ErrorRecord {
    /// Creates a new error record.
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            stage_tag: None,
        }
    }

    /// Sets the stage involved.
    #[must_use]
    pub fn with_stage(mut self, tag: StageTag) -> Self {
        self.stage_tag = Some(tag);
        self
    }
}

impl fmt::Display for ErrorRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.stage_tag {
            Some(tag) => write!(f, "[{}] {}: {}", self.kind, tag, self.message),
            None => write!(f, "[{}] {}", self.kind, self.message),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_input_info() {
        let info = GraphError::EmptyInput.error_info();

        assert_eq!(info.code, "GRAPH-001-EMPTY");
        assert!(info.fix_hint.is_some());
        let dict = info.to_dict();
        assert_eq!(dict["code"], "GRAPH-001-EMPTY");
        assert!(dict.get("context").is_none());
    }

    #[test]
    fn test_cycle_error_names_nodes() {
        let err = GraphError::cycle(vec!["dense-1".to_string(), "flatten-0".to_string()]);

        assert!(err.to_string().contains("dense-1, flatten-0"));
        assert_eq!(err.code(), "GRAPH-002-CYCLE");
        assert_eq!(err.kind(), ErrorKind::Cycle);
        assert!(err.kind().is_fatal());
        assert_eq!(
            err.error_info().context.get("nodes"),
            Some(&"dense-1,flatten-0".to_string())
        );
    }

    #[test]
    fn test_unavailable_engine_skips_reduced_retry() {
        assert!(!ExecutionError::Unavailable("none".into()).permits_reduced_retry());
        assert!(ExecutionError::ConfigIncompatible("loss".into()).permits_reduced_retry());
        assert!(ExecutionError::Panicked("boom".into()).permits_reduced_retry());
    }

    #[test]
    fn test_error_record_display() {
        let record = ErrorRecord::new(ErrorKind::ShapeMismatch, "inserted flatten")
            .with_stage(StageTag::Dense);
        assert_eq!(record.to_string(), "[shape_mismatch] dense: inserted flatten");
        assert!(!record.kind.is_fatal());
    }

    #[test]
    fn test_error_record_serialization() {
        let record = ErrorRecord::new(ErrorKind::UnknownStageType, "dropped 'foo-3'");
        let json = serde_json::to_value(&record).unwrap();

        assert_eq!(json["kind"], "unknown_stage_type");
        assert!(json.get("stage_tag").is_none());
    }
}
