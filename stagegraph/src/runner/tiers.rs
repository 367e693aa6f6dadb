//! Tier results and transitions.

use crate::core::Tier;
use crate::errors::{DiagnosticsError, ErrorKind, ErrorRecord, ExecutionError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// What one tier attempt produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionTierResult {
    /// The tier attempted.
    pub tier: Tier,
    /// Whether the tier produced its artifacts.
    pub succeeded: bool,
    /// Artifacts directory of the run.
    pub artifacts_dir: PathBuf,
    /// Why the tier failed, if it did.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorRecord>,
    /// Files written by this tier, relative to `artifacts_dir`.
    #[serde(default)]
    pub outputs: Vec<String>,
    /// Metric names captured by a training tier.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub metric_names: Vec<String>,
    /// Wall time spent in the tier.
    pub duration_ms: u64,
}

impl ExecutionTierResult {
    /// Creates a successful result.
    #[must_use]
    pub fn success(tier: Tier, artifacts_dir: PathBuf, outputs: Vec<String>) -> Self {
        Self {
            tier,
            succeeded: true,
            artifacts_dir,
            error: None,
            outputs,
            metric_names: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Creates a failed result.
    #[must_use]
    pub fn failure(tier: Tier, artifacts_dir: PathBuf, error: ErrorRecord) -> Self {
        Self {
            tier,
            succeeded: false,
            artifacts_dir,
            error: Some(error),
            outputs: Vec::new(),
            metric_names: Vec::new(),
            duration_ms: 0,
        }
    }

    /// Sets the captured metric names.
    #[must_use]
    pub fn with_metric_names(mut self, names: Vec<String>) -> Self {
        self.metric_names = names;
        self
    }

    /// Sets the duration.
    #[must_use]
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }
}

/// Why a tier did not complete.
#[derive(Debug)]
pub enum TierFailure {
    /// The compute engine failed or panicked.
    Execution(ExecutionError),
    /// Artifacts could not be written.
    Diagnostics(DiagnosticsError),
    /// Anything else, such as a panic outside the engine.
    Internal(String),
}

impl TierFailure {
    /// Converts to an error record.
    #[must_use]
    pub fn to_record(&self) -> ErrorRecord {
        match self {
            Self::Execution(err) => err.to_record(),
            Self::Diagnostics(err) => err.to_record(),
            Self::Internal(message) => ErrorRecord::new(ErrorKind::Internal, message.clone()),
        }
    }
}

impl fmt::Display for TierFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Execution(err) => write!(f, "{err}"),
            Self::Diagnostics(err) => write!(f, "{err}"),
            Self::Internal(message) => f.write_str(message),
        }
    }
}

impl From<ExecutionError> for TierFailure {
    fn from(err: ExecutionError) -> Self {
        Self::Execution(err)
    }
}

impl From<DiagnosticsError> for TierFailure {
    fn from(err: DiagnosticsError) -> Self {
        Self::Diagnostics(err)
    }
}

/// The tier to try after `tier` failed, or `None` after Emergency.
///
/// Only an engine failure that a different policy could fix earns the
/// Reduced retry; everything else goes straight to StructureOnly.
#[must_use]
pub fn next_tier(tier: Tier, failure: &TierFailure) -> Option<Tier> {
    match (tier, failure) {
        (Tier::Full, TierFailure::Execution(err)) if err.permits_reduced_retry() => Some(Tier::Reduced),
        (Tier::Full | Tier::Reduced, _) => Some(Tier::StructureOnly),
        (Tier::StructureOnly, _) => Some(Tier::Emergency),
        (Tier::Emergency, _) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transitions() {
        let incompatible = TierFailure::Execution(ExecutionError::ConfigIncompatible("loss".into()));
        let unavailable = TierFailure::Execution(ExecutionError::Unavailable("none".into()));
        let internal = TierFailure::Internal("boom".into());

        assert_eq!(next_tier(Tier::Full, &incompatible), Some(Tier::Reduced));
        assert_eq!(next_tier(Tier::Full, &unavailable), Some(Tier::StructureOnly));
        assert_eq!(next_tier(Tier::Full, &internal), Some(Tier::StructureOnly));
        assert_eq!(next_tier(Tier::Reduced, &incompatible), Some(Tier::StructureOnly));
        assert_eq!(next_tier(Tier::StructureOnly, &internal), Some(Tier::Emergency));
        assert_eq!(next_tier(Tier::Emergency, &internal), None);
    }

    #[test]
    fn test_failure_records() {
        let record = TierFailure::Execution(ExecutionError::Panicked("oops".into())).to_record();
        assert_eq!(record.kind, ErrorKind::ExecutionError);
        assert_eq!(record.message, "Engine panicked: oops");

        let record = TierFailure::Internal("bad".into()).to_record();
        assert_eq!(record.kind, ErrorKind::Internal);
    }

    #[test]
    fn test_result_serialization_omits_empty_fields() {
        let result = ExecutionTierResult::success(Tier::StructureOnly, PathBuf::from("/tmp/x"), vec![]);
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["tier"], "structure_only");
        assert!(json.get("error").is_none());
        assert!(json.get("metric_names").is_none());
    }
}
