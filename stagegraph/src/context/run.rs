//! Run identity, warnings and event emission.

use crate::errors::ErrorRecord;
use crate::events::{names, EventSink, NoOpEventSink};
use crate::utils::{iso_timestamp, now_utc, run_stamp, Timestamp};
use serde_json::{json, Value};
use std::fmt;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

/// State shared by every component of one run.
pub struct RunContext {
    run_id: Uuid,
    started_at: Timestamp,
    warnings: Vec<ErrorRecord>,
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("run_id", &self.run_id)
            .field("started_at", &self.started_at)
            .field("warnings", &self.warnings.len())
            .finish_non_exhaustive()
    }
}

impl Default for RunContext {
    fn default() -> Self {
        Self::new()
    }
}

impl RunContext {
    /// Creates a context with a fresh run id and a no-op sink.
    #[must_use]
    pub fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: now_utc(),
            warnings: Vec::new(),
            sink: Arc::new(NoOpEventSink),
        }
    }

    /// Sets the event sink.
    #[must_use]
    pub fn with_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Sets the run id.
    #[must_use]
    pub fn with_run_id(mut self, run_id: Uuid) -> Self {
        self.run_id = run_id;
        self
    }

    /// Sets the start time.
    #[must_use]
    pub fn with_started_at(mut self, started_at: Timestamp) -> Self {
        self.started_at = started_at;
        self
    }

    /// Returns the run id.
    #[must_use]
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Returns when the run started.
    #[must_use]
    pub fn started_at(&self) -> Timestamp {
        self.started_at
    }

    /// Returns the start time as ISO 8601.
    #[must_use]
    pub fn started_at_iso(&self) -> String {
        iso_timestamp(&self.started_at)
    }

    /// Name of this run's artifacts directory: `YYYYmmdd-HHMMSS-<id prefix>`.
    #[must_use]
    pub fn run_dir_name(&self) -> String {
        let id = self.run_id.simple().to_string();
        format!("{}-{}", run_stamp(&self.started_at), &id[..8])
    }

    /// Records a recoverable anomaly, logs it and emits `compile.warning`.
    pub fn record_warning(&mut self, record: ErrorRecord) {
        warn!(
            run_id = %self.run_id,
            kind = %record.kind,
            stage = ?record.stage_tag,
            "{}", record.message
        );
        self.emit(
            names::COMPILE_WARNING,
            Some(serde_json::to_value(&record).unwrap_or(Value::Null)),
        );
        self.warnings.push(record);
    }

    /// Records several anomalies.
    pub fn record_warnings(&mut self, records: impl IntoIterator<Item = ErrorRecord>) {
        for record in records {
            self.record_warning(record);
        }
    }

    /// Returns every recorded warning.
    #[must_use]
    pub fn warnings(&self) -> &[ErrorRecord] {
        &self.warnings
    }

    /// Emits an event tagged with the run id.
    pub fn emit(&self, event_type: &str, data: Option<Value>) {
        let mut payload = data.unwrap_or_else(|| json!({}));
        if let Value::Object(map) = &mut payload {
            map.insert("run_id".to_string(), json!(self.run_id.to_string()));
        }
        self.sink.emit(event_type, Some(payload));
    }
}
