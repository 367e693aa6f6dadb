//! Event sink trait and implementations.

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn, Level};

/// Receives run lifecycle events.
///
/// Sinks are owned by the run context and passed explicitly; there is no
/// process-wide sink.
pub trait EventSink: Send + Sync {
    /// Receives one event, such as `tier.started`. Must not panic.
    fn emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards every event.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

impl EventSink for NoOpEventSink {
    fn emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes every event to the `tracing` log at a fixed level.
///
/// The `run_id` and `tier` members of the payload become structured fields.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self::info()
    }
}

impl LoggingEventSink {
    /// Logs at `level`.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Logs at debug level.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    /// Logs at info level.
    #[must_use]
    pub fn info() -> Self {
        Self::new(Level::INFO)
    }
}

fn field<'a>(data: Option<&'a Value>, key: &str) -> &'a str {
    data.and_then(|d| d.get(key)).and_then(Value::as_str).unwrap_or("-")
}

impl EventSink for LoggingEventSink {
    fn emit(&self, event_type: &str, data: Option<Value>) {
        let run_id = field(data.as_ref(), "run_id");
        let tier = field(data.as_ref(), "tier");
        match self.level {
            Level::TRACE | Level::DEBUG => debug!(run_id, tier, payload = ?data, "{event_type}"),
            Level::INFO => info!(run_id, tier, payload = ?data, "{event_type}"),
            _ => warn!(run_id, tier, payload = ?data, "{event_type}"),
        }
    }
}

/// Keeps every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of everything collected so far.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the event names in order.
    #[must_use]
    pub fn event_types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Number of events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was emitted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Forgets every event.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns the events whose name starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

impl EventSink for CollectingEventSink {
    fn emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("test", Some(json!({"x": 1})));
        LoggingEventSink::default().emit("test.event", Some(json!({"key": "value"})));
        LoggingEventSink::debug().emit("test.event", None);
    }

    #[test]
    fn test_collecting_sink() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("event1", None);
        sink.emit("event2", Some(json!({"data": true})));

        assert_eq!(sink.len(), 2);
        assert_eq!(sink.event_types(), vec!["event1", "event2"]);
        assert_eq!(sink.events()[1].1, Some(json!({"data": true})));
    }

    #[test]
    fn test_collecting_sink_filter() {
        let sink = CollectingEventSink::new();
        sink.emit("tier.started", None);
        sink.emit("tier.failed", None);
        sink.emit("run.completed", None);

        assert_eq!(sink.events_of_type("tier.").len(), 2);
        assert_eq!(sink.events_of_type("run.").len(), 1);

        sink.clear();
        assert!(sink.is_empty());
    }
}
