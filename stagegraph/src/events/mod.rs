//! Run lifecycle events.
//!
//! Events are emitted through an [`EventSink`] owned by the
//! [`RunContext`](crate::context::RunContext).

mod sink;

pub use sink::{CollectingEventSink, EventSink, LoggingEventSink, NoOpEventSink};

/// Event type names.
pub mod names {
    /// A recoverable compile anomaly was recorded.
    pub const COMPILE_WARNING: &str = "compile.warning";
    /// A tier was entered.
    pub const TIER_STARTED: &str = "tier.started";
    /// A tier failed and the run is downgrading.
    pub const TIER_FAILED: &str = "tier.failed";
    /// A tier produced its artifacts.
    pub const TIER_SUCCEEDED: &str = "tier.succeeded";
    /// The ready marker was written.
    pub const RUN_COMPLETED: &str = "run.completed";
}
