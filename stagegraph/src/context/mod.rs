//! Per-run context.
//!
//! A [`RunContext`] is created at the start of a run, threaded explicitly
//! through the compiler, runner and writer, and dropped at the end.

mod run;

pub use run::RunContext;
