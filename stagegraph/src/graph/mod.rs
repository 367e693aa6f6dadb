//! Graph compilation.
//!
//! Raw nodes and edges from the design tool are filtered, ordered, resolved
//! against the [`StageRegistry`](crate::registry::StageRegistry) and
//! shape-checked into an immutable [`CompiledPipeline`].

mod compiler;
mod input;
mod order;
mod pipeline;

pub use compiler::{CompileOptions, GraphCompiler};
pub use input::{resolve_input_shape, Edge, GraphDocument, Node, ParsedGraph, RawEdge, RawNode};
pub use pipeline::{CompiledPipeline, CompiledStage, StageOrigin};
