//! The execution graph — the compiled artifact walked by the engine.

pub mod builder;
pub mod types;

pub use builder::build_graph;
pub use types::{BlockEndNode, BlockStartNode, ExecutionGraph, ExecutionNode, NodeId, StepNode};
