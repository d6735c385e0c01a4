//! The flow compiler — template tree in, execution graph out.

pub mod compiler;

pub use compiler::{CompiledFlow, FlowCompiler};
