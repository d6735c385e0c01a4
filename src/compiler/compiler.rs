//! Compilation of a [`Sequence`] into a [`CompiledFlow`].

use std::time::Instant;

use crate::graph::{build_graph, ExecutionGraph};
use crate::template::Sequence;

/// The compiled artifact for one run: the execution graph plus structural
/// counts. Built fresh at the start of every run and discarded when the run
/// ends; it is never persisted or shared between runs.
#[derive(Debug)]
pub struct CompiledFlow {
    graph: ExecutionGraph,
    step_count: usize,
    block_count: usize,
    compiled_at: Instant,
}

impl CompiledFlow {
    pub fn graph(&self) -> &ExecutionGraph {
        &self.graph
    }

    pub(crate) fn into_graph(self) -> ExecutionGraph {
        self.graph
    }

    /// Step nodes in the graph — one per authored step.
    pub fn step_count(&self) -> usize {
        self.step_count
    }

    /// Boundary pairs in the graph — one per authored block, root included.
    pub fn block_count(&self) -> usize {
        self.block_count
    }

    pub fn compiled_at(&self) -> Instant {
        self.compiled_at
    }
}

pub struct FlowCompiler;

impl FlowCompiler {
    /// Compile a root sequence. Template construction already enforced the
    /// structural invariants (non-empty blocks, no nested root), so
    /// compilation is infallible and deterministic: the same tree always
    /// yields a structurally identical graph.
    pub fn compile(root: &Sequence) -> CompiledFlow {
        let graph = build_graph(root);
        let step_count = graph.step_count();
        let block_count = graph.block_count();
        tracing::debug!(
            nodes = graph.len(),
            steps = step_count,
            blocks = block_count,
            "compiled flow graph"
        );
        CompiledFlow {
            graph,
            step_count,
            block_count,
            compiled_at: Instant::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::{Block, Step};
    use serde_json::json;

    #[test]
    fn test_compile_counts() {
        let practice = Block::builder()
            .step(Step::new(json!("p1")))
            .step(Step::new(json!("p2")))
            .build()
            .unwrap();
        let seq = Sequence::builder()
            .step(Step::new(json!("welcome")))
            .block(practice)
            .build()
            .unwrap();

        let compiled = FlowCompiler::compile(&seq);
        assert_eq!(compiled.step_count(), 3);
        assert_eq!(compiled.block_count(), 2);
        assert_eq!(compiled.graph().len(), 3 + 2 * 2);
    }

    #[test]
    fn test_compile_is_repeatable() {
        let seq = Sequence::builder()
            .step(Step::new(json!("a")))
            .build()
            .unwrap();
        let first = FlowCompiler::compile(&seq);
        let second = FlowCompiler::compile(&seq);
        assert_eq!(first.graph().len(), second.graph().len());
        assert_eq!(first.step_count(), second.step_count());
        assert_eq!(first.block_count(), second.block_count());
    }
}
