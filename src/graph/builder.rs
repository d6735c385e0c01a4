//! Recursive expansion of a template tree into an execution graph.

use crate::template::{Block, Element, Sequence};

use super::types::{
    BlockEndNode, BlockStartNode, ExecutionGraph, ExecutionNode, NodeId, StepNode,
};

/// Expand a root sequence into a linear chain of execution nodes.
///
/// Every block (the root included) becomes a paired start/end boundary with
/// its children expanded in declaration order between them; every step
/// becomes one [`StepNode`] carrying a value copy of its template. The root
/// end node's `next` stays `None` — reaching it ends the run. Template
/// construction has already rejected empty blocks, so expansion cannot fail.
pub fn build_graph(root: &Sequence) -> ExecutionGraph {
    let mut nodes: Vec<ExecutionNode> = Vec::new();
    let (first, _) = expand_block(&mut nodes, root.root(), 0);
    ExecutionGraph::new(nodes, first)
}

/// Expand one block at the given child level, returning its boundary pair.
fn expand_block(nodes: &mut Vec<ExecutionNode>, block: &Block, level: u32) -> (NodeId, NodeId) {
    let start = push(
        nodes,
        ExecutionNode::BlockStart(BlockStartNode {
            skip: block.skip_predicate(),
            next: None,
            // patched below once the end node exists
            pair: NodeId(0),
        }),
    );

    let mut cursor = start;
    for child in block.children() {
        match child {
            Element::Step(step) => {
                let id = push(
                    nodes,
                    ExecutionNode::Step(StepNode {
                        step: step.clone(),
                        level,
                        next: None,
                    }),
                );
                set_next(nodes, cursor, id);
                cursor = id;
            }
            Element::Block(sub) => {
                let (sub_start, sub_end) = expand_block(nodes, sub, level + 1);
                set_next(nodes, cursor, sub_start);
                cursor = sub_end;
            }
        }
    }

    let end = push(
        nodes,
        ExecutionNode::BlockEnd(BlockEndNode {
            repeat: block.repeat_predicate(),
            next: None,
            pair: start,
        }),
    );
    set_next(nodes, cursor, end);

    if let ExecutionNode::BlockStart(n) = &mut nodes[start.index()] {
        n.pair = end;
    }

    (start, end)
}

fn push(nodes: &mut Vec<ExecutionNode>, node: ExecutionNode) -> NodeId {
    let id = NodeId(nodes.len());
    nodes.push(node);
    id
}

fn set_next(nodes: &mut [ExecutionNode], from: NodeId, to: NodeId) {
    match &mut nodes[from.index()] {
        ExecutionNode::Step(n) => n.next = Some(to),
        ExecutionNode::BlockStart(n) => n.next = Some(to),
        ExecutionNode::BlockEnd(n) => n.next = Some(to),
    }
}
