//! Block and sequence templates — ordered, skippable, repeatable groups.

use std::fmt;
use std::sync::Arc;

use crate::core::flow_context::FlowContext;
use crate::error::TemplateError;

use super::predicate::{never, Predicate};
use super::step::Step;

/// A child of a block: either a step or a nested block.
///
/// There is deliberately no `Sequence` variant — the root sequence of a run
/// cannot be nested inside another block.
#[derive(Clone, Debug)]
pub enum Element {
    Step(Step),
    Block(Block),
}

impl From<Step> for Element {
    fn from(step: Step) -> Self {
        Element::Step(step)
    }
}

impl From<Block> for Element {
    fn from(block: Block) -> Self {
        Element::Block(block)
    }
}

/// An ordered group of steps and sub-blocks.
///
/// A block as a whole can be skipped (its entire body bypassed) or repeated
/// (its body replayed from the first child) based on predicates over the
/// engine state. Children are stored by value at build time; mutating the
/// author-side originals afterwards has no effect.
#[derive(Clone)]
pub struct Block {
    children: Vec<Element>,
    skip: Predicate,
    repeat: Predicate,
}

impl Block {
    pub fn builder() -> BlockBuilder {
        BlockBuilder {
            children: Vec::new(),
            skip: never(),
            repeat: never(),
        }
    }

    pub fn children(&self) -> &[Element] {
        &self.children
    }

    pub(crate) fn skip_predicate(&self) -> Predicate {
        Arc::clone(&self.skip)
    }

    pub(crate) fn repeat_predicate(&self) -> Predicate {
        Arc::clone(&self.repeat)
    }
}

impl fmt::Debug for Block {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Block")
            .field("children", &self.children.len())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Block`]. `build()` fails on an empty child list — a block
/// must present at least one step or sub-block.
pub struct BlockBuilder {
    children: Vec<Element>,
    skip: Predicate,
    repeat: Predicate,
}

impl BlockBuilder {
    pub fn child(mut self, element: impl Into<Element>) -> Self {
        self.children.push(element.into());
        self
    }

    pub fn step(self, step: Step) -> Self {
        self.child(step)
    }

    pub fn block(self, block: Block) -> Self {
        self.child(block)
    }

    /// Skip the whole block (every descendant bypassed) whenever the
    /// predicate is true on entry.
    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.skip = Arc::new(f);
        self
    }

    /// Replay the block body from its first child whenever the predicate is
    /// true at the block's end.
    pub fn repeat_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.repeat = Arc::new(f);
        self
    }

    pub fn build(self) -> Result<Block, TemplateError> {
        if self.children.is_empty() {
            return Err(TemplateError::EmptyBlock);
        }
        Ok(Block {
            children: self.children,
            skip: self.skip,
            repeat: self.repeat,
        })
    }
}

/// The single root block of a run.
///
/// Behaves like a [`Block`] but is a distinct type: exactly one sequence
/// exists per run and it cannot appear as a child of another block. Authors
/// commonly override `repeat` to loop the whole experiment; the default
/// (false) ends the run after one pass.
#[derive(Clone, Debug)]
pub struct Sequence {
    root: Block,
}

impl Sequence {
    pub fn builder() -> SequenceBuilder {
        SequenceBuilder {
            inner: Block::builder(),
        }
    }

    pub fn root(&self) -> &Block {
        &self.root
    }
}

/// Builder for [`Sequence`]. Same construction rules as [`BlockBuilder`].
pub struct SequenceBuilder {
    inner: BlockBuilder,
}

impl SequenceBuilder {
    pub fn child(mut self, element: impl Into<Element>) -> Self {
        self.inner = self.inner.child(element);
        self
    }

    pub fn step(self, step: Step) -> Self {
        self.child(step)
    }

    pub fn block(self, block: Block) -> Self {
        self.child(block)
    }

    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.inner = self.inner.skip_if(f);
        self
    }

    pub fn repeat_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.inner = self.inner.repeat_if(f);
        self
    }

    pub fn build(self) -> Result<Sequence, TemplateError> {
        Ok(Sequence {
            root: self.inner.build()?,
        })
    }
}
