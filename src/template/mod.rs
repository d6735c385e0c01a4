//! The authoring tree — declarative step and block templates.
//!
//! Authors describe an experiment as a [`Sequence`] (the single root block)
//! containing [`Step`]s and nested [`Block`]s. Templates are immutable values:
//! the compiler clones them into the execution graph, so reusing or dropping
//! an author-side template cannot affect a run in progress.

pub mod block;
pub mod predicate;
pub mod step;

pub use block::{Block, BlockBuilder, Element, Sequence, SequenceBuilder};
pub use predicate::{never, DelayFn, Predicate};
pub use step::{Step, StepBuilder};
