//! # Trialflow — An Experiment Flow Engine
//!
//! `trialflow` runs psychology-style experiments described as a tree of
//! **steps** (atomic presented events) and **blocks** (ordered groups that
//! can be skipped or repeated as a whole). The tree is compiled into a
//! linear execution graph which a single-threaded engine walks strictly in
//! order, suspending while a step is on screen and resuming when an external
//! completion signal arrives. Each completed step yields one timestamped
//! record.
//!
//! - **Authoring**: immutable [`Step`]/[`Block`]/[`Sequence`] templates with
//!   per-element `skip`/`repeat` predicates and start delays (fixed or
//!   computed per presentation).
//! - **Compilation**: each run expands the tree into a fresh chain of
//!   execution nodes with paired block boundaries; skipping a block jumps
//!   past its end, repeating one jumps back to its first node.
//! - **Execution**: one step open at a time, no timeouts, no preemption; a
//!   step that never completes halts the run — deliberately.
//! - **Records**: append-only, in completion order, enriched with the
//!   engine's `level`/`start_time`/`end_time` before they reach the store.
//!
//! # Quick Start
//!
//! ```rust,no_run
//! use std::collections::HashMap;
//! use serde_json::json;
//! use trialflow::{FlowRunner, Sequence, Step};
//!
//! #[tokio::main]
//! async fn main() {
//!     let sequence = Sequence::builder()
//!         .step(Step::new(json!({ "text": "Press space when ready" })))
//!         .build()
//!         .unwrap();
//!
//!     let handle = FlowRunner::builder(sequence).run();
//!     handle.wait_for_step().await;
//!     handle.complete_step(HashMap::new()).await.unwrap();
//!     let status = handle.wait().await;
//!     println!("{:?}", status);
//! }
//! ```

pub mod api;
pub mod compiler;
pub mod core;
pub mod error;
pub mod graph;
pub mod record;
pub mod render;
pub mod template;

pub use crate::api::{FlowHandle, FlowRunner, FlowRunnerBuilder, StepCompleter};
pub use crate::compiler::{CompiledFlow, FlowCompiler};
pub use crate::core::{
    create_event_channel, Command, EventEmitter, ExecutionStatus, FakeIdGenerator,
    FakeTimeProvider, FlowContext, FlowDispatcher, FlowEvent, IdGenerator, RealIdGenerator,
    RealTimeProvider, RuntimeContext, TimeProvider,
};
pub use crate::error::{FlowError, FlowResult, TemplateError};
pub use crate::graph::{build_graph, ExecutionGraph, ExecutionNode, NodeId};
pub use crate::record::{
    MemoryRecordStore, Record, RecordStore, FIELD_END_TIME, FIELD_LEVEL, FIELD_START_TIME,
};
pub use crate::render::{NullRenderer, PresentationContext, Renderer};
pub use crate::template::{Block, DelayFn, Element, Predicate, Sequence, Step};
