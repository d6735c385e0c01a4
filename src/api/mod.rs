//! Public entry points for configuring and driving a run.

pub mod runner;

pub use runner::{FlowHandle, FlowRunner, FlowRunnerBuilder, StepCompleter};
