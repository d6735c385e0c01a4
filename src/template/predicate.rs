//! Predicate and delay-function types shared by steps and blocks.

use std::sync::Arc;
use std::time::Duration;

use crate::core::flow_context::FlowContext;

/// A skip/repeat decision over the engine state.
///
/// Predicates are expected to be pure and total over the [`FlowContext`];
/// a panicking predicate is fatal to the run.
pub type Predicate = Arc<dyn Fn(&FlowContext) -> bool + Send + Sync>;

/// A per-presentation start delay computed from the engine state. When set on
/// a step it takes precedence over the fixed delay.
pub type DelayFn = Arc<dyn Fn(&FlowContext) -> Duration + Send + Sync>;

/// The default predicate: always false.
pub fn never() -> Predicate {
    Arc::new(|_| false)
}
