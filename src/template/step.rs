//! Step templates — the atomic presented events of a flow.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;

use crate::core::flow_context::FlowContext;

use super::predicate::{never, DelayFn, Predicate};

/// An atomic presented event.
///
/// A step owns an opaque content handle that the engine passes to the
/// renderer untouched, an optional start delay (fixed or computed per
/// presentation), and `skip`/`repeat` predicates evaluated against the
/// engine state. Both predicates default to false.
#[derive(Clone)]
pub struct Step {
    content: Value,
    start_delay: Duration,
    start_delay_fn: Option<DelayFn>,
    skip: Predicate,
    repeat: Predicate,
}

impl Step {
    /// Create a step presenting the given content with no delay and default
    /// (false) skip/repeat predicates.
    pub fn new(content: Value) -> Self {
        Self::builder(content).build()
    }

    /// Start building a step around the given content handle.
    pub fn builder(content: Value) -> StepBuilder {
        StepBuilder {
            content,
            start_delay: Duration::ZERO,
            start_delay_fn: None,
            skip: never(),
            repeat: never(),
        }
    }

    /// The opaque content handle. The engine never inspects it.
    pub fn content(&self) -> &Value {
        &self.content
    }

    /// Resolve the delay to apply before this presentation. The computed
    /// delay takes precedence over the fixed one when both are set.
    pub fn effective_delay(&self, ctx: &FlowContext) -> Duration {
        match &self.start_delay_fn {
            Some(f) => f(ctx),
            None => self.start_delay,
        }
    }

    pub(crate) fn should_skip(&self, ctx: &FlowContext) -> bool {
        (self.skip)(ctx)
    }

    pub(crate) fn should_repeat(&self, ctx: &FlowContext) -> bool {
        (self.repeat)(ctx)
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Step")
            .field("content", &self.content)
            .field("start_delay", &self.start_delay)
            .field("start_delay_fn", &self.start_delay_fn.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Step`].
pub struct StepBuilder {
    content: Value,
    start_delay: Duration,
    start_delay_fn: Option<DelayFn>,
    skip: Predicate,
    repeat: Predicate,
}

impl StepBuilder {
    /// Fixed delay between the previous step ending and this content being
    /// rendered. During the delay the display is cleared.
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.start_delay = delay;
        self
    }

    /// Per-presentation delay computed from engine state. Takes precedence
    /// over [`start_delay`](Self::start_delay) when set.
    pub fn start_delay_with<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> Duration + Send + Sync + 'static,
    {
        self.start_delay_fn = Some(Arc::new(f));
        self
    }

    /// Skip this step (no render, no record) whenever the predicate is true.
    pub fn skip_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.skip = Arc::new(f);
        self
    }

    /// Present this step again after completion whenever the predicate is
    /// true. Each repeat re-evaluates the skip predicate and the delay.
    pub fn repeat_if<F>(mut self, f: F) -> Self
    where
        F: Fn(&FlowContext) -> bool + Send + Sync + 'static,
    {
        self.repeat = Arc::new(f);
        self
    }

    pub fn build(self) -> Step {
        Step {
            content: self.content,
            start_delay: self.start_delay,
            start_delay_fn: self.start_delay_fn,
            skip: self.skip,
            repeat: self.repeat,
        }
    }
}
