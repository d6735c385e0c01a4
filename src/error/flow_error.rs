//! Run-time error types.

use thiserror::Error;

/// Errors raised while a flow is running.
#[derive(Debug, Error)]
pub enum FlowError {
    /// A completion signal arrived while no rendered step was awaiting one.
    /// The graph is not advanced; the caller is told instead of the signal
    /// being silently dropped.
    #[error("no step is awaiting completion")]
    NoStepAwaitingCompletion,
    /// A completion signal arrived after the run already terminated.
    #[error("flow already terminated")]
    Terminated,
    #[error("internal error: {0}")]
    Internal(String),
}
