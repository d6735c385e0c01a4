//! Error types for the flow engine.
//!
//! - [`TemplateError`] — Errors raised while building the authoring tree.
//! - [`FlowError`] — Top-level errors for a running flow.

pub mod flow_error;
pub mod template_error;

pub use flow_error::FlowError;
pub use template_error::TemplateError;

/// Convenience alias for flow-level results.
pub type FlowResult<T> = Result<T, FlowError>;
