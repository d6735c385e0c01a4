//! The renderer seam — how step content reaches a display.
//!
//! The engine never inspects content; it hands the step's opaque handle to
//! whatever [`Renderer`] the run was configured with, together with a small
//! presentation context. Rendering a blank interval (during a start delay)
//! goes through [`Renderer::clear`].

use async_trait::async_trait;
use serde_json::Value;

/// Presentation metadata passed alongside the content handle.
#[derive(Debug, Clone)]
pub struct PresentationContext {
    /// Execution id of the run presenting this content.
    pub execution_id: String,
    /// Nesting depth of the step being presented.
    pub level: u32,
    /// How many times this step completed before this presentation (0 for
    /// the first presentation, counting up across repeats).
    pub repetition: u64,
}

/// Turns a content handle into something on screen.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Blank the display (shown during a step's start delay).
    async fn clear(&self);

    /// Present the given content. The engine stamps the step's start time
    /// once this returns.
    async fn render(&self, content: &Value, presentation: &PresentationContext);
}

/// A renderer that displays nothing. Useful for headless runs and tests.
pub struct NullRenderer;

#[async_trait]
impl Renderer for NullRenderer {
    async fn clear(&self) {}

    async fn render(&self, _content: &Value, _presentation: &PresentationContext) {}
}
