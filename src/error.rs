//! Error taxonomy shared by the render pipeline, the hydration driver and
//! the service boundary.

use thiserror::Error;

/// Failures surfaced by [`Renderer::render`](crate::Renderer::render).
///
/// The pipeline never recovers from these itself. The service boundary
/// turns them into degraded responses carrying fallback markup.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RenderError {
    /// The requested tag is not in the component allowlist.
    #[error("Tag \"{0}\" not allowed")]
    TagNotAllowed(String),

    /// Something threw while the sandbox was built, executed or serialized.
    #[error("Render failed: {0}")]
    RenderFailure(String),

    /// The request or its properties could not be accepted as given.
    #[error("Invalid request: {0}")]
    InvalidRequestShape(String),
}

impl RenderError {
    pub(crate) fn failure(err: impl std::fmt::Display) -> Self {
        Self::RenderFailure(err.to_string())
    }

    /// Whether the caller, rather than the component, is at fault.
    pub fn is_client_error(&self) -> bool {
        matches!(self, Self::TagNotAllowed(_) | Self::InvalidRequestShape(_))
    }
}
