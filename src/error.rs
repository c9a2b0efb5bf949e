// THEORY:
// Every failure the compositor can report is one variant of `RenderError`. The
// rendering path never panics on bad input and never swallows an error: plane
// readers, quantizers and region tasks all return a `RenderResult`, and the
// compositor reduces the results of its tasks to the first failure.
//
// Key architectural principles:
// 1.  **Tagged Failures**: Each variant carries exactly the context a caller needs
//     to build its own fault (channel index, coordinate, underlying cause). The
//     compositor does not format messages beyond that.
// 2.  **Fatal To The Call**: No variant is recoverable inside a render. A failing
//     task still lets the other in-flight tasks finish, then the call fails.

use thiserror::Error;

/// Convenience alias used throughout the crate.
pub type RenderResult<T> = Result<T, RenderError>;

/// The reasons a render call can fail.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum RenderError {
    /// The plane definition named an orientation the compositor does not know.
    #[error("invalid slice ID: {0}")]
    InvalidSlice(u8),

    /// A sample was requested outside the bounds of the plane or volume.
    #[error("invalid coordinate ({x1}, {x2}) for a {size_x1}x{size_x2} plane")]
    InvalidCoordinate {
        x1: usize,
        x2: usize,
        size_x1: usize,
        size_x2: usize,
    },

    /// A quantum strategy could not map a sample into the codomain.
    #[error("quantization failed for channel {channel} on value {value}: {reason}")]
    QuantizationError {
        /// Channel index in the volume; overlays are numbered from `size_c` up.
        channel: usize,
        value: f64,
        reason: String,
    },

    /// The pixel source could not be opened, read or closed.
    #[error("pixel source failure: {0}")]
    ResourceError(String),

    /// Any other task failure, wrapped with its cause.
    #[error("rendering task failed: {0}")]
    InternalError(String),

    /// The compositor configuration could not be loaded or is inconsistent.
    #[error("invalid configuration: {0}")]
    Config(String),
}

impl RenderError {
    pub(crate) fn quantization(channel: usize, value: f64, reason: impl Into<String>) -> Self {
        RenderError::QuantizationError {
            channel,
            value,
            reason: reason.into(),
        }
    }

    /// Re-tags a quantization failure with the layer it happened on.
    ///
    /// Strategies don't know which position they occupy in a render, so the
    /// region task patches the index in on the way out.
    pub(crate) fn for_channel(self, index: usize) -> Self {
        match self {
            RenderError::QuantizationError { value, reason, .. } => RenderError::QuantizationError {
                channel: index,
                value,
                reason,
            },
            other => other,
        }
    }
}

impl From<std::io::Error> for RenderError {
    fn from(err: std::io::Error) -> Self {
        RenderError::ResourceError(err.to_string())
    }
}
