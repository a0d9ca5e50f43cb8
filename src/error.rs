//! Error types
//!
//! Three layers of failure are distinguished:
//! - [`FrameError`]: a malformed frame, rejected synchronously at the call site
//! - [`ClientError`]: a failure reported by the orchestrator or media collaborators,
//!   classified as fatal or transient
//! - [`Error`]: the crate-level error returned from public operations

use std::io;
use std::time::Duration;

use thiserror::Error;

/// Result type alias using the crate error
pub type Result<T> = std::result::Result<T, Error>;

/// Frame validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    /// Width or height is zero
    #[error("frame dimensions must be non-zero (got {width}x{height})")]
    EmptyDimensions { width: u32, height: u32 },

    /// Only RGB and RGBA input is accepted
    #[error("frame must be HxWxC with C in (3, 4) (got C={0})")]
    UnsupportedChannels(usize),

    /// Pixel buffer does not match the declared shape
    #[error("frame buffer has {actual} values, expected {expected}")]
    LengthMismatch { expected: usize, actual: usize },

    /// Tensor rank or layout is not an image
    #[error("tensor must be HxWxC or CxHxW with an optional batch dimension (got shape {0:?})")]
    UnsupportedShape(Vec<usize>),
}

/// Errors reported by the orchestrator client and media I/O collaborators
///
/// The variants are the failure categories the pacing loop and the event
/// monitor act on. See [`ClientError::is_fatal`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ClientError {
    /// The orchestrator no longer knows the session
    #[error("session not found: {0}")]
    SessionNotFound(String),

    /// The publish endpoint refused the write
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// Encoding the frame failed
    #[error("encoder failure: {0}")]
    Encoder(String),

    /// Session negotiation failed
    #[error("negotiation failed: {0}")]
    Negotiation(String),

    /// The event stream failed
    #[error("event stream failed: {0}")]
    EventStream(String),

    /// A single network hiccup; the next attempt may succeed
    #[error("transport error: {0}")]
    Transport(String),

    /// The handle was already closed
    #[error("handle closed")]
    Closed,
}

impl ClientError {
    /// Whether this failure ends the session.
    ///
    /// Only [`ClientError::Transport`] is retried.
    pub fn is_fatal(&self) -> bool {
        !matches!(self, ClientError::Transport(_))
    }
}

/// Crate-level error
#[derive(Debug, Error)]
pub enum Error {
    /// Malformed frame
    #[error("invalid frame: {0}")]
    Frame(#[from] FrameError),

    /// Malformed configuration
    #[error("invalid configuration: {0}")]
    Config(String),

    /// Collaborator failure surfaced to a synchronous caller
    #[error(transparent)]
    Client(#[from] ClientError),

    /// A blocking call did not complete within its bound
    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    /// Operation requires a live session
    #[error("no active session")]
    NotRunning,

    /// Operation requires an attached runtime
    #[error("no runtime attached")]
    NoRuntime,

    /// The hosting runtime failed or went away
    #[error("runtime error: {0}")]
    Runtime(String),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON (de)serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Image decoding error
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
}

impl Error {
    /// Whether this is a validation error raised before anything reached a session
    pub fn is_validation(&self) -> bool {
        matches!(self, Error::Frame(_) | Error::Config(_))
    }
}
