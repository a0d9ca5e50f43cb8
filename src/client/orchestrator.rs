//! Orchestrator and media I/O collaborators
//!
//! The session negotiation protocol and the video codecs live outside this
//! crate. These traits are the boundary: an implementation negotiates a
//! session, opens a write handle that encodes and publishes frames, exposes
//! the orchestrator's event stream, and opens read handles that yield decoded
//! frames from a subscribe URL.

use std::time::Duration;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::ClientError;
use crate::media::Frame;

/// Parameters for negotiating a session
#[derive(Debug, Clone, PartialEq)]
pub struct NegotiateRequest {
    /// Orchestrator base URL (`https://host:port`)
    pub orchestrator_url: String,
    /// Optional payment/ticket signer URL
    pub signer_url: Option<String>,
    /// Model/pipeline to run
    pub model_id: String,
    /// Pipeline parameters forwarded verbatim
    pub params: serde_json::Value,
    /// Caller-supplied request identifier
    pub request_id: Option<String>,
    /// Caller-supplied stream identifier
    pub stream_id: Option<String>,
}

/// Endpoints of a negotiated session
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionInfo {
    pub publish_url: String,
    pub subscribe_url: String,
    pub control_url: String,
    /// Event stream endpoint; empty when the session has none
    pub events_url: String,
    pub session_id: String,
}

impl SessionInfo {
    /// Whether the session exposes an event stream
    pub fn has_events(&self) -> bool {
        !self.events_url.is_empty()
    }

    /// Whether the session exposes an output stream
    pub fn has_subscribe(&self) -> bool {
        !self.subscribe_url.is_empty()
    }
}

/// Options for opening the publish handle
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct WriteOptions {
    pub fps: f64,
    pub keyframe_interval: Duration,
    pub frame_width: u32,
    pub frame_height: u32,
}

/// Options for opening a subscribe handle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReadOptions {
    /// Segment to start from; negative values count back from the live edge
    pub start_seq: i64,
    /// Read chunk size in bytes
    pub chunk_size: usize,
    /// Reconnect attempts before the read fails
    pub max_retries: u32,
}

/// A notification from the orchestrator's event stream
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionEvent {
    /// Event category, e.g. `status` or `error`
    pub event_type: String,
    /// Event payload
    #[serde(default)]
    pub status: serde_json::Value,
}

impl SessionEvent {
    /// A `status` event
    pub fn status(status: serde_json::Value) -> Self {
        Self {
            event_type: "status".into(),
            status,
        }
    }

    /// Whether the orchestrator reports an error
    pub fn is_error(&self) -> bool {
        self.event_type.eq_ignore_ascii_case("error")
    }
}

/// Stream of orchestrator events; `None` means the stream closed gracefully
pub type EventStream = BoxStream<'static, Result<SessionEvent, ClientError>>;

/// Session negotiation and control
#[async_trait]
pub trait OrchestratorClient: Send + Sync + 'static {
    /// Negotiate a session and return its endpoints
    async fn negotiate(&self, request: &NegotiateRequest) -> Result<SessionInfo, ClientError>;

    /// Open the publish handle for a session
    async fn open_write(
        &self,
        session: &SessionInfo,
        options: &WriteOptions,
    ) -> Result<Box<dyn MediaWriter>, ClientError>;

    /// Subscribe to the session's event stream
    async fn events(&self, session: &SessionInfo) -> Result<EventStream, ClientError>;

    /// Send a control message (e.g. updated pipeline parameters)
    async fn send_control(
        &self,
        session: &SessionInfo,
        message: &serde_json::Value,
    ) -> Result<(), ClientError>;

    /// Release the session on the orchestrator
    async fn close_session(&self, session: &SessionInfo) -> Result<(), ClientError>;
}

/// Encodes and publishes frames for one session
#[async_trait]
pub trait MediaWriter: Send {
    /// Write one frame with the given presentation index
    async fn write_frame(&mut self, frame: &Frame, pts: u64) -> Result<(), ClientError>;

    /// Flush and close the handle
    async fn close(&mut self) -> Result<(), ClientError>;
}

/// Opens subscriptions that yield decoded frames
#[async_trait]
pub trait MediaSource: Send + Sync + 'static {
    /// Open a read handle on a subscribe URL
    async fn open_read(
        &self,
        subscribe_url: &str,
        options: &ReadOptions,
    ) -> Result<Box<dyn MediaReader>, ClientError>;
}

/// Yields decoded frames from one subscription
#[async_trait]
pub trait MediaReader: Send {
    /// Next decoded frame; `Ok(None)` when the stream has ended
    async fn next_frame(&mut self) -> Result<Option<Frame>, ClientError>;

    /// Close the handle
    async fn close(&mut self) -> Result<(), ClientError>;
}
