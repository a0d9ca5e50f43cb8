//! Frame bridging and session control for trickle-style streaming
//!
//! Connects a synchronous, frame-by-frame image pipeline to an asynchronous
//! orchestrator session:
//!
//! ```text
//!   pipeline ──► FrameBridge ──► NetworkPublisher ──► orchestrator
//!                                (pacing loop)            │
//!   pipeline ◄── OutputFrameBridge ◄── NetworkSubscriber ◄┘
//! ```
//!
//! The publisher paces frames at the configured rate, repeats the last frame
//! when the pipeline stalls, and ends the session on fatal failures. All
//! async work runs on one dedicated runtime thread per publisher; callers
//! only touch thread-safe, non-blocking or time-bounded entry points.
//!
//! The negotiation protocol and codecs are external: implement
//! [`OrchestratorClient`] and [`MediaSource`] to plug them in.

pub mod bridge;
pub mod client;
pub mod controller;
pub mod error;
pub mod media;
pub mod runtime;
pub mod session;
pub mod settings;
pub mod stats;

pub use bridge::{BridgeConfig, FrameBridge, OutputFrameBridge};
pub use client::{
    MediaReader, MediaSource, MediaWriter, NetworkPublisher, NetworkSubscriber,
    OrchestratorClient, PublisherConfig, SessionEvent, SessionInfo, StartRequest,
    SubscriberConfig, SubscriberStatus,
};
pub use controller::{ControllerStatus, StreamController};
pub use error::{ClientError, Error, FrameError, Result};
pub use media::{Frame, PixelData};
pub use runtime::SessionRuntime;
pub use session::{HealthReport, PublisherStatus, StreamState};
pub use settings::RuntimeSettings;
