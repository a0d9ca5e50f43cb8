//! Orchestrator session client
//!
//! Drives trickle-style media sessions against a remote orchestrator:
//! - [`NetworkPublisher`] negotiates a session and paces frames from the
//!   ingress bridge onto its publish endpoint
//! - [`NetworkSubscriber`] pulls the processed stream back into the output
//!   bridge, newest frame only
//!
//! The negotiation protocol and codecs are supplied by the caller through
//! the traits in [`orchestrator`].

pub mod config;
pub(crate) mod monitor;
pub mod orchestrator;
pub(crate) mod pacing;
pub mod publisher;
pub mod subscriber;

#[cfg(test)]
pub(crate) mod mock;

pub use config::{normalize_orchestrator_url, PublisherConfig, SubscriberConfig};
pub use orchestrator::{
    EventStream, MediaReader, MediaSource, MediaWriter, NegotiateRequest, OrchestratorClient,
    ReadOptions, SessionEvent, SessionInfo, WriteOptions,
};
pub use publisher::{NetworkPublisher, StartRequest};
pub use subscriber::{NetworkSubscriber, SubscriberStatus};
