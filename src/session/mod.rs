//! Publish session state
//!
//! The state machine for one publish attempt and the snapshots handed to
//! callers on other threads.

pub mod state;
pub mod status;

pub use state::{SessionState, StreamState};
pub use status::{HealthReport, PublisherStatus};
