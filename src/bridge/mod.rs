//! Frame bridges between the synchronous pipeline and the session runtime
//!
//! ```text
//!   pipeline ──enqueue──► FrameBridge ──► pacing loop ──► orchestrator
//!                                                              │
//!   pipeline ◄──poll──── OutputFrameBridge ◄── subscriber ◄────┘
//! ```
//!
//! Both bridges are plain owned values; whoever builds the publisher and
//! subscriber shares them by `Arc`. Nothing here is process-global.

pub mod config;
pub mod ingress;
pub mod output;

pub use config::BridgeConfig;
pub use ingress::FrameBridge;
pub use output::OutputFrameBridge;
