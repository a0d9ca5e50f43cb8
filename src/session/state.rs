//! Session state machine
//!
//! Tracks one publish attempt from `start()` to its terminal state.
//!
//! ```text
//!   IDLE ──► STARTING ──► RUNNING ⇄ DEGRADED
//!                │            │         │
//!                └────────────┴────┬────┘
//!                                  ▼
//!                           CLOSED | ERROR
//! ```
//!
//! `CLOSED` and `ERROR` are terminal for a session; a restart replaces the
//! whole [`SessionState`] with a fresh one.

use std::fmt;
use std::time::{Duration, Instant, SystemTime};

use serde::Serialize;

use crate::client::SessionInfo;
use crate::stats::FrameCounters;

/// Lifecycle state of a publish session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamState {
    /// Never started, or discarded
    Idle,
    /// Negotiating; no frame written and no status event seen yet
    Starting,
    /// Fresh frames are flowing
    Running,
    /// Alive, but the producer stalled and frames are being repeated
    Degraded,
    /// Stopped explicitly or the event stream ended gracefully
    Closed,
    /// Terminated by a fatal failure
    Error,
}

impl StreamState {
    /// Lowercase name used in status snapshots
    pub fn as_str(&self) -> &'static str {
        match self {
            StreamState::Idle => "idle",
            StreamState::Starting => "starting",
            StreamState::Running => "running",
            StreamState::Degraded => "degraded",
            StreamState::Closed => "closed",
            StreamState::Error => "error",
        }
    }

    /// Whether no further transitions are possible
    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamState::Closed | StreamState::Error)
    }

    /// Whether the session is between start and a terminal state
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            StreamState::Starting | StreamState::Running | StreamState::Degraded
        )
    }

    /// Whether moving to `next` is a legal transition
    pub fn can_transition(&self, next: StreamState) -> bool {
        use StreamState::*;

        if *self == next {
            return true;
        }
        matches!(
            (*self, next),
            (Idle, Starting)
                | (Starting, Running | Degraded | Closed | Error)
                | (Running, Degraded | Closed | Error)
                | (Degraded, Running | Closed | Error)
        )
    }
}

impl fmt::Display for StreamState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Complete state of one publish session
#[derive(Debug, Clone)]
pub struct SessionState {
    /// Current lifecycle state
    pub state: StreamState,

    /// Endpoints returned by negotiation
    pub info: Option<SessionInfo>,

    /// Frame counters
    pub counters: FrameCounters,

    /// Last recorded failure
    pub last_error: Option<String>,

    /// Wall-clock start time
    pub started_at: Option<SystemTime>,

    /// Monotonic start time, for grace-window checks
    started_instant: Option<Instant>,

    /// Model requested for this session
    pub model_id: String,

    /// Caller-supplied request identifier
    pub request_id: Option<String>,
}

impl SessionState {
    /// A session that has not been started
    pub fn idle() -> Self {
        Self {
            state: StreamState::Idle,
            info: None,
            counters: FrameCounters::default(),
            last_error: None,
            started_at: None,
            started_instant: None,
            model_id: String::new(),
            request_id: None,
        }
    }

    /// A fresh session entering `STARTING`
    pub fn starting(model_id: impl Into<String>, request_id: Option<String>) -> Self {
        let mut session = Self::idle();
        session.model_id = model_id.into();
        session.request_id = request_id;
        session.started_at = Some(SystemTime::now());
        session.started_instant = Some(Instant::now());
        session.transition(StreamState::Starting);
        session
    }

    /// Move to `next` if the transition is legal.
    ///
    /// Illegal transitions (anything out of a terminal state, or back to
    /// `IDLE`/`STARTING`) are logged and ignored.
    pub fn transition(&mut self, next: StreamState) -> bool {
        if !self.state.can_transition(next) {
            tracing::warn!(from = %self.state, to = %next, "Rejected state transition");
            return false;
        }
        if self.state != next {
            tracing::debug!(from = %self.state, to = %next, "State transition");
            self.state = next;
        }
        true
    }

    /// Terminate with an error
    pub fn fail(&mut self, error: impl Into<String>) {
        let error = error.into();
        if self.transition(StreamState::Error) {
            self.last_error = Some(error);
        }
    }

    /// Terminate cleanly
    pub fn close(&mut self) {
        self.transition(StreamState::Closed);
    }

    /// A fresh frame was written
    pub fn on_fresh_frame(&mut self) {
        self.counters.on_fresh();
        self.transition(StreamState::Running);
    }

    /// The previous frame was written again
    pub fn on_repeated_frame(&mut self) {
        self.counters.on_repeat();
        self.transition(StreamState::Degraded);
    }

    /// A fallback frame was written
    pub fn on_fallback_frame(&mut self) {
        self.counters.on_fallback();
        self.transition(StreamState::Degraded);
    }

    /// A status event arrived from the orchestrator
    pub fn on_status_event(&mut self) {
        if self.state == StreamState::Starting {
            self.transition(StreamState::Running);
        }
    }

    /// Time since `start()`
    pub fn elapsed(&self) -> Option<Duration> {
        self.started_instant.map(|t| t.elapsed())
    }

    /// Health as seen from outside.
    ///
    /// `STARTING` counts as healthy only within `grace` of the start.
    pub fn is_healthy(&self, grace: Duration) -> bool {
        match self.state {
            StreamState::Running | StreamState::Degraded => true,
            StreamState::Starting => self.elapsed().map(|e| e <= grace).unwrap_or(false),
            _ => false,
        }
    }
}

impl Default for SessionState {
    fn default() -> Self {
        Self::idle()
    }
}
