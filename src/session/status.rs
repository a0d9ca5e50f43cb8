//! Status snapshots
//!
//! Plain values copied out of the live session under one lock, so readers on
//! other threads always see a consistent view.

use serde::Serialize;

use super::state::{SessionState, StreamState};
use crate::client::PublisherConfig;
use crate::stats::{unix_secs, BridgeStats};

/// Publisher status returned by `start`, `stop` and `status`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PublisherStatus {
    /// Whether the session is starting, running or degraded
    pub running: bool,
    /// Lifecycle state
    pub state: StreamState,
    /// Frames written, repeats and fallbacks included
    pub frames_sent: u64,
    /// Writes that re-sent the previous frame
    pub frames_repeated: u64,
    /// Writes that used a fallback frame
    pub frames_fallback: u64,
    pub publish_url: String,
    pub subscribe_url: String,
    pub control_url: String,
    pub session_id: String,
    /// Last recorded failure, empty if none
    pub last_error: String,
    /// Start time in seconds since the Unix epoch
    pub started_at: Option<f64>,
    /// Frames held by the ingress bridge
    pub queue_depth: usize,
    /// Full ingress bridge counters
    pub queue: BridgeStats,
    pub model_id: String,
    pub request_id: Option<String>,
    pub fps: f64,
    pub frame_width: u32,
    pub frame_height: u32,
}

impl PublisherStatus {
    /// Build a snapshot from the session, its config and the bridge counters
    pub fn from_session(session: &SessionState, config: &PublisherConfig, queue: BridgeStats) -> Self {
        let (publish_url, subscribe_url, control_url, session_id) = match session.info {
            Some(ref info) => (
                info.publish_url.clone(),
                info.subscribe_url.clone(),
                info.control_url.clone(),
                info.session_id.clone(),
            ),
            None => Default::default(),
        };

        Self {
            running: session.state.is_active(),
            state: session.state,
            frames_sent: session.counters.frames_sent,
            frames_repeated: session.counters.frames_repeated,
            frames_fallback: session.counters.frames_fallback,
            publish_url,
            subscribe_url,
            control_url,
            session_id,
            last_error: session.last_error.clone().unwrap_or_default(),
            started_at: session.started_at.map(unix_secs),
            queue_depth: queue.depth,
            queue,
            model_id: if session.model_id.is_empty() {
                config.model_id.clone()
            } else {
                session.model_id.clone()
            },
            request_id: session.request_id.clone(),
            fps: config.fps,
            frame_width: config.frame_width,
            frame_height: config.frame_height,
        }
    }
}

/// Health report returned by `get_health`
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthReport {
    /// See `NetworkPublisher::is_healthy`
    pub healthy: bool,
    pub state: StreamState,
    /// Whether the background tasks are still running
    pub tasks_alive: bool,
    /// Seconds since start
    pub uptime_secs: f64,
    pub frames_sent: u64,
    pub frames_repeated: u64,
    /// Repeats since the last fresh frame
    pub consecutive_repeats: u32,
    pub last_error: String,
    pub queue: BridgeStats,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::SessionInfo;

    #[test]
    fn test_idle_snapshot() {
        let config = PublisherConfig::default();
        let status = PublisherStatus::from_session(&SessionState::idle(), &config, BridgeStats::default());

        assert!(!status.running);
        assert_eq!(status.state, StreamState::Idle);
        assert_eq!(status.publish_url, "");
        assert_eq!(status.last_error, "");
        assert_eq!(status.model_id, config.model_id);
        assert!(status.started_at.is_none());
    }

    #[test]
    fn test_running_snapshot() {
        let config = PublisherConfig::default();
        let mut session = SessionState::starting("sd-turbo", Some("req-1".into()));
        session.info = Some(SessionInfo {
            publish_url: "https://o/pub".into(),
            subscribe_url: "https://o/sub".into(),
            control_url: "https://o/ctl".into(),
            events_url: String::new(),
            session_id: "abc".into(),
        });
        session.on_fresh_frame();
        session.on_repeated_frame();

        let queue = BridgeStats {
            queued: 2,
            depth: 2,
            capacity: 90,
            ..Default::default()
        };
        let status = PublisherStatus::from_session(&session, &config, queue);

        assert!(status.running);
        assert_eq!(status.state, StreamState::Degraded);
        assert_eq!(status.frames_sent, 2);
        assert_eq!(status.frames_repeated, 1);
        assert_eq!(status.subscribe_url, "https://o/sub");
        assert_eq!(status.session_id, "abc");
        assert_eq!(status.queue_depth, 2);
        assert_eq!(status.model_id, "sd-turbo");
        assert_eq!(status.request_id.as_deref(), Some("req-1"));
    }

    #[test]
    fn test_snapshot_serializes() {
        let status = PublisherStatus::from_session(
            &SessionState::idle(),
            &PublisherConfig::default(),
            BridgeStats::default(),
        );
        let json = serde_json::to_value(&status).unwrap();

        assert_eq!(json["running"], false);
        assert_eq!(json["state"], "idle");
        assert_eq!(json["queue"]["capacity"], 0);
    }
}
