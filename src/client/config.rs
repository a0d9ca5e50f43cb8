//! Publisher and subscriber configuration

use std::time::{Duration, Instant};

use url::Url;

use super::orchestrator::{ReadOptions, WriteOptions};
use crate::error::{Error, Result};

/// Configuration for a [`NetworkPublisher`](super::NetworkPublisher)
#[derive(Debug, Clone, PartialEq)]
pub struct PublisherConfig {
    /// Orchestrator base URL; must be `https://host[:port]`
    pub orchestrator_url: String,

    /// Optional signer URL
    pub signer_url: Option<String>,

    /// Default model when `start` does not name one
    pub model_id: String,

    /// Target frame rate
    pub fps: f64,

    /// Encoded frame width
    pub frame_width: u32,

    /// Encoded frame height
    pub frame_height: u32,

    /// Keyframe interval requested from the encoder
    pub keyframe_interval: Duration,

    /// Upper bound on `start` as seen by the calling thread
    pub start_timeout: Duration,

    /// Upper bound on `stop` as seen by the calling thread
    pub stop_timeout: Duration,

    /// How long `STARTING` still counts as healthy
    pub startup_grace: Duration,

    /// Event stream errors within this window after start are retried
    pub event_not_ready_window: Duration,

    /// Delay before re-opening the event stream inside the not-ready window
    pub event_retry_backoff: Duration,

    /// Consecutive repeats tolerated before the session is failed (`None` = unbounded)
    pub max_consecutive_repeats: Option<u32>,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            orchestrator_url: "https://localhost:8935".into(),
            signer_url: None,
            model_id: "comfystream".into(),
            fps: 30.0,
            frame_width: 512,
            frame_height: 512,
            keyframe_interval: Duration::from_secs(2),
            start_timeout: Duration::from_secs(30),
            stop_timeout: Duration::from_secs(15),
            startup_grace: Duration::from_secs(10),
            event_not_ready_window: Duration::from_secs(10),
            event_retry_backoff: Duration::from_millis(500),
            max_consecutive_repeats: None,
        }
    }
}

impl PublisherConfig {
    /// Create a config for the given orchestrator
    pub fn new(orchestrator_url: impl Into<String>) -> Self {
        Self {
            orchestrator_url: orchestrator_url.into(),
            ..Default::default()
        }
    }

    /// Set the signer URL
    pub fn signer_url(mut self, url: impl Into<String>) -> Self {
        self.signer_url = Some(url.into());
        self
    }

    /// Set the default model
    pub fn model_id(mut self, model_id: impl Into<String>) -> Self {
        self.model_id = model_id.into();
        self
    }

    /// Set the target frame rate
    pub fn fps(mut self, fps: f64) -> Self {
        self.fps = fps;
        self
    }

    /// Set the encoded frame size
    pub fn frame_size(mut self, width: u32, height: u32) -> Self {
        self.frame_width = width;
        self.frame_height = height;
        self
    }

    /// Set the keyframe interval
    pub fn keyframe_interval(mut self, interval: Duration) -> Self {
        self.keyframe_interval = interval;
        self
    }

    /// Set the start timeout
    pub fn start_timeout(mut self, timeout: Duration) -> Self {
        self.start_timeout = timeout;
        self
    }

    /// Set the stop timeout
    pub fn stop_timeout(mut self, timeout: Duration) -> Self {
        self.stop_timeout = timeout;
        self
    }

    /// Set the startup grace window
    pub fn startup_grace(mut self, grace: Duration) -> Self {
        self.startup_grace = grace;
        self
    }

    /// Set the event stream not-ready window
    pub fn event_not_ready_window(mut self, window: Duration) -> Self {
        self.event_not_ready_window = window;
        self
    }

    /// Set the event stream retry backoff
    pub fn event_retry_backoff(mut self, backoff: Duration) -> Self {
        self.event_retry_backoff = backoff;
        self
    }

    /// Fail the session after this many consecutive repeats
    pub fn max_consecutive_repeats(mut self, max: u32) -> Self {
        self.max_consecutive_repeats = Some(max);
        self
    }

    /// Time between frames.
    ///
    /// Saturates at `Duration::MAX` for rates `validate` rejects.
    pub fn frame_interval(&self) -> Duration {
        self.checked_frame_interval().unwrap_or(Duration::MAX)
    }

    /// Time between frames, if a deadline that far out can be scheduled
    fn checked_frame_interval(&self) -> Option<Duration> {
        let interval = Duration::try_from_secs_f64(1.0 / self.fps).ok()?;
        Instant::now().checked_add(interval).map(|_| interval)
    }

    /// Check the config and normalize the orchestrator URL
    pub fn validate(&self) -> Result<Self> {
        if !self.fps.is_finite() || self.fps <= 0.0 {
            return Err(Error::Config(format!("fps must be positive (got {})", self.fps)));
        }
        if self.checked_frame_interval().is_none() {
            return Err(Error::Config(format!("fps is too low to schedule (got {})", self.fps)));
        }
        if self.frame_width == 0 || self.frame_height == 0 {
            return Err(Error::Config(format!(
                "frame size must be non-zero (got {}x{})",
                self.frame_width, self.frame_height
            )));
        }
        if self.model_id.trim().is_empty() {
            return Err(Error::Config("model_id is required".into()));
        }

        let mut config = self.clone();
        config.orchestrator_url = normalize_orchestrator_url(&self.orchestrator_url)?;
        Ok(config)
    }

    /// Options for opening the publish handle
    pub fn write_options(&self) -> WriteOptions {
        WriteOptions {
            fps: self.fps,
            keyframe_interval: self.keyframe_interval,
            frame_width: self.frame_width,
            frame_height: self.frame_height,
        }
    }
}

/// Normalize an orchestrator URL to `https://host[:port]`.
///
/// A bare `host:port` is accepted. Any other scheme, a path, a query or a
/// fragment is rejected.
pub fn normalize_orchestrator_url(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    let candidate = if trimmed.contains("://") {
        trimmed.to_string()
    } else {
        format!("https://{}", trimmed)
    };

    let invalid = || Error::Config(format!("Orchestrator URL must be https://host:port (got {:?})", raw));
    let url = Url::parse(&candidate).map_err(|_| invalid())?;

    if url.scheme() != "https" {
        return Err(invalid());
    }
    let host = url.host_str().filter(|h| !h.is_empty()).ok_or_else(invalid)?;
    if !matches!(url.path(), "" | "/") || url.query().is_some() || url.fragment().is_some() {
        return Err(Error::Config(format!(
            "Orchestrator URL must not include a path/query/fragment: {:?}",
            raw
        )));
    }

    Ok(match url.port() {
        Some(port) => format!("https://{}:{}", host, port),
        None => format!("https://{}", host),
    })
}

/// Configuration for a [`NetworkSubscriber`](super::NetworkSubscriber)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriberConfig {
    /// Segment to start from; -2 starts near the live edge
    pub start_seq: i64,

    /// Read chunk size in bytes
    pub chunk_size: usize,

    /// Reconnect attempts before the read fails
    pub max_retries: u32,
}

impl Default for SubscriberConfig {
    fn default() -> Self {
        Self {
            start_seq: -2,
            chunk_size: 256 * 1024,
            max_retries: 5,
        }
    }
}

impl SubscriberConfig {
    /// Set the start segment
    pub fn start_seq(mut self, seq: i64) -> Self {
        self.start_seq = seq;
        self
    }

    /// Set the read chunk size
    pub fn chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }

    /// Set the retry budget
    pub fn max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Options for opening the read handle
    pub fn read_options(&self) -> ReadOptions {
        ReadOptions {
            start_seq: self.start_seq,
            chunk_size: self.chunk_size,
            max_retries: self.max_retries,
        }
    }
}
