//! Statistics for bridges and sessions

use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::Serialize;

/// Ingress bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BridgeStats {
    /// Frames visible to the session runtime
    pub queued: usize,
    /// Frames held while no runtime was attached
    pub buffered: usize,
    /// queued + buffered
    pub depth: usize,
    /// Frames dropped while no runtime was attached
    pub dropped_before_loop: u64,
    /// Frames dropped because the queue was full
    pub dropped_overflow: u64,
    /// Configured capacity
    pub capacity: usize,
}

impl BridgeStats {
    /// Total frames dropped
    pub fn dropped(&self) -> u64 {
        self.dropped_before_loop + self.dropped_overflow
    }

    /// Fill level in the range 0.0..=1.0
    pub fn utilization(&self) -> f64 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.depth as f64 / self.capacity as f64
    }
}

/// Output bridge counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct OutputStats {
    /// Frames stored since the last reset
    pub frames_received: u64,
    /// When the latest frame was stored, in seconds since the Unix epoch
    pub timestamp: Option<f64>,
    /// Width of the latest frame (or the default blank size)
    pub frame_width: u32,
    /// Height of the latest frame (or the default blank size)
    pub frame_height: u32,
    /// Whether a frame is stored
    pub has_frame: bool,
}

/// Publisher frame counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FrameCounters {
    /// Frames written to the publish endpoint, repeats and fallbacks included
    pub frames_sent: u64,
    /// Writes that re-sent the previous frame because none was fresh
    pub frames_repeated: u64,
    /// Writes that used a fallback source frame
    pub frames_fallback: u64,
    /// Repeats since the last fresh frame
    pub consecutive_repeats: u32,
}

impl FrameCounters {
    /// Record a fresh frame
    pub fn on_fresh(&mut self) {
        self.frames_sent += 1;
        self.consecutive_repeats = 0;
    }

    /// Record a repeated frame
    pub fn on_repeat(&mut self) {
        self.frames_sent += 1;
        self.frames_repeated += 1;
        self.consecutive_repeats = self.consecutive_repeats.saturating_add(1);
    }

    /// Record a fallback frame
    pub fn on_fallback(&mut self) {
        self.frames_sent += 1;
        self.frames_fallback += 1;
    }

    /// Fraction of sent frames that were repeats
    pub fn repeat_ratio(&self) -> f64 {
        if self.frames_sent == 0 {
            return 0.0;
        }
        self.frames_repeated as f64 / self.frames_sent as f64
    }

    /// Effective send rate over `elapsed`
    pub fn send_rate(&self, elapsed: Duration) -> f64 {
        let secs = elapsed.as_secs_f64();
        if secs > 0.0 {
            self.frames_sent as f64 / secs
        } else {
            0.0
        }
    }
}

/// Seconds since the Unix epoch
pub fn unix_secs(time: SystemTime) -> f64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bridge_stats_dropped() {
        let stats = BridgeStats {
            dropped_before_loop: 3,
            dropped_overflow: 4,
            ..Default::default()
        };
        assert_eq!(stats.dropped(), 7);
    }

    #[test]
    fn test_bridge_stats_utilization() {
        let stats = BridgeStats {
            depth: 45,
            capacity: 90,
            ..Default::default()
        };
        assert!((stats.utilization() - 0.5).abs() < f64::EPSILON);
        assert_eq!(BridgeStats::default().utilization(), 0.0);
    }

    #[test]
    fn test_frame_counters() {
        let mut counters = FrameCounters::default();
        counters.on_fresh();
        counters.on_repeat();
        counters.on_repeat();
        assert_eq!(counters.frames_sent, 3);
        assert_eq!(counters.frames_repeated, 2);
        assert_eq!(counters.consecutive_repeats, 2);

        counters.on_fresh();
        assert_eq!(counters.consecutive_repeats, 0);
        assert!((counters.repeat_ratio() - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_fallback_counts_as_sent() {
        let mut counters = FrameCounters::default();
        counters.on_fallback();
        assert_eq!(counters.frames_sent, 1);
        assert_eq!(counters.frames_fallback, 1);
        assert_eq!(counters.frames_repeated, 0);
    }

    #[test]
    fn test_send_rate_zero_duration() {
        let mut counters = FrameCounters::default();
        counters.on_fresh();
        assert_eq!(counters.send_rate(Duration::ZERO), 0.0);
        assert!((counters.send_rate(Duration::from_secs(2)) - 0.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_unix_secs() {
        assert_eq!(unix_secs(UNIX_EPOCH), 0.0);
        assert_eq!(unix_secs(UNIX_EPOCH + Duration::from_millis(1500)), 1.5);
    }
}
