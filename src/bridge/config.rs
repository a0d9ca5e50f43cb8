//! Bridge configuration

use std::time::Duration;

/// Default number of frames the ingress bridge holds
pub const DEFAULT_CAPACITY: usize = 90;

/// Default output frame size used for blanks before any frame arrives
pub const DEFAULT_OUTPUT_WIDTH: u32 = 1280;
pub const DEFAULT_OUTPUT_HEIGHT: u32 = 720;

/// Configuration for the frame bridges
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Maximum frames held (queued + buffered before the loop attaches)
    pub capacity: usize,

    /// How long the pacing loop waits for the first frame before re-checking
    /// cancellation and consulting the fallback source
    pub first_frame_poll: Duration,

    /// Width of the blank output frame before anything is received
    pub output_width: u32,

    /// Height of the blank output frame before anything is received
    pub output_height: u32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            first_frame_poll: Duration::from_millis(250),
            output_width: DEFAULT_OUTPUT_WIDTH,
            output_height: DEFAULT_OUTPUT_HEIGHT,
        }
    }
}

impl BridgeConfig {
    /// Set the queue capacity (at least 1)
    pub fn capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Set the first-frame poll period
    pub fn first_frame_poll(mut self, poll: Duration) -> Self {
        self.first_frame_poll = poll;
        self
    }

    /// Set the default output size
    pub fn output_size(mut self, width: u32, height: u32) -> Self {
        self.output_width = width;
        self.output_height = height;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = BridgeConfig::default();

        assert_eq!(config.capacity, 90);
        assert_eq!(config.output_width, 1280);
        assert_eq!(config.output_height, 720);
        assert_eq!(config.first_frame_poll, Duration::from_millis(250));
    }

    #[test]
    fn test_builder_capacity_floor() {
        let config = BridgeConfig::default().capacity(0);

        assert_eq!(config.capacity, 1);
    }

    #[test]
    fn test_builder_chaining() {
        let config = BridgeConfig::default()
            .capacity(4)
            .first_frame_poll(Duration::from_millis(10))
            .output_size(64, 48);

        assert_eq!(config.capacity, 4);
        assert_eq!(config.first_frame_poll, Duration::from_millis(10));
        assert_eq!(config.output_width, 64);
        assert_eq!(config.output_height, 48);
    }
}
