//! Ingress frame bridge
//!
//! Hands frames from synchronous producers (the image pipeline) to the async
//! pacing loop. Producers never block: when the bridge is full the oldest
//! frame is dropped and counted.
//!
//! ```text
//!   producer thread                      session runtime
//!   ───────────────                      ───────────────
//!   enqueue(frame)
//!        │  loop attached? ──yes──► queue ──► take_timeout() ──► pacing loop
//!        │                   no
//!        └──────────────────────► buffer ──(attach_loop: flush in order)──► queue
//! ```
//!
//! The queue and the pre-attach buffer share one capacity, so the bridge never
//! holds more than `capacity` frames in total.

use std::collections::VecDeque;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;

use super::config::BridgeConfig;
use crate::error::Result;
use crate::media::{FallbackSource, Frame, PixelData};
use crate::stats::BridgeStats;

#[derive(Debug, Default)]
struct Inner {
    /// Frames visible to the consuming runtime
    queue: VecDeque<Frame>,
    /// Frames held while no runtime is attached
    buffer: VecDeque<Frame>,
    attached: bool,
    dropped_before_loop: u64,
    dropped_overflow: u64,
}

impl Inner {
    fn total(&self) -> usize {
        self.queue.len() + self.buffer.len()
    }
}

/// Bounded, thread-safe hand-off queue from sync producers to the session runtime
pub struct FrameBridge {
    config: BridgeConfig,
    inner: Mutex<Inner>,
    notify: Notify,
    fallback: Mutex<Option<Box<dyn FallbackSource>>>,
}

impl FrameBridge {
    /// Create a bridge with the given configuration; capacity is at least 1
    pub fn new(config: BridgeConfig) -> Self {
        let capacity = config.capacity;
        let config = config.capacity(capacity);
        Self {
            config,
            inner: Mutex::new(Inner::default()),
            notify: Notify::new(),
            fallback: Mutex::new(None),
        }
    }

    /// Install a fallback source consulted while no live frame has been produced
    pub fn with_fallback(mut self, source: impl FallbackSource + 'static) -> Self {
        *self.fallback.get_mut() = Some(Box::new(source));
        self
    }

    /// Replace (or clear) the fallback source
    pub fn set_fallback(&self, source: Option<Box<dyn FallbackSource>>) {
        *self.fallback.lock() = source;
    }

    /// Bridge configuration
    pub fn config(&self) -> &BridgeConfig {
        &self.config
    }

    /// Mark the consuming runtime as ready and flush buffered frames into the
    /// queue, oldest first.
    ///
    /// Safe to call again after a restart.
    pub fn attach_loop(&self) {
        let flushed = {
            let mut inner = self.inner.lock();
            inner.attached = true;
            let buffered = std::mem::take(&mut inner.buffer);
            let flushed = buffered.len();
            inner.queue.extend(buffered);
            flushed
        };

        if flushed > 0 {
            tracing::info!(frames = flushed, "Flushed buffered frames into queue");
            self.notify.notify_one();
        } else {
            tracing::debug!("Frame bridge attached");
        }
    }

    /// Detach the consuming runtime.
    ///
    /// Undelivered frames move back into the buffer, ahead of anything
    /// enqueued later, so the next attach replays them in order.
    pub fn detach_loop(&self) {
        let mut inner = self.inner.lock();
        inner.attached = false;
        let mut queued = std::mem::take(&mut inner.queue);
        queued.append(&mut inner.buffer);
        inner.buffer = queued;
        tracing::debug!(buffered = inner.buffer.len(), "Frame bridge detached");
    }

    /// Whether a consuming runtime is attached
    pub fn is_attached(&self) -> bool {
        self.inner.lock().attached
    }

    /// Enqueue a frame without blocking.
    ///
    /// If the bridge is full the oldest frame is dropped.
    pub fn enqueue(&self, frame: Frame) {
        let (attached, depth) = {
            let mut inner = self.inner.lock();

            if inner.total() >= self.config.capacity {
                // Queue frames are always older than buffered ones
                if inner.queue.pop_front().is_none() {
                    inner.buffer.pop_front();
                }
                if inner.attached {
                    inner.dropped_overflow += 1;
                    tracing::warn!(
                        total_dropped = inner.dropped_overflow,
                        "Frame queue full; dropped oldest frame"
                    );
                } else {
                    inner.dropped_before_loop += 1;
                    tracing::warn!(
                        total_dropped = inner.dropped_before_loop,
                        "Frame buffer full before loop ready; dropped oldest frame"
                    );
                }
            }

            if inner.attached {
                inner.queue.push_back(frame);
            } else {
                inner.buffer.push_back(frame);
            }
            (inner.attached, inner.total())
        };

        if attached {
            self.notify.notify_one();
        }
        tracing::trace!(depth, attached, "Frame enqueued");
    }

    /// Validate and normalize host pixel data, then enqueue it.
    ///
    /// Malformed input is rejected before anything is queued.
    pub fn enqueue_pixels(
        &self,
        width: u32,
        height: u32,
        channels: usize,
        pixels: PixelData<'_>,
    ) -> Result<()> {
        let frame = Frame::from_pixels(width, height, channels, pixels)?;
        self.enqueue(frame);
        Ok(())
    }

    /// Normalize a host tensor (see [`Frame::from_tensor`]), then enqueue it
    pub fn enqueue_tensor(&self, shape: &[usize], pixels: PixelData<'_>) -> Result<()> {
        let frame = Frame::from_tensor(shape, pixels)?;
        self.enqueue(frame);
        Ok(())
    }

    /// Pop the oldest queued frame without waiting
    pub fn try_take(&self) -> Option<Frame> {
        self.inner.lock().queue.pop_front()
    }

    /// Wait up to `timeout` for a queued frame.
    ///
    /// Returns `None` when the timeout elapses first.
    pub async fn take_timeout(&self, timeout: Duration) -> Option<Frame> {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            let notified = self.notify.notified();
            if let Some(frame) = self.try_take() {
                return Some(frame);
            }
            if tokio::time::timeout_at(deadline, notified).await.is_err() {
                return self.try_take();
            }
        }
    }

    /// Pull a frame from the fallback source, if one is installed
    pub fn next_fallback(&self) -> Option<Frame> {
        self.fallback.lock().as_mut()?.next_frame()
    }

    /// Whether a fallback source is installed
    pub fn has_fallback(&self) -> bool {
        self.fallback.lock().is_some()
    }

    /// Frames currently held (queued + buffered)
    pub fn depth(&self) -> usize {
        self.inner.lock().total()
    }

    /// Instantaneous counters
    pub fn stats(&self) -> BridgeStats {
        let inner = self.inner.lock();
        BridgeStats {
            queued: inner.queue.len(),
            buffered: inner.buffer.len(),
            depth: inner.total(),
            dropped_before_loop: inner.dropped_before_loop,
            dropped_overflow: inner.dropped_overflow,
            capacity: self.config.capacity,
        }
    }
}

impl Default for FrameBridge {
    fn default() -> Self {
        Self::new(BridgeConfig::default())
    }
}

impl std::fmt::Debug for FrameBridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FrameBridge")
            .field("config", &self.config)
            .field("stats", &self.stats())
            .field("has_fallback", &self.has_fallback())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::media::StaticFrameSource;

    fn numbered(n: u8) -> Frame {
        Frame::from_rgb(1, 1, vec![n, n, n]).unwrap()
    }

    fn id(frame: &Frame) -> u8 {
        frame.data()[0]
    }

    #[test]
    fn test_fifo_across_attach() {
        let bridge = FrameBridge::default();
        for n in 0..5 {
            bridge.enqueue(numbered(n));
        }
        assert!(bridge.try_take().is_none());
        assert_eq!(bridge.stats().buffered, 5);

        bridge.attach_loop();
        bridge.enqueue(numbered(5));

        let drained: Vec<u8> = std::iter::from_fn(|| bridge.try_take())
            .map(|f| id(&f))
            .collect();
        assert_eq!(drained, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_capacity_before_attach() {
        let bridge = FrameBridge::new(BridgeConfig::default().capacity(3));
        for n in 0..7 {
            bridge.enqueue(numbered(n));
        }

        let stats = bridge.stats();
        assert_eq!(stats.depth, 3);
        assert_eq!(stats.dropped_before_loop, 4);
        assert_eq!(stats.dropped_overflow, 0);

        bridge.attach_loop();
        let drained: Vec<u8> = std::iter::from_fn(|| bridge.try_take())
            .map(|f| id(&f))
            .collect();
        assert_eq!(drained, vec![4, 5, 6]);
    }

    #[test]
    fn test_capacity_after_attach() {
        let bridge = FrameBridge::new(BridgeConfig::default().capacity(2));
        bridge.attach_loop();
        for n in 0..5 {
            bridge.enqueue(numbered(n));
        }

        let stats = bridge.stats();
        assert_eq!(stats.queued, 2);
        assert_eq!(stats.dropped_overflow, 3);
        assert_eq!(id(&bridge.try_take().unwrap()), 3);
    }

    #[test]
    fn test_capacity_shared_between_queue_and_buffer() {
        let bridge = FrameBridge::new(BridgeConfig::default().capacity(3));
        bridge.attach_loop();
        bridge.enqueue(numbered(0));
        bridge.enqueue(numbered(1));
        bridge.detach_loop();
        bridge.enqueue(numbered(2));
        bridge.enqueue(numbered(3));

        assert_eq!(bridge.depth(), 3);
        assert_eq!(bridge.stats().dropped_before_loop, 1);

        bridge.attach_loop();
        let drained: Vec<u8> = std::iter::from_fn(|| bridge.try_take())
            .map(|f| id(&f))
            .collect();
        assert_eq!(drained, vec![1, 2, 3]);
    }

    #[test]
    fn test_enqueue_pixels_rejects_malformed() {
        let bridge = FrameBridge::default();
        let result = bridge.enqueue_pixels(2, 2, 2, PixelData::U8(&[0; 8]));
        assert!(result.unwrap_err().is_validation());
        assert_eq!(bridge.depth(), 0);
    }

    #[test]
    fn test_zero_capacity_is_clamped() {
        let config = BridgeConfig {
            capacity: 0,
            ..Default::default()
        };
        let bridge = FrameBridge::new(config);
        bridge.enqueue(numbered(0));
        bridge.enqueue(numbered(1));

        let stats = bridge.stats();
        assert_eq!(bridge.config().capacity, 1);
        assert_eq!(stats.capacity, 1);
        assert_eq!(stats.depth, 1);
        assert_eq!(stats.dropped_before_loop, 1);
    }

    #[test]
    fn test_enqueue_tensor_planar() {
        let bridge = FrameBridge::default();
        bridge.attach_loop();
        assert!(bridge.enqueue_tensor(&[4], PixelData::U8(&[0; 4])).is_err());

        let planes = [7u8, 8, 9];
        assert!(bridge.enqueue_tensor(&[1, 3, 1, 1], PixelData::U8(&planes)).is_ok());
        assert_eq!(bridge.try_take().unwrap().pixel(0, 0), Some([7, 8, 9]));
    }

    #[test]
    fn test_fallback_source() {
        let bridge = FrameBridge::default();
        assert!(bridge.next_fallback().is_none());

        let bridge = bridge.with_fallback(StaticFrameSource::single(numbered(9)));
        assert!(bridge.has_fallback());
        assert_eq!(id(&bridge.next_fallback().unwrap()), 9);
    }

    #[tokio::test(start_paused = true)]
    async fn test_take_timeout_elapses() {
        let bridge = FrameBridge::default();
        bridge.attach_loop();

        let start = tokio::time::Instant::now();
        assert!(bridge.take_timeout(Duration::from_millis(100)).await.is_none());
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test]
    async fn test_take_timeout_wakes_on_enqueue() {
        let bridge = Arc::new(FrameBridge::default());
        bridge.attach_loop();

        let producer = Arc::clone(&bridge);
        let handle = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            producer.enqueue(numbered(42));
        });

        let frame = bridge.take_timeout(Duration::from_secs(5)).await;
        assert_eq!(frame.map(|f| id(&f)), Some(42));
        handle.join().unwrap();
    }
}
