//! Output frame bridge
//!
//! Single-slot, latest-wins store for decoded frames coming back from the
//! orchestrator. The subscriber writes, synchronous consumers poll. Readers
//! get either the whole latest frame or an explicit "no frame yet"; a single
//! mutex guards the slot so a read never observes a half-written update.

use std::time::SystemTime;

use parking_lot::Mutex;

use crate::error::Result;
use crate::media::{Frame, PixelData};
use crate::stats::OutputStats;

#[derive(Debug)]
struct Slot {
    frame: Option<Frame>,
    timestamp: Option<SystemTime>,
    frames_received: u64,
    /// Size used for blank frames: the last frame seen, or the configured default
    width: u32,
    height: u32,
}

/// Latest-wins store for inbound frames
#[derive(Debug)]
pub struct OutputFrameBridge {
    slot: Mutex<Slot>,
}

impl OutputFrameBridge {
    /// Create an empty bridge whose blank frame is `width`x`height`
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            slot: Mutex::new(Slot {
                frame: None,
                timestamp: None,
                frames_received: 0,
                width,
                height,
            }),
        }
    }

    /// Store a frame, replacing whatever was there
    pub fn put(&self, frame: Frame) {
        let mut slot = self.slot.lock();
        slot.width = frame.width();
        slot.height = frame.height();
        slot.frame = Some(frame);
        slot.timestamp = Some(SystemTime::now());
        slot.frames_received += 1;
        tracing::trace!(
            width = slot.width,
            height = slot.height,
            total = slot.frames_received,
            "Output frame stored"
        );
    }

    /// Validate and normalize host pixel data, then store it
    pub fn put_pixels(
        &self,
        width: u32,
        height: u32,
        channels: usize,
        pixels: PixelData<'_>,
    ) -> Result<()> {
        let frame = Frame::from_pixels(width, height, channels, pixels)?;
        self.put(frame);
        Ok(())
    }

    /// Latest frame and the time it was stored, if any
    pub fn get(&self) -> Option<(Frame, SystemTime)> {
        let slot = self.slot.lock();
        let frame = slot.frame.clone()?;
        Some((frame, slot.timestamp.unwrap_or(SystemTime::UNIX_EPOCH)))
    }

    /// Latest frame, or a zero-filled frame sized to the last known dimensions.
    ///
    /// The boolean reports whether a real frame was returned.
    pub fn get_or_blank(&self) -> (Frame, Option<SystemTime>, bool) {
        let slot = self.slot.lock();
        match slot.frame {
            Some(ref frame) => (frame.clone(), slot.timestamp, true),
            None => (Frame::blank(slot.width, slot.height), None, false),
        }
    }

    /// Zero-filled frame sized to the last known dimensions
    pub fn blank_frame(&self) -> Frame {
        let slot = self.slot.lock();
        Frame::blank(slot.width, slot.height)
    }

    /// Whether a frame has been stored since the last reset
    pub fn has_frame(&self) -> bool {
        self.slot.lock().frame.is_some()
    }

    /// Frames stored since the last reset
    pub fn frames_received(&self) -> u64 {
        self.slot.lock().frames_received
    }

    /// Clear the stored frame and counters
    pub fn reset(&self) {
        let mut slot = self.slot.lock();
        slot.frame = None;
        slot.timestamp = None;
        slot.frames_received = 0;
        tracing::debug!("Output bridge reset");
    }

    /// Snapshot of the slot
    pub fn stats(&self) -> OutputStats {
        let slot = self.slot.lock();
        OutputStats {
            frames_received: slot.frames_received,
            timestamp: slot.timestamp.map(crate::stats::unix_secs),
            frame_width: slot.width,
            frame_height: slot.height,
            has_frame: slot.frame.is_some(),
        }
    }
}

impl Default for OutputFrameBridge {
    fn default() -> Self {
        Self::new(
            super::config::DEFAULT_OUTPUT_WIDTH,
            super::config::DEFAULT_OUTPUT_HEIGHT,
        )
    }
}
