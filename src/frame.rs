//! Frames and frame sources.
//!
//! Capture and decoding live outside the kernel. A `Frame` carries only what
//! the compliance engine and the external face pipeline need: the pixels,
//! the dimensions (for the dynamic midline) and the capture time (for alert
//! cooldowns and event timestamps).

use anyhow::{anyhow, Result};
use std::time::{Duration, SystemTime};

/// A single decoded frame.
pub struct Frame {
    pixels: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Monotonic per-stream sequence number.
    pub sequence: u64,
    pub captured_at: SystemTime,
}

impl Frame {
    /// RGB24 frame. The pixel buffer must match the dimensions.
    pub fn new(
        pixels: Vec<u8>,
        width: u32,
        height: u32,
        sequence: u64,
        captured_at: SystemTime,
    ) -> Result<Self> {
        let expected = width as usize * height as usize * 3;
        if pixels.len() != expected {
            return Err(anyhow!(
                "frame buffer size {} does not match {}x{} rgb24 ({} bytes)",
                pixels.len(),
                width,
                height,
                expected
            ));
        }
        Ok(Self {
            pixels,
            width,
            height,
            sequence,
            captured_at,
        })
    }

    /// Frame without pixel data, for detector replays.
    pub fn blank(width: u32, height: u32, sequence: u64, captured_at: SystemTime) -> Self {
        Self {
            pixels: Vec::new(),
            width,
            height,
            sequence,
            captured_at,
        }
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn has_pixels(&self) -> bool {
        !self.pixels.is_empty()
    }
}

/// Produces frames for one stream. `Ok(None)` means the stream ended.
pub trait FrameSource: Send {
    fn next_frame(&mut self) -> Result<Option<Frame>>;
}

/// Pixel-less frames stamped with wall-clock time, paced to a target fps.
///
/// Pairs with `ReplayBackend`: the replay supplies detections, this supplies
/// dimensions and capture times.
pub struct SyntheticFrameSource {
    width: u32,
    height: u32,
    interval: Duration,
    sequence: u64,
    limit: Option<u64>,
}

impl SyntheticFrameSource {
    pub fn new(width: u32, height: u32, target_fps: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero"));
        }
        let interval = if target_fps == 0 {
            Duration::ZERO
        } else {
            Duration::from_secs(1) / target_fps
        };
        Ok(Self {
            width,
            height,
            interval,
            sequence: 0,
            limit: None,
        })
    }

    /// Stop after `frames` frames.
    pub fn with_limit(mut self, frames: u64) -> Self {
        self.limit = Some(frames);
        self
    }
}

impl FrameSource for SyntheticFrameSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(limit) = self.limit {
            if self.sequence >= limit {
                return Ok(None);
            }
        }
        if self.sequence > 0 && !self.interval.is_zero() {
            std::thread::sleep(self.interval);
        }
        let frame = Frame::blank(self.width, self.height, self.sequence, SystemTime::now());
        self.sequence += 1;
        Ok(Some(frame))
    }
}
