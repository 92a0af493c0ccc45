//! Frame handling.
//!
//! - `RawFrame`: opaque pixel container produced by a `VideoSource`. Bytes are private.
//! - `InferenceView`: restricted view handed to classifiers. Pixels flow in, only
//!   a `Recognition` flows out.
//! - `FrameSampler`: pulls the latest frame once per tick and drops frames whose
//!   timestamp has not advanced.
//!
//! Frames live for a single tick. Nothing in this module retains pixels after
//! the tick that sampled them completes.

use anyhow::Result;
use std::time::Duration;
use zeroize::Zeroize;

use crate::detect::{GestureClassifier, Recognition};
use crate::ingest::VideoSource;

/// Bytes per pixel of frames handed to classifiers (packed RGB).
pub const FRAME_CHANNELS: u32 = 3;

// ----------------------------------------------------------------------------
// RawFrame
// ----------------------------------------------------------------------------

/// Opaque video frame. There is no `.as_bytes()`, no `Clone`, no `AsRef<[u8]>`.
pub struct RawFrame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// Presentation time, monotonic since the source was acquired.
    pub timestamp: Duration,
}

impl RawFrame {
    /// Wrap packed RGB pixels. Called by video sources.
    pub fn new(data: Vec<u8>, width: u32, height: u32, timestamp: Duration) -> Self {
        Self {
            data,
            width,
            height,
            timestamp,
        }
    }

    pub fn info(&self) -> FrameInfo {
        FrameInfo {
            width: self.width,
            height: self.height,
            timestamp: self.timestamp,
        }
    }

    pub fn inference_view(&self) -> InferenceView<'_> {
        InferenceView { frame: self }
    }

    pub(crate) fn byte_len(&self) -> usize {
        self.data.len()
    }
}

impl Drop for RawFrame {
    fn drop(&mut self) {
        // Zero pixels before the allocation is freed.
        self.data.zeroize();
    }
}

/// Pixel-free frame metadata, safe to pass to render sinks and logs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameInfo {
    pub width: u32,
    pub height: u32,
    pub timestamp: Duration,
}

// ----------------------------------------------------------------------------
// InferenceView
// ----------------------------------------------------------------------------

/// Restricted view of a frame for inference.
pub struct InferenceView<'a> {
    frame: &'a RawFrame,
}

impl<'a> InferenceView<'a> {
    pub fn width(&self) -> u32 {
        self.frame.width
    }

    pub fn height(&self) -> u32 {
        self.frame.height
    }

    pub fn timestamp(&self) -> Duration {
        self.frame.timestamp
    }

    /// Run a classifier on this frame.
    ///
    /// The classifier borrows the pixels for the duration of the call only.
    pub fn run_classifier(
        &self,
        classifier: &mut dyn GestureClassifier,
        timestamp_ms: u64,
    ) -> Result<Recognition> {
        classifier.recognize(
            &self.frame.data,
            self.frame.width,
            self.frame.height,
            timestamp_ms,
        )
    }
}

// ----------------------------------------------------------------------------
// FrameSampler
// ----------------------------------------------------------------------------

/// One sampled frame. Produced once per tick, dropped when the tick ends.
pub struct FrameSample {
    pub timestamp: Duration,
    pub frame: RawFrame,
}

impl FrameSample {
    pub fn timestamp_ms(&self) -> u64 {
        u64::try_from(self.timestamp.as_millis()).unwrap_or(u64::MAX)
    }
}

/// Sampler counters.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub sampled: u64,
    /// Polls that returned a frame with a timestamp already seen.
    pub stale: u64,
    pub not_ready: u64,
    pub errors: u64,
}

/// Pulls at most one new frame per tick from a video source.
pub struct FrameSampler {
    source: Box<dyn VideoSource>,
    last_timestamp: Option<Duration>,
    failing: bool,
    stats: SamplerStats,
}

impl FrameSampler {
    pub fn new(source: Box<dyn VideoSource>) -> Self {
        Self {
            source,
            last_timestamp: None,
            failing: false,
            stats: SamplerStats::default(),
        }
    }

    /// Sample the current frame.
    ///
    /// Returns `None` when the source is not ready, when polling fails, or when
    /// the frame's timestamp is not past the previously sampled one.
    pub fn sample(&mut self) -> Option<FrameSample> {
        if !self.source.is_ready() {
            self.stats.not_ready += 1;
            return None;
        }

        let frame = match self.source.poll_frame() {
            Ok(Some(frame)) => {
                if self.failing {
                    log::info!("video source {} recovered", self.source.name());
                    self.failing = false;
                }
                frame
            }
            Ok(None) => {
                self.stats.not_ready += 1;
                return None;
            }
            Err(e) => {
                self.stats.errors += 1;
                if !self.failing {
                    log::warn!("video source {} poll failed: {:#}", self.source.name(), e);
                    self.failing = true;
                }
                return None;
            }
        };

        if let Some(last) = self.last_timestamp {
            if frame.timestamp <= last {
                self.stats.stale += 1;
                return None;
            }
        }

        self.last_timestamp = Some(frame.timestamp);
        self.stats.sampled += 1;
        log::trace!(
            "sampled frame t={:?} ({} bytes)",
            frame.timestamp,
            frame.byte_len()
        );
        Some(FrameSample {
            timestamp: frame.timestamp,
            frame,
        })
    }

    pub fn last_timestamp(&self) -> Option<Duration> {
        self.last_timestamp
    }

    pub fn stats(&self) -> SamplerStats {
        self.stats
    }

    /// Release the underlying capture resource.
    pub fn release(&mut self) {
        self.source.release();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
