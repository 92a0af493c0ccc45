//! Video capture sources.
//!
//! This module provides the capture boundary for the session:
//! - Synthetic source (`stub://...`, testing and dry runs)
//! - USB/V4L2 devices (feature: ingest-v4l2)
//!
//! A source is singly owned by the running session. It is responsible for:
//! - Acquiring exclusive access to the device
//! - Reporting readiness (enough data buffered to produce a frame)
//! - Returning the latest frame with a monotonic timestamp
//! - Releasing the device on teardown
//!
//! A source MUST NOT:
//! - Store frames to disk
//! - Transmit frames over the network
//! - Open a second stream on a device it already holds

use anyhow::Result;

use crate::frame::RawFrame;

pub mod synthetic;
#[cfg(feature = "ingest-v4l2")]
pub mod v4l2;

pub use synthetic::{SyntheticConfig, SyntheticSource};
#[cfg(feature = "ingest-v4l2")]
pub use v4l2::{V4l2Config, V4l2Source};

/// Capture boundary consumed by the frame sampler.
pub trait VideoSource: Send {
    /// Human-readable identifier (device path or stub URL).
    fn name(&self) -> &str;

    /// Request exclusive access to the device.
    ///
    /// Failure means the capability is unavailable (permission denied, device
    /// missing); the session does not start.
    fn acquire(&mut self) -> Result<()>;

    /// True once the source can produce frames.
    fn is_ready(&self) -> bool;

    /// Latest available frame. May return a frame with the same timestamp as a
    /// previous poll; deduplication is the sampler's job.
    fn poll_frame(&mut self) -> Result<Option<RawFrame>>;

    /// Release the device. Must be idempotent.
    fn release(&mut self);
}

/// Capture settings shared by every source kind.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaptureSettings {
    /// `stub://<name>` for a synthetic source, otherwise a device path.
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            device: "stub://webcam".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

/// Build an unacquired source for the configured device.
pub fn open_source(settings: &CaptureSettings) -> Result<Box<dyn VideoSource>> {
    if settings.device.starts_with("stub://") {
        return Ok(Box::new(SyntheticSource::new(SyntheticConfig {
            name: settings.device.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        })));
    }

    #[cfg(feature = "ingest-v4l2")]
    {
        Ok(Box::new(V4l2Source::new(V4l2Config {
            device: settings.device.clone(),
            target_fps: settings.target_fps,
            width: settings.width,
            height: settings.height,
        })))
    }
    #[cfg(not(feature = "ingest-v4l2"))]
    {
        anyhow::bail!(
            "camera device {} requires the ingest-v4l2 feature",
            settings.device
        )
    }
}
