//! V4L2 camera source.
//!
//! Captures packed RGB frames from a local device node (e.g. /dev/video0).
//! Timestamps are measured from acquisition with a monotonic clock.

use anyhow::{bail, Context, Result};
use ouroboros::self_referencing;
use std::time::Instant;

use super::VideoSource;
use crate::frame::RawFrame;

const PACKED_RGB: &[u8; 4] = b"RGB3";

#[derive(Clone, Debug)]
pub struct V4l2Config {
    pub device: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for V4l2Config {
    fn default() -> Self {
        Self {
            device: "/dev/video0".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

#[self_referencing]
struct CaptureState {
    device: v4l::Device,
    #[borrows(mut device)]
    #[covariant]
    stream: v4l::prelude::MmapStream<'this, v4l::Device>,
}

pub struct V4l2Source {
    config: V4l2Config,
    state: Option<CaptureState>,
    acquired_at: Option<Instant>,
    active_width: u32,
    active_height: u32,
}

impl V4l2Source {
    pub fn new(config: V4l2Config) -> Self {
        Self {
            active_width: config.width,
            active_height: config.height,
            config,
            state: None,
            acquired_at: None,
        }
    }
}

/// Frames are handed on as packed RGB, so any other negotiated format is unusable.
fn require_packed_rgb(device: &str, fourcc: v4l::FourCC) -> Result<()> {
    if fourcc != v4l::FourCC::new(PACKED_RGB) {
        bail!(
            "v4l2 device {} delivers {} frames, not packed RGB (RGB3)",
            device,
            fourcc
        );
    }
    Ok(())
}

impl VideoSource for V4l2Source {
    fn name(&self) -> &str {
        &self.config.device
    }

    fn acquire(&mut self) -> Result<()> {
        use v4l::buffer::Type;
        use v4l::video::Capture;

        if self.state.is_some() {
            bail!("{} is already acquired", self.config.device);
        }

        let mut device = v4l::Device::with_path(&self.config.device)
            .with_context(|| format!("open v4l2 device {}", self.config.device))?;
        let mut format = device.format().context("read v4l2 format")?;
        format.width = self.config.width;
        format.height = self.config.height;
        format.fourcc = v4l::FourCC::new(PACKED_RGB);

        let format = match device.set_format(&format) {
            Ok(format) => format,
            Err(err) => {
                log::warn!(
                    "V4l2Source: failed to set format on {}: {}",
                    self.config.device,
                    err
                );
                device
                    .format()
                    .context("read v4l2 format after set failure")?
            }
        };
        require_packed_rgb(&self.config.device, format.fourcc)?;

        if self.config.target_fps > 0 {
            let params = v4l::video::capture::Parameters::with_fps(self.config.target_fps);
            if let Err(err) = device.set_params(&params) {
                log::warn!(
                    "V4l2Source: failed to set fps on {}: {}",
                    self.config.device,
                    err
                );
            }
        }

        self.active_width = format.width;
        self.active_height = format.height;

        let state = CaptureStateBuilder {
            device,
            stream_builder: |device| {
                v4l::prelude::MmapStream::with_buffers(device, Type::VideoCapture, 4)
                    .map_err(|err| anyhow::Error::new(err).context("create v4l2 buffer stream"))
            },
        }
        .try_build()?;
        self.state = Some(state);
        self.acquired_at = Some(Instant::now());

        log::info!(
            "V4l2Source: acquired {} ({}x{})",
            self.config.device,
            self.active_width,
            self.active_height
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.state.is_some()
    }

    fn poll_frame(&mut self) -> Result<Option<RawFrame>> {
        use v4l::io::traits::CaptureStream;

        let (Some(state), Some(acquired_at)) = (self.state.as_mut(), self.acquired_at) else {
            return Ok(None);
        };
        let (buf, _meta) = state
            .with_mut(|fields| fields.stream.next())
            .context("capture v4l2 frame")?;

        Ok(Some(RawFrame::new(
            buf.to_vec(),
            self.active_width,
            self.active_height,
            acquired_at.elapsed(),
        )))
    }

    fn release(&mut self) {
        if self.state.take().is_some() {
            self.acquired_at = None;
            log::info!("V4l2Source: released {}", self.config.device);
        }
    }
}
