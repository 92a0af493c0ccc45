//! Synthetic frame source (`stub://`).
//!
//! Produces frames at `target_fps` against the wall clock, so polling faster
//! than the frame rate returns repeated timestamps the same way a real camera
//! does between decoded frames.

use anyhow::{anyhow, Result};
use std::time::{Duration, Instant};

use super::VideoSource;
use crate::frame::{RawFrame, FRAME_CHANNELS};

#[derive(Clone, Debug)]
pub struct SyntheticConfig {
    pub name: String,
    pub target_fps: u32,
    pub width: u32,
    pub height: u32,
}

impl Default for SyntheticConfig {
    fn default() -> Self {
        Self {
            name: "stub://webcam".to_string(),
            target_fps: 30,
            width: 640,
            height: 480,
        }
    }
}

pub struct SyntheticSource {
    config: SyntheticConfig,
    acquired_at: Option<Instant>,
    frames_generated: u64,
}

impl SyntheticSource {
    pub fn new(config: SyntheticConfig) -> Self {
        Self {
            config,
            acquired_at: None,
            frames_generated: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frames_generated
    }

    fn frame_interval(&self) -> Duration {
        Duration::from_secs(1) / self.config.target_fps.max(1)
    }

    /// Moving gradient so consecutive frames differ.
    fn generate_pixels(&self, frame_index: u64) -> Vec<u8> {
        let pixel_count = (self.config.width as usize)
            .saturating_mul(self.config.height as usize)
            .saturating_mul(FRAME_CHANNELS as usize);
        let mut pixels = vec![0u8; pixel_count];
        for (i, pixel) in pixels.iter_mut().enumerate() {
            *pixel = ((i as u64 + frame_index) % 256) as u8;
        }
        pixels
    }
}

impl VideoSource for SyntheticSource {
    fn name(&self) -> &str {
        &self.config.name
    }

    fn acquire(&mut self) -> Result<()> {
        if self.acquired_at.is_some() {
            return Err(anyhow!("{} is already acquired", self.config.name));
        }
        self.acquired_at = Some(Instant::now());
        log::info!(
            "SyntheticSource: acquired {} ({}x{} @ {} fps)",
            self.config.name,
            self.config.width,
            self.config.height,
            self.config.target_fps
        );
        Ok(())
    }

    fn is_ready(&self) -> bool {
        self.acquired_at.is_some()
    }

    fn poll_frame(&mut self) -> Result<Option<RawFrame>> {
        let Some(acquired_at) = self.acquired_at else {
            return Ok(None);
        };
        let interval = self.frame_interval();
        let frame_index = (acquired_at.elapsed().as_nanos() / interval.as_nanos().max(1)) as u64;
        // Nothing decoded during the first interval.
        if frame_index == 0 {
            return Ok(None);
        }
        let timestamp = interval.saturating_mul(u32::try_from(frame_index).unwrap_or(u32::MAX));

        self.frames_generated += 1;
        Ok(Some(RawFrame::new(
            self.generate_pixels(frame_index),
            self.config.width,
            self.config.height,
            timestamp,
        )))
    }

    fn release(&mut self) {
        if self.acquired_at.take().is_some() {
            log::info!("SyntheticSource: released {}", self.config.name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> SyntheticConfig {
        SyntheticConfig {
            name: "stub://test".to_string(),
            target_fps: 100,
            width: 4,
            height: 2,
        }
    }

    #[test]
    fn produces_frames_after_acquire() -> Result<()> {
        let mut source = SyntheticSource::new(small_config());
        assert!(source.poll_frame()?.is_none());

        source.acquire()?;
        std::thread::sleep(Duration::from_millis(25));
        let frame = source.poll_frame()?.expect("frame after one interval");
        assert_eq!(frame.width, 4);
        assert_eq!(frame.height, 2);
        assert!(frame.timestamp >= Duration::from_millis(10));
        Ok(())
    }

    #[test]
    fn timestamps_advance_with_wall_clock() -> Result<()> {
        let mut source = SyntheticSource::new(small_config());
        source.acquire()?;
        std::thread::sleep(Duration::from_millis(15));
        let first = source.poll_frame()?.expect("first frame").timestamp;
        std::thread::sleep(Duration::from_millis(30));
        let second = source.poll_frame()?.expect("second frame").timestamp;
        assert!(second > first);
        Ok(())
    }

    #[test]
    fn double_acquire_is_rejected() -> Result<()> {
        let mut source = SyntheticSource::new(small_config());
        source.acquire()?;
        assert!(source.acquire().is_err());
        source.release();
        source.release();
        assert!(!source.is_ready());
        Ok(())
    }
}
