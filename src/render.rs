//! Landmark overlay rendering.
//!
//! Rendering is cosmetic: the session calls sinks through `render_guarded`,
//! so a failing or panicking sink never affects detection or emission.

use anyhow::{Context, Result};
use image::{Rgba, RgbaImage};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::PathBuf;

use crate::frame::FrameInfo;
use crate::gesture::HandObservation;

pub const LANDMARK_RADIUS: i64 = 5;

const BACKGROUND: Rgba<u8> = Rgba([0, 0, 0, 255]);
const LANDMARK_COLOR: Rgba<u8> = Rgba([255, 255, 255, 255]);

pub trait RenderSink: Send {
    fn render(&mut self, frame: &FrameInfo, observations: &[HandObservation]) -> Result<()>;
}

/// Sink that draws nothing.
#[derive(Debug, Default)]
pub struct NullSink;

impl RenderSink for NullSink {
    fn render(&mut self, _frame: &FrameInfo, _observations: &[HandObservation]) -> Result<()> {
        Ok(())
    }
}

/// Render through `sink`, logging and discarding errors and panics.
pub fn render_guarded(
    sink: &mut dyn RenderSink,
    frame: &FrameInfo,
    observations: &[HandObservation],
) -> bool {
    match catch_unwind(AssertUnwindSafe(|| sink.render(frame, observations))) {
        Ok(Ok(())) => true,
        Ok(Err(e)) => {
            log::debug!("render failed: {:#}", e);
            false
        }
        Err(_) => {
            log::debug!("render panicked");
            false
        }
    }
}

#[derive(Clone, Debug)]
pub struct CanvasConfig {
    pub width: u32,
    pub height: u32,
    /// Write the canvas as PNG here every `snapshot_every` frames.
    pub snapshot_path: Option<PathBuf>,
    pub snapshot_every: u64,
}

impl Default for CanvasConfig {
    fn default() -> Self {
        Self {
            width: 640,
            height: 480,
            snapshot_path: None,
            snapshot_every: 30,
        }
    }
}

/// Draws every landmark of every hand as a white dot on a black canvas.
pub struct CanvasSink {
    config: CanvasConfig,
    canvas: RgbaImage,
    frames: u64,
}

impl CanvasSink {
    pub fn new(config: CanvasConfig) -> Self {
        let canvas = RgbaImage::from_pixel(config.width.max(1), config.height.max(1), BACKGROUND);
        Self {
            config,
            canvas,
            frames: 0,
        }
    }

    /// The most recently rendered canvas.
    pub fn canvas(&self) -> &RgbaImage {
        &self.canvas
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    fn draw_dot(&mut self, cx: i64, cy: i64) {
        let (w, h) = (i64::from(self.canvas.width()), i64::from(self.canvas.height()));
        for y in (cy - LANDMARK_RADIUS).max(0)..=(cy + LANDMARK_RADIUS).min(h - 1) {
            for x in (cx - LANDMARK_RADIUS).max(0)..=(cx + LANDMARK_RADIUS).min(w - 1) {
                let (dx, dy) = (x - cx, y - cy);
                if dx * dx + dy * dy <= LANDMARK_RADIUS * LANDMARK_RADIUS {
                    self.canvas.put_pixel(x as u32, y as u32, LANDMARK_COLOR);
                }
            }
        }
    }
}

impl RenderSink for CanvasSink {
    fn render(&mut self, _frame: &FrameInfo, observations: &[HandObservation]) -> Result<()> {
        for pixel in self.canvas.pixels_mut() {
            *pixel = BACKGROUND;
        }

        let (w, h) = (f64::from(self.canvas.width()), f64::from(self.canvas.height()));
        for hand in observations {
            for landmark in &hand.landmarks {
                if !landmark.x.is_finite() || !landmark.y.is_finite() {
                    continue;
                }
                let cx = (f64::from(landmark.x) * w).round() as i64;
                let cy = (f64::from(landmark.y) * h).round() as i64;
                self.draw_dot(cx, cy);
            }
        }
        self.frames += 1;

        if let Some(path) = &self.config.snapshot_path {
            if self.frames % self.config.snapshot_every.max(1) == 0 {
                self.canvas
                    .save(path)
                    .with_context(|| format!("write overlay snapshot {}", path.display()))?;
            }
        }
        Ok(())
    }
}
