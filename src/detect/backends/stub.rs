use anyhow::Result;
use std::collections::VecDeque;

use crate::detect::backend::GestureClassifier;
use crate::detect::result::Recognition;
use crate::gesture::{landmarks, Landmark, LANDMARK_COUNT};

/// Classifier that replays a fixed script of recognitions.
///
/// Once the script runs out it reports no hands, unless created with
/// `cycling`, in which case it starts over.
pub struct ScriptedClassifier {
    script: Vec<Recognition>,
    pending: VecDeque<Recognition>,
    cycle: bool,
    calls: u64,
    closed: bool,
}

impl ScriptedClassifier {
    pub fn new(script: Vec<Recognition>) -> Self {
        Self {
            pending: script.iter().cloned().collect(),
            script,
            cycle: false,
            calls: 0,
            closed: false,
        }
    }

    pub fn cycling(script: Vec<Recognition>) -> Self {
        Self {
            cycle: true,
            ..Self::new(script)
        }
    }

    /// A hand sweeping left to right, resting for 20 frames then shooting for 10.
    pub fn demo_cycle() -> Self {
        let mut script = Vec::with_capacity(30);
        for step in 0..30u32 {
            let x = 0.2 + 0.02 * step as f32;
            let label = if step < 20 { "resting" } else { "shooting" };
            script.push(Recognition::single(label, 0.9, hand_at(x, 0.5, -0.05)));
        }
        Self::cycling(script)
    }

    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

impl GestureClassifier for ScriptedClassifier {
    fn name(&self) -> &'static str {
        "scripted"
    }

    fn recognize(
        &mut self,
        _pixels: &[u8],
        _width: u32,
        _height: u32,
        _timestamp_ms: u64,
    ) -> Result<Recognition> {
        self.calls += 1;
        if self.pending.is_empty() && self.cycle {
            self.pending = self.script.iter().cloned().collect();
        }
        Ok(self.pending.pop_front().unwrap_or_default())
    }

    fn close(&mut self) {
        self.closed = true;
    }
}

/// A flat 21-point hand with its palm base at (x, y, z).
pub fn hand_at(x: f32, y: f32, z: f32) -> Vec<Landmark> {
    let mut points: Vec<Landmark> = (0..LANDMARK_COUNT)
        .map(|i| Landmark::new(x, (y - 0.01 * i as f32).clamp(0.0, 1.0), z))
        .collect();
    points[landmarks::PALM_BASE] = Landmark::new(x, y, z);
    points
}
