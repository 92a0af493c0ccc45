use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::Path;
use std::time::Duration;

use super::backends::{ProcessClassifier, ScriptedClassifier};
use super::result::Recognition;
use crate::session::StopHandle;

const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_REPLY_TIMEOUT: Duration = Duration::from_secs(2);

/// External gesture/landmark classifier.
///
/// # Boundary
///
/// The classifier is an opaque collaborator. Implementations:
/// - Receive pixels only for the duration of `recognize`
/// - Must be called with non-decreasing timestamps (video running mode)
/// - Report failures as errors; the adapter turns them into "no hands"
pub trait GestureClassifier: Send {
    /// Backend identifier.
    fn name(&self) -> &'static str;

    /// Classify one packed-RGB frame.
    fn recognize(
        &mut self,
        pixels: &[u8],
        width: u32,
        height: u32,
        timestamp_ms: u64,
    ) -> Result<Recognition>;

    /// Optional warm-up hook, run once before the first tick.
    fn warm_up(&mut self) -> Result<()> {
        Ok(())
    }

    /// Release classifier resources. Must be idempotent.
    fn close(&mut self) {}
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunningMode {
    Image,
    #[default]
    Video,
}

impl RunningMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunningMode::Image => "image",
            RunningMode::Video => "video",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Delegate {
    #[default]
    Cpu,
    Gpu,
}

impl Delegate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Delegate::Cpu => "cpu",
            Delegate::Gpu => "gpu",
        }
    }
}

/// Options passed to the classifier at creation.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ClassifierOptions {
    pub num_hands: u8,
    pub running_mode: RunningMode,
    pub delegate: Delegate,
    /// How long a helper may take to load its model.
    pub ready_timeout: Duration,
    /// How long a helper may take to answer one frame.
    pub reply_timeout: Duration,
}

impl Default for ClassifierOptions {
    fn default() -> Self {
        Self {
            num_hands: 2,
            running_mode: RunningMode::Video,
            delegate: Delegate::Cpu,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            reply_timeout: DEFAULT_REPLY_TIMEOUT,
        }
    }
}

impl ClassifierOptions {
    pub fn validate(&self) -> Result<()> {
        if !(1..=4).contains(&self.num_hands) {
            return Err(anyhow!("num_hands must be within 1..=4"));
        }
        if self.ready_timeout.is_zero() || self.reply_timeout.is_zero() {
            return Err(anyhow!("classifier timeouts must be greater than zero"));
        }
        Ok(())
    }
}

/// Which classifier implementation to create.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum ClassifierBackend {
    /// Built-in scripted gesture cycle (dry runs).
    #[default]
    Stub,
    /// External helper process: program followed by its arguments.
    Process { command: Vec<String> },
}

/// Create a classifier for `model_asset`.
///
/// Failure means the classifier capability is unavailable; callers report it
/// once and do not start the loop. Slow backends give up once `stop` is set.
pub fn create_classifier(
    model_asset: &Path,
    options: &ClassifierOptions,
    backend: &ClassifierBackend,
    stop: &StopHandle,
) -> Result<Box<dyn GestureClassifier>> {
    options.validate()?;
    match backend {
        ClassifierBackend::Stub => {
            log::warn!("using scripted demo classifier: shots are invented, not recognized");
            Ok(Box::new(ScriptedClassifier::demo_cycle()))
        }
        ClassifierBackend::Process { command } => {
            if !model_asset.exists() {
                return Err(anyhow!(
                    "classifier model asset not found at {}",
                    model_asset.display()
                ));
            }
            Ok(Box::new(ProcessClassifier::spawn(
                command,
                model_asset,
                options,
                stop,
            )?))
        }
    }
}
