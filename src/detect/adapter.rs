use crate::frame::FrameSample;
use crate::gesture::{HandObservation, LabelVocabulary};

use super::backend::GestureClassifier;

/// Wraps the external classifier for the scheduling loop.
///
/// The adapter never fails: a missing classifier, a classifier error, or a
/// regressing timestamp all mean "no hands" for that tick.
pub struct ClassifierAdapter {
    classifier: Option<Box<dyn GestureClassifier>>,
    vocabulary: LabelVocabulary,
    last_timestamp_ms: Option<u64>,
    failing: bool,
    calls: u64,
    failures: u64,
}

impl ClassifierAdapter {
    pub fn new(classifier: Option<Box<dyn GestureClassifier>>, vocabulary: LabelVocabulary) -> Self {
        Self {
            classifier,
            vocabulary,
            last_timestamp_ms: None,
            failing: false,
            calls: 0,
            failures: 0,
        }
    }

    pub fn is_ready(&self) -> bool {
        self.classifier.is_some()
    }

    /// Classifier invocations so far.
    pub fn calls(&self) -> u64 {
        self.calls
    }

    pub fn failures(&self) -> u64 {
        self.failures
    }

    /// Classify one sampled frame.
    pub fn classify(&mut self, sample: &FrameSample) -> Vec<HandObservation> {
        let Some(classifier) = self.classifier.as_mut() else {
            return Vec::new();
        };

        let timestamp_ms = sample.timestamp_ms();
        if let Some(last) = self.last_timestamp_ms {
            if timestamp_ms < last {
                log::debug!(
                    "skipping classification: timestamp {}ms precedes {}ms",
                    timestamp_ms,
                    last
                );
                return Vec::new();
            }
        }
        self.last_timestamp_ms = Some(timestamp_ms);
        self.calls += 1;

        let view = sample.frame.inference_view();
        match view.run_classifier(classifier.as_mut(), timestamp_ms) {
            Ok(recognition) => {
                if self.failing {
                    log::info!("classifier {} recovered", classifier.name());
                    self.failing = false;
                }
                recognition.into_observations(&self.vocabulary)
            }
            Err(e) => {
                self.failures += 1;
                if !self.failing {
                    log::warn!("classifier {} failed: {:#}", classifier.name(), e);
                    self.failing = true;
                }
                Vec::new()
            }
        }
    }

    /// Close and drop the classifier.
    pub fn close(&mut self) {
        if let Some(mut classifier) = self.classifier.take() {
            classifier.close();
        }
    }
}
