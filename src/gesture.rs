//! Gesture observations and the Armed/Fired edge detector.
//!
//! Classifiers report a gesture label on every frame for as long as the hand
//! holds the pose. The `EdgeDetector` latches that level signal into an edge:
//! one fire decision per armed -> fired transition, and a resting observation
//! is required before the next one.
//!
//! - `Landmark` / `HandObservation`: per-hand classifier output for one tick.
//! - `GestureLabel` / `LabelVocabulary`: closed label set, raw strings mapped in.
//! - `EdgeDetector`: the only state carried across ticks.

use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::sync::OnceLock;

/// Points per hand in the standard hand-landmark topology.
pub const LANDMARK_COUNT: usize = 21;

/// Landmark indices of the 21-point hand topology.
#[allow(dead_code)]
pub mod landmarks {
    pub const WRIST: usize = 0;
    pub const THUMB_CMC: usize = 1;
    pub const THUMB_MCP: usize = 2;
    pub const THUMB_IP: usize = 3;
    pub const THUMB_TIP: usize = 4;
    /// Base of the index finger; used as the palm anchor for aiming.
    pub const PALM_BASE: usize = 5;
    pub const INDEX_FINGER_PIP: usize = 6;
    pub const INDEX_FINGER_DIP: usize = 7;
    pub const INDEX_FINGER_TIP: usize = 8;
    pub const MIDDLE_FINGER_MCP: usize = 9;
    pub const MIDDLE_FINGER_PIP: usize = 10;
    pub const MIDDLE_FINGER_DIP: usize = 11;
    pub const MIDDLE_FINGER_TIP: usize = 12;
    pub const RING_FINGER_MCP: usize = 13;
    pub const RING_FINGER_PIP: usize = 14;
    pub const RING_FINGER_DIP: usize = 15;
    pub const RING_FINGER_TIP: usize = 16;
    pub const PINKY_MCP: usize = 17;
    pub const PINKY_PIP: usize = 18;
    pub const PINKY_DIP: usize = 19;
    pub const PINKY_TIP: usize = 20;
}

/// A normalized hand landmark.
#[derive(Clone, Copy, Debug, Default, PartialEq, Deserialize)]
pub struct Landmark {
    /// 0.0..=1.0, relative to frame width.
    pub x: f32,
    /// 0.0..=1.0, relative to frame height.
    pub y: f32,
    /// Depth relative to the wrist.
    #[serde(default)]
    pub z: f32,
}

impl Landmark {
    pub fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    pub fn position(&self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

// ----------------------------------------------------------------------------
// Labels
// ----------------------------------------------------------------------------

/// Closed gesture vocabulary seen by the edge detector.
///
/// Anything the classifier reports outside the configured shooting/resting
/// labels becomes `Unknown`, which never moves the latch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GestureLabel {
    Shooting,
    Resting,
    Unknown,
}

/// Maps raw classifier category names onto `GestureLabel`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LabelVocabulary {
    shooting: Vec<String>,
    resting: Vec<String>,
}

impl LabelVocabulary {
    /// Build a vocabulary. Labels are lowercased; each must match
    /// `^[a-z0-9_]{1,64}$` and a label cannot be both shooting and resting.
    pub fn new(shooting: Vec<String>, resting: Vec<String>) -> Result<Self> {
        let shooting = normalize_labels(shooting)?;
        let resting = normalize_labels(resting)?;
        if shooting.is_empty() {
            return Err(anyhow!("at least one shooting label is required"));
        }
        if resting.is_empty() {
            return Err(anyhow!("at least one resting label is required"));
        }
        if let Some(dup) = shooting.iter().find(|label| resting.contains(label)) {
            return Err(anyhow!(
                "label '{}' cannot be both a shooting and a resting label",
                dup
            ));
        }
        Ok(Self { shooting, resting })
    }

    pub fn classify(&self, raw: &str) -> GestureLabel {
        let raw = raw.trim();
        if self.shooting.iter().any(|l| l.eq_ignore_ascii_case(raw)) {
            GestureLabel::Shooting
        } else if self.resting.iter().any(|l| l.eq_ignore_ascii_case(raw)) {
            GestureLabel::Resting
        } else {
            GestureLabel::Unknown
        }
    }

    pub fn shooting_labels(&self) -> &[String] {
        &self.shooting
    }

    pub fn resting_labels(&self) -> &[String] {
        &self.resting
    }
}

impl Default for LabelVocabulary {
    fn default() -> Self {
        Self {
            shooting: vec!["shooting".to_string()],
            resting: vec!["resting".to_string()],
        }
    }
}

/// Validate a single vocabulary label.
pub fn validate_label(label: &str) -> Result<()> {
    static LABEL_RE: OnceLock<regex::Regex> = OnceLock::new();
    let re = LABEL_RE.get_or_init(|| {
        regex::Regex::new(r"^[a-z0-9_]{1,64}$").expect("static label pattern compiles")
    });
    if !re.is_match(label) {
        return Err(anyhow!(
            "gesture label '{}' must match ^[a-z0-9_]{{1,64}}$",
            label
        ));
    }
    Ok(())
}

fn normalize_labels(labels: Vec<String>) -> Result<Vec<String>> {
    let mut out: Vec<String> = Vec::with_capacity(labels.len());
    for label in labels {
        let label = label.trim().to_lowercase();
        validate_label(&label)?;
        if !out.contains(&label) {
            out.push(label);
        }
    }
    Ok(out)
}

// ----------------------------------------------------------------------------
// Observations
// ----------------------------------------------------------------------------

/// One detected hand for one tick. Never retained past the tick.
#[derive(Clone, Debug, PartialEq)]
pub struct HandObservation {
    pub label: GestureLabel,
    /// Category name exactly as the classifier reported it.
    pub raw_label: String,
    /// Score of the top gesture category, 0.0..=1.0.
    pub confidence: f32,
    /// "Left" / "Right" when the classifier reports it.
    pub handedness: Option<String>,
    pub landmarks: Vec<Landmark>,
}

impl HandObservation {
    pub fn landmark(&self, index: usize) -> Option<&Landmark> {
        self.landmarks.get(index)
    }
}

/// Which hand is authoritative when several are detected.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandSelection {
    /// First-ranked hand in the classifier output.
    #[default]
    Primary,
    /// Hand with the highest gesture score; ties go to the earlier hand.
    HighestConfidence,
}

impl HandSelection {
    pub fn select<'a>(&self, observations: &'a [HandObservation]) -> Option<&'a HandObservation> {
        match self {
            HandSelection::Primary => observations.first(),
            HandSelection::HighestConfidence => {
                observations.iter().fold(None, |best, hand| match best {
                    Some(b) if b.confidence >= hand.confidence => Some(b),
                    _ => Some(hand),
                })
            }
        }
    }
}

impl std::str::FromStr for HandSelection {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "primary" | "first" => Ok(HandSelection::Primary),
            "highest_confidence" | "confidence" => Ok(HandSelection::HighestConfidence),
            other => Err(anyhow!("unknown hand selection policy: {}", other)),
        }
    }
}

// ----------------------------------------------------------------------------
// Edge detector
// ----------------------------------------------------------------------------

/// Detector tuning.
#[derive(Clone, Debug, PartialEq)]
pub struct DetectorConfig {
    /// Landmark whose position is reported for shots and aim.
    pub landmark_index: usize,
    pub hand_selection: HandSelection,
    /// Observations scoring below this are treated as `Unknown`.
    pub min_confidence: f32,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            landmark_index: landmarks::PALM_BASE,
            hand_selection: HandSelection::Primary,
            min_confidence: 0.0,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.landmark_index >= LANDMARK_COUNT {
            return Err(anyhow!(
                "landmark index {} out of range (0..{})",
                self.landmark_index,
                LANDMARK_COUNT
            ));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(anyhow!("min_confidence must be within 0.0..=1.0"));
        }
        Ok(())
    }
}

/// Latch state. `Armed` means the next shooting observation fires.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum EdgeState {
    #[default]
    Armed,
    Fired,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Transition {
    /// Armed -> Fired.
    Fire,
    /// Fired -> Armed.
    Rearm,
    /// No state change.
    Hold,
}

/// Output of one detector step.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EdgeDecision {
    pub transition: Transition,
    /// Configured landmark of the selected hand; `None` without a hand.
    pub position: Option<[f32; 3]>,
    pub hand_present: bool,
    /// Effective label of the selected hand.
    pub label: Option<GestureLabel>,
}

impl EdgeDecision {
    fn no_hand() -> Self {
        Self {
            transition: Transition::Hold,
            position: None,
            hand_present: false,
            label: None,
        }
    }

    pub fn fired(&self) -> bool {
        self.transition == Transition::Fire
    }
}

/// Converts the per-frame gesture level into fire edges.
#[derive(Clone, Debug)]
pub struct EdgeDetector {
    config: DetectorConfig,
    state: EdgeState,
}

impl EdgeDetector {
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            config,
            state: EdgeState::Armed,
        }
    }

    pub fn state(&self) -> EdgeState {
        self.state
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.config
    }

    pub fn reset(&mut self) {
        self.state = EdgeState::Armed;
    }

    /// Advance the latch with this tick's observations.
    ///
    /// Without a hand the state is untouched and no position is reported.
    pub fn observe(&mut self, observations: &[HandObservation]) -> EdgeDecision {
        let Some(hand) = self.config.hand_selection.select(observations) else {
            return EdgeDecision::no_hand();
        };

        let label = if hand.confidence < self.config.min_confidence {
            GestureLabel::Unknown
        } else {
            hand.label
        };
        let position = hand
            .landmark(self.config.landmark_index)
            .map(Landmark::position);

        let (next, transition) = match (self.state, label) {
            (EdgeState::Armed, GestureLabel::Shooting) => (EdgeState::Fired, Transition::Fire),
            (EdgeState::Fired, GestureLabel::Resting) => (EdgeState::Armed, Transition::Rearm),
            (state, _) => (state, Transition::Hold),
        };

        if next != self.state {
            log::debug!(
                "edge {:?} -> {:?} on {:?} ({})",
                self.state,
                next,
                label,
                hand.raw_label
            );
        }
        self.state = next;

        EdgeDecision {
            transition,
            position,
            hand_present: true,
            label: Some(label),
        }
    }
}

impl Default for EdgeDetector {
    fn default() -> Self {
        Self::new(DetectorConfig::default())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn hand(label: GestureLabel, confidence: f32, anchor: Landmark) -> HandObservation {
        let mut points = vec![Landmark::new(0.1, 0.1, 0.0); LANDMARK_COUNT];
        points[landmarks::PALM_BASE] = anchor;
        HandObservation {
            label,
            raw_label: format!("{:?}", label).to_lowercase(),
            confidence,
            handedness: Some("Right".to_string()),
            landmarks: points,
        }
    }

    fn run(detector: &mut EdgeDetector, labels: &[Option<GestureLabel>]) -> Vec<Transition> {
        labels
            .iter()
            .map(|label| {
                let obs: Vec<_> = label
                    .iter()
                    .map(|l| hand(*l, 0.9, Landmark::new(0.5, 0.5, 0.0)))
                    .collect();
                detector.observe(&obs).transition
            })
            .collect()
    }

    #[test]
    fn fires_once_per_gesture_cycle() {
        use GestureLabel::*;
        let mut detector = EdgeDetector::default();
        let transitions = run(
            &mut detector,
            &[
                Some(Resting),
                Some(Shooting),
                Some(Shooting),
                Some(Resting),
                Some(Shooting),
            ],
        );
        let fires: Vec<usize> = transitions
            .iter()
            .enumerate()
            .filter(|(_, t)| **t == Transition::Fire)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(fires, vec![1, 4]);
        assert_eq!(transitions[3], Transition::Rearm);
    }

    #[test]
    fn no_hand_leaves_state_untouched() {
        let mut detector = EdgeDetector::default();
        detector.observe(&[hand(
            GestureLabel::Shooting,
            0.9,
            Landmark::new(0.2, 0.3, 0.0),
        )]);
        assert_eq!(detector.state(), EdgeState::Fired);

        for _ in 0..10 {
            let decision = detector.observe(&[]);
            assert_eq!(decision.transition, Transition::Hold);
            assert_eq!(decision.position, None);
            assert!(!decision.hand_present);
        }
        assert_eq!(detector.state(), EdgeState::Fired);
    }

    #[test]
    fn unknown_label_is_neutral() {
        let mut detector = EdgeDetector::default();
        detector.observe(&[hand(GestureLabel::Shooting, 0.9, Landmark::default())]);
        let decision = detector.observe(&[hand(GestureLabel::Unknown, 0.9, Landmark::default())]);
        assert_eq!(decision.transition, Transition::Hold);
        assert_eq!(detector.state(), EdgeState::Fired);
    }

    #[test]
    fn shot_position_is_exact_landmark() {
        let mut detector = EdgeDetector::default();
        let decision = detector.observe(&[hand(
            GestureLabel::Shooting,
            0.9,
            Landmark::new(0.5, 0.5, -0.1),
        )]);
        assert!(decision.fired());
        assert_eq!(decision.position, Some([0.5, 0.5, -0.1]));
    }

    #[test]
    fn primary_hand_is_authoritative() {
        let mut detector = EdgeDetector::default();
        let decision = detector.observe(&[
            hand(GestureLabel::Resting, 0.4, Landmark::new(0.1, 0.2, 0.0)),
            hand(GestureLabel::Shooting, 0.99, Landmark::new(0.8, 0.8, 0.0)),
        ]);
        assert_eq!(decision.transition, Transition::Hold);
        assert_eq!(decision.position, Some([0.1, 0.2, 0.0]));
        assert_eq!(detector.state(), EdgeState::Armed);
    }

    #[test]
    fn highest_confidence_policy_picks_best_hand() {
        let mut detector = EdgeDetector::new(DetectorConfig {
            hand_selection: HandSelection::HighestConfidence,
            ..DetectorConfig::default()
        });
        let decision = detector.observe(&[
            hand(GestureLabel::Resting, 0.4, Landmark::new(0.1, 0.2, 0.0)),
            hand(GestureLabel::Shooting, 0.99, Landmark::new(0.8, 0.8, 0.0)),
        ]);
        assert!(decision.fired());
        assert_eq!(decision.position, Some([0.8, 0.8, 0.0]));
    }

    #[test]
    fn low_confidence_observation_does_not_fire() {
        let mut detector = EdgeDetector::new(DetectorConfig {
            min_confidence: 0.6,
            ..DetectorConfig::default()
        });
        let decision = detector.observe(&[hand(GestureLabel::Shooting, 0.3, Landmark::default())]);
        assert_eq!(decision.transition, Transition::Hold);
        assert_eq!(decision.label, Some(GestureLabel::Unknown));
        assert_eq!(detector.state(), EdgeState::Armed);
    }

    #[test]
    fn vocabulary_maps_case_insensitively() {
        let vocab = LabelVocabulary::new(
            vec!["Shooting".to_string(), "pointing_up".to_string()],
            vec!["resting".to_string(), "open_palm".to_string()],
        )
        .unwrap();
        assert_eq!(vocab.classify("SHOOTING"), GestureLabel::Shooting);
        assert_eq!(vocab.classify("Pointing_Up"), GestureLabel::Shooting);
        assert_eq!(vocab.classify("Open_Palm"), GestureLabel::Resting);
        assert_eq!(vocab.classify("Thumb_Down"), GestureLabel::Unknown);
        assert_eq!(vocab.classify(""), GestureLabel::Unknown);
    }

    #[test]
    fn vocabulary_rejects_overlapping_and_malformed_labels() {
        assert!(LabelVocabulary::new(vec!["fist".into()], vec!["fist".into()]).is_err());
        assert!(LabelVocabulary::new(vec!["two words".into()], vec!["rest".into()]).is_err());
        assert!(LabelVocabulary::new(vec![], vec!["rest".into()]).is_err());
    }

    #[test]
    fn detector_config_rejects_out_of_range_landmark() {
        let config = DetectorConfig {
            landmark_index: LANDMARK_COUNT,
            ..DetectorConfig::default()
        };
        assert!(config.validate().is_err());
    }
}
