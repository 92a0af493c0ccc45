use serde::Deserialize;

use crate::gesture::{GestureLabel, HandObservation, Landmark, LabelVocabulary, LANDMARK_COUNT};

/// Raw classifier output for one frame.
///
/// One outer entry per detected hand, ordered by detection rank; the first
/// entry is the primary hand. Field names follow the recognizer's JSON shape.
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Recognition {
    #[serde(default)]
    pub gestures: Vec<Vec<Category>>,
    #[serde(default, alias = "handednesses")]
    pub handedness: Vec<Vec<Category>>,
    #[serde(default)]
    pub landmarks: Vec<Vec<Landmark>>,
}

/// A scored category (gesture or handedness).
#[derive(Clone, Debug, Default, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Category {
    #[serde(default)]
    pub category_name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub score: f32,
}

impl Category {
    pub fn new(name: &str, score: f32) -> Self {
        Self {
            category_name: name.to_string(),
            display_name: String::new(),
            score,
        }
    }

    /// Display name when present, category name otherwise.
    pub fn name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.category_name
        } else {
            &self.display_name
        }
    }
}

impl Recognition {
    /// Recognition with a single hand.
    pub fn single(gesture: &str, score: f32, landmarks: Vec<Landmark>) -> Self {
        let mut recognition = Self::default();
        recognition.push_hand(gesture, score, landmarks);
        recognition
    }

    /// Append a hand below the existing ones in rank.
    pub fn push_hand(&mut self, gesture: &str, score: f32, landmarks: Vec<Landmark>) {
        self.gestures.push(vec![Category::new(gesture, score)]);
        self.handedness.push(Vec::new());
        self.landmarks.push(landmarks);
    }

    pub fn hand_count(&self) -> usize {
        self.landmarks.len()
    }

    /// Convert into per-hand observations, preserving rank order.
    ///
    /// Hands without exactly `LANDMARK_COUNT` points are dropped. A hand with no
    /// gesture category gets an `Unknown` label and zero confidence.
    pub fn into_observations(self, vocabulary: &LabelVocabulary) -> Vec<HandObservation> {
        let Recognition {
            gestures,
            handedness,
            landmarks,
        } = self;

        let mut observations = Vec::with_capacity(landmarks.len());
        for (index, points) in landmarks.into_iter().enumerate() {
            if points.len() != LANDMARK_COUNT {
                log::debug!(
                    "dropping hand {}: expected {} landmarks, got {}",
                    index,
                    LANDMARK_COUNT,
                    points.len()
                );
                continue;
            }

            let top_gesture = gestures.get(index).and_then(|c| top_category(c));
            let (label, raw_label, confidence) = match top_gesture {
                Some(category) => (
                    vocabulary.classify(&category.category_name),
                    category.category_name.clone(),
                    category.score.clamp(0.0, 1.0),
                ),
                None => (GestureLabel::Unknown, String::new(), 0.0),
            };
            let hand = handedness
                .get(index)
                .and_then(|c| top_category(c))
                .map(|c| c.name().to_string());

            observations.push(HandObservation {
                label,
                raw_label,
                confidence,
                handedness: hand,
                landmarks: points,
            });
        }
        observations
    }
}

fn top_category(categories: &[Category]) -> Option<&Category> {
    categories.iter().fold(None, |best, c| match best {
        Some(b) if b.score >= c.score => Some(b),
        _ => Some(c),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn points(n: usize) -> String {
        let p: Vec<String> = (0..n)
            .map(|i| format!(r#"{{"x":0.{i:02},"y":0.5,"z":-0.01}}"#))
            .collect();
        format!("[{}]", p.join(","))
    }

    #[test]
    fn parses_recognizer_json() {
        let json = format!(
            r#"{{
                "gestures": [[{{"categoryName":"Shooting","score":0.93}},{{"categoryName":"None","score":0.05}}]],
                "handedness": [[{{"displayName":"Right","categoryName":"Right","score":0.98}}]],
                "landmarks": [{}]
            }}"#,
            points(21)
        );
        let recognition: Recognition = serde_json::from_str(&json).unwrap();
        assert_eq!(recognition.hand_count(), 1);

        let obs = recognition.into_observations(&LabelVocabulary::default());
        assert_eq!(obs.len(), 1);
        assert_eq!(obs[0].label, GestureLabel::Shooting);
        assert_eq!(obs[0].raw_label, "Shooting");
        assert!((obs[0].confidence - 0.93).abs() < 1e-6);
        assert_eq!(obs[0].handedness.as_deref(), Some("Right"));
        assert_eq!(obs[0].landmarks.len(), 21);
    }

    #[test]
    fn empty_object_means_no_hands() {
        let recognition: Recognition = serde_json::from_str("{}").unwrap();
        assert!(recognition
            .into_observations(&LabelVocabulary::default())
            .is_empty());
    }

    #[test]
    fn accepts_plural_handedness_field() {
        let json = r#"{"handednesses": [[{"displayName":"Left","score":0.7}]]}"#;
        let recognition: Recognition = serde_json::from_str(json).unwrap();
        assert_eq!(recognition.handedness[0][0].name(), "Left");
    }

    #[test]
    fn incomplete_hands_are_dropped_and_order_kept() {
        let mut recognition = Recognition::default();
        recognition.push_hand("resting", 0.8, vec![Landmark::default(); 21]);
        recognition.push_hand("shooting", 0.9, vec![Landmark::default(); 7]);
        recognition.push_hand("shooting", 0.7, vec![Landmark::default(); 21]);

        let obs = recognition.into_observations(&LabelVocabulary::default());
        assert_eq!(obs.len(), 2);
        assert_eq!(obs[0].label, GestureLabel::Resting);
        assert_eq!(obs[1].label, GestureLabel::Shooting);
    }

    #[test]
    fn hand_without_gesture_is_unknown() {
        let recognition = Recognition {
            landmarks: vec![vec![Landmark::default(); 21]],
            ..Recognition::default()
        };
        let obs = recognition.into_observations(&LabelVocabulary::default());
        assert_eq!(obs[0].label, GestureLabel::Unknown);
        assert_eq!(obs[0].confidence, 0.0);
    }
}
