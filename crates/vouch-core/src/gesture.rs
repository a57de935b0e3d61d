//! Gesture catalog and the classifier-backed gesture judge.

use image::RgbImage;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::frame::Frame;
use crate::overlay::OverlayRenderer;

/// Minimum classifier score (exclusive) for a gesture to count as performed.
pub const DEFAULT_CONFIDENCE_THRESHOLD: f32 = 0.30;

/// A hand gesture the user can be challenged to perform.
///
/// Identity is by `name`, which doubles as the classifier label.
#[derive(Debug, Serialize)]
pub struct Gesture {
    pub name: &'static str,
    pub description: &'static str,
    /// Natural-language prompt shown to the user.
    pub prompt: &'static str,
    /// Key points (400x400 canvas) used to draw the reference image.
    #[serde(skip)]
    pub keypoints: &'static [(i32, i32)],
}

impl PartialEq for Gesture {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for Gesture {}

pub static CATALOG: [Gesture; 4] = [
    Gesture {
        name: "peace",
        description: "Index and middle fingers raised in a V",
        prompt: "Show a peace sign: raise your index and middle fingers, keep the others folded",
        keypoints: &[
            (100, 100),
            (150, 100),
            (200, 100),
            (200, 50),
            (250, 100),
            (250, 50),
            (300, 100),
            (300, 150),
            (350, 100),
            (350, 150),
        ],
    },
    Gesture {
        name: "thumbs_up",
        description: "Fist with the thumb pointing up",
        prompt: "Give a thumbs up: close your fist and point your thumb at the ceiling",
        keypoints: &[
            (100, 100),
            (150, 50),
            (200, 100),
            (200, 150),
            (250, 100),
            (250, 150),
            (300, 100),
            (300, 150),
            (350, 100),
            (350, 150),
        ],
    },
    Gesture {
        name: "ok",
        description: "Thumb and index finger touching in a circle",
        prompt: "Make the OK sign: touch your thumb to your index finger, other fingers relaxed",
        keypoints: &[
            (100, 100),
            (150, 150),
            (200, 100),
            (200, 150),
            (250, 100),
            (250, 150),
            (300, 100),
            (300, 150),
            (350, 100),
            (350, 150),
        ],
    },
    Gesture {
        name: "rock",
        description: "Index and little fingers raised, middle fingers folded",
        prompt: "Throw the horns: raise your index and little fingers, fold the middle two",
        keypoints: &[
            (100, 100),
            (150, 100),
            (200, 100),
            (200, 50),
            (250, 100),
            (250, 150),
            (300, 100),
            (300, 150),
            (350, 100),
            (350, 50),
        ],
    },
];

pub fn catalog() -> &'static [Gesture] {
    &CATALOG
}

/// Look up a gesture by name (case-insensitive).
pub fn find(name: &str) -> Option<&'static Gesture> {
    CATALOG.iter().find(|g| g.name.eq_ignore_ascii_case(name))
}

/// Every catalog name, in catalog order, as classifier candidate labels.
pub fn candidate_labels() -> Vec<&'static str> {
    CATALOG.iter().map(|g| g.name).collect()
}

/// One ranked entry of a zero-shot classification response.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LabelScore {
    pub label: String,
    pub score: f32,
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ClassifierError {
    #[error("classifier model is loading (estimated {estimated_secs:?}s)")]
    Loading { estimated_secs: Option<f32> },
    #[error("classifier rate limit exceeded")]
    RateLimited,
    #[error("classifier returned HTTP {0}")]
    Status(u16),
    #[error("classifier request failed: {0}")]
    Transport(String),
    #[error("malformed classifier response: {0}")]
    Malformed(String),
    #[error("failed to encode frame for classifier: {0}")]
    Encode(String),
}

impl ClassifierError {
    /// Transient conditions the caller may retry within the same challenge.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClassifierError::Loading { .. } | ClassifierError::RateLimited)
    }
}

/// External zero-shot image classifier.
pub trait GestureClassifier: Send {
    fn classify(&mut self, frame: &Frame, labels: &[&str]) -> Result<Vec<LabelScore>, ClassifierError>;
}

/// How a judgement concluded.
#[derive(Debug, Clone, PartialEq)]
pub enum JudgeOutcome {
    Match,
    Mismatch,
    /// The classifier could not produce an answer.
    Unavailable(ClassifierError),
}

#[derive(Debug, Clone)]
pub struct GestureJudgement {
    pub outcome: JudgeOutcome,
    /// Highest-scoring label, when the classifier answered.
    pub detected: Option<LabelScore>,
    /// Input frame with target/detected/confidence/match diagnostics drawn on it.
    pub annotated: RgbImage,
}

impl GestureJudgement {
    pub fn is_match(&self) -> bool {
        self.outcome == JudgeOutcome::Match
    }
}

/// Applies the match policy to classifier output.
#[derive(Debug, Clone)]
pub struct GestureJudge {
    confidence_threshold: f32,
}

impl Default for GestureJudge {
    fn default() -> Self {
        Self::new(DEFAULT_CONFIDENCE_THRESHOLD)
    }
}

impl GestureJudge {
    pub fn new(confidence_threshold: f32) -> Self {
        Self {
            confidence_threshold,
        }
    }

    /// Highest-scoring entry; ties keep the earlier entry.
    pub fn best(predictions: &[LabelScore]) -> Option<&LabelScore> {
        predictions.iter().fold(None, |best: Option<&LabelScore>, p| match best {
            Some(b) if b.score >= p.score => Some(b),
            _ => Some(p),
        })
    }

    /// Label equality (case-insensitive) and a score strictly above the threshold.
    pub fn accepts(&self, target: &Gesture, best: &LabelScore) -> bool {
        best.label.eq_ignore_ascii_case(target.name) && best.score > self.confidence_threshold
    }

    /// Classify `frame` against the whole catalog and judge it against `target`.
    ///
    /// Classifier failures never count as a match.
    pub fn judge(
        &self,
        frame: &Frame,
        target: &Gesture,
        classifier: &mut dyn GestureClassifier,
        overlay: &OverlayRenderer,
    ) -> GestureJudgement {
        let labels = candidate_labels();
        let predictions = match classifier.classify(frame, &labels) {
            Ok(p) => p,
            Err(e) => {
                if e.is_retryable() {
                    tracing::warn!(error = %e, "gesture classifier unavailable, retry later");
                } else {
                    tracing::error!(error = %e, "gesture classifier failed");
                }
                return GestureJudgement {
                    outcome: JudgeOutcome::Unavailable(e),
                    detected: None,
                    annotated: frame.image.clone(),
                };
            }
        };

        let Some(best) = Self::best(&predictions).cloned() else {
            tracing::error!("gesture classifier returned no labels");
            return GestureJudgement {
                outcome: JudgeOutcome::Unavailable(ClassifierError::Malformed(
                    "empty label list".into(),
                )),
                detected: None,
                annotated: frame.image.clone(),
            };
        };

        let is_match = self.accepts(target, &best);
        tracing::info!(
            target = target.name,
            detected = %best.label,
            confidence = best.score,
            is_match,
            "gesture judged"
        );

        let annotated = overlay.draw_diagnostics(
            &frame.image,
            &[
                format!("Target: {}", target.name),
                format!("Detected: {}", best.label),
                format!("Confidence: {:.2}", best.score),
                format!("Match: {}", if is_match { "Yes" } else { "No" }),
            ],
        );

        GestureJudgement {
            outcome: if is_match {
                JudgeOutcome::Match
            } else {
                JudgeOutcome::Mismatch
            },
            detected: Some(best),
            annotated,
        }
    }
}
