//! Eye-openness liveness gate via the eye aspect ratio (EAR).
//!
//! For each eye the six landmark points p1..p6 of the 68-point scheme form a
//! hexagon; the ratio of its vertical openings to its horizontal width
//!
//! ```text
//! EAR = (||p2 - p6|| + ||p3 - p5||) / (2 * ||p1 - p4||)
//! ```
//!
//! stays roughly constant while the eye is open and collapses towards zero
//! as it closes. A photograph with closed or occluded eyes, or a frame
//! without a face, fails the gate.
//!
//! # Threat Coverage
//!
//! - **Blocks:** Captures with eyes shut, frames with no visible face.
//! - **Does not block:** Printed photographs with open eyes, video replay.
//!   The gesture challenge is the stronger liveness signal.

use std::ops::Range;

use crate::frame::Frame;
use crate::vision::{FaceAnalyzer, Landmarks68, VisionError};

/// Average EAR at or below which the eyes are considered closed.
pub const DEFAULT_EAR_THRESHOLD: f32 = 0.30;

/// Left eye points in the 68-point scheme.
pub const LEFT_EYE: Range<usize> = 36..42;
/// Right eye points in the 68-point scheme.
pub const RIGHT_EYE: Range<usize> = 42..48;

pub const REASON_NO_FACE: &str = "No face detected";
pub const REASON_EYES_CLOSED: &str = "Eyes are closed";
pub const REASON_LIVE: &str = "Live face detected";

/// Result of an eye-openness liveness check.
#[derive(Debug, Clone)]
pub struct LivenessResult {
    /// Whether every analysed face had open eyes.
    pub is_live: bool,
    /// Human-readable explanation, surfaced to the client on failure.
    pub reason: &'static str,
    /// Averaged EAR of the last face analysed (the failing one on failure).
    pub ear: Option<f32>,
    /// Number of faces whose landmarks were examined.
    pub faces_analysed: usize,
}

/// EAR of a single eye given its six points in p1..p6 order.
///
/// A degenerate eye (zero horizontal width) reports 0.0, i.e. closed.
pub fn eye_aspect_ratio(eye: &[(f32, f32)]) -> f32 {
    debug_assert_eq!(eye.len(), 6);
    let vertical_a = distance(eye[1], eye[5]);
    let vertical_b = distance(eye[2], eye[4]);
    let horizontal = distance(eye[0], eye[3]);
    if horizontal <= f32::EPSILON {
        return 0.0;
    }
    (vertical_a + vertical_b) / (2.0 * horizontal)
}

/// Mean of the left and right eye EARs for one face.
pub fn average_ear(landmarks: &Landmarks68) -> f32 {
    let left = eye_aspect_ratio(&landmarks[LEFT_EYE]);
    let right = eye_aspect_ratio(&landmarks[RIGHT_EYE]);
    (left + right) / 2.0
}

fn distance(a: (f32, f32), b: (f32, f32)) -> f32 {
    let dx = a.0 - b.0;
    let dy = a.1 - b.1;
    (dx * dx + dy * dy).sqrt()
}

/// Eye-openness liveness checker with a tunable threshold.
#[derive(Debug, Clone)]
pub struct LivenessChecker {
    threshold: f32,
}

impl Default for LivenessChecker {
    fn default() -> Self {
        Self::new(DEFAULT_EAR_THRESHOLD)
    }
}

impl LivenessChecker {
    pub fn new(threshold: f32) -> Self {
        Self { threshold }
    }

    pub fn threshold(&self) -> f32 {
        self.threshold
    }

    /// Whether an averaged EAR counts as closed eyes. The threshold is inclusive.
    pub fn eyes_closed(&self, ear: f32) -> bool {
        ear <= self.threshold
    }

    /// Detect faces and verify that each one has open eyes.
    ///
    /// The first face with closed eyes short-circuits the check.
    pub fn check(
        &self,
        frame: &Frame,
        analyzer: &mut dyn FaceAnalyzer,
    ) -> Result<LivenessResult, VisionError> {
        let faces = analyzer.detect_faces(frame)?;
        if faces.is_empty() {
            return Ok(LivenessResult {
                is_live: false,
                reason: REASON_NO_FACE,
                ear: None,
                faces_analysed: 0,
            });
        }

        let mut last_ear = None;
        for (i, face) in faces.iter().enumerate() {
            let landmarks = analyzer.landmarks(frame, face)?;
            let ear = average_ear(&landmarks);
            last_ear = Some(ear);
            if self.eyes_closed(ear) {
                return Ok(LivenessResult {
                    is_live: false,
                    reason: REASON_EYES_CLOSED,
                    ear: Some(ear),
                    faces_analysed: i + 1,
                });
            }
        }

        Ok(LivenessResult {
            is_live: true,
            reason: REASON_LIVE,
            ear: last_ear,
            faces_analysed: faces.len(),
        })
    }
}
