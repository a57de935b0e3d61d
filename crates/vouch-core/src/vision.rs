//! Collaborator boundary for face analysis.
//!
//! Face detection, landmark localisation and embedding extraction are
//! treated as black boxes behind [`FaceAnalyzer`]. The ONNX backends in
//! [`crate::onnx`] implement it for production; tests substitute stubs.

use thiserror::Error;

use crate::frame::Frame;

/// Number of points in the standard 68-point facial landmark scheme.
pub const LANDMARK_COUNT: usize = 68;

/// 68 facial landmark points in frame pixel coordinates.
pub type Landmarks68 = [(f32, f32); LANDMARK_COUNT];

#[derive(Error, Debug)]
pub enum VisionError {
    #[error("model error: {0}")]
    Model(String),
    #[error("invalid input: {0}")]
    Input(String),
    #[error("landmark model returned {0} points (expected 68)")]
    LandmarkCount(usize),
}

/// Axis-aligned face bounding box in frame pixel coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceBox {
    pub x1: f32,
    pub y1: f32,
    pub x2: f32,
    pub y2: f32,
    pub confidence: f32,
    /// Five-point keypoints (eyes, nose, mouth corners) when the detector provides them.
    pub keypoints: Option<[(f32, f32); 5]>,
}

impl FaceBox {
    pub fn width(&self) -> f32 {
        (self.x2 - self.x1).max(0.0)
    }

    pub fn height(&self) -> f32 {
        (self.y2 - self.y1).max(0.0)
    }

    pub fn area(&self) -> f32 {
        self.width() * self.height()
    }

    pub fn center(&self) -> (f32, f32) {
        ((self.x1 + self.x2) / 2.0, (self.y1 + self.y2) / 2.0)
    }
}

/// Fixed-length identity vector for distance-based comparison.
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    pub values: Vec<f32>,
}

impl Embedding {
    pub fn new(values: Vec<f32>) -> Self {
        Self { values }
    }

    /// Euclidean distance. Mismatched dimensions are infinitely far apart.
    pub fn euclidean_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        self.values
            .iter()
            .zip(&other.values)
            .map(|(a, b)| (a - b) * (a - b))
            .sum::<f32>()
            .sqrt()
    }

    /// Cosine distance (`1 - cosine similarity`), in `[0, 2]`.
    pub fn cosine_distance(&self, other: &Embedding) -> f32 {
        if self.values.len() != other.values.len() {
            return f32::INFINITY;
        }
        let mut dot = 0.0f32;
        let mut na = 0.0f32;
        let mut nb = 0.0f32;
        for (a, b) in self.values.iter().zip(&other.values) {
            dot += a * b;
            na += a * a;
            nb += b * b;
        }
        if na == 0.0 || nb == 0.0 {
            return f32::INFINITY;
        }
        1.0 - dot / (na.sqrt() * nb.sqrt())
    }

    /// Scale to unit length in place. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm = self.values.iter().map(|v| v * v).sum::<f32>().sqrt();
        if norm > 0.0 {
            for v in &mut self.values {
                *v /= norm;
            }
        }
    }
}

/// Black-box face analysis used by liveness, enrollment and verification.
pub trait FaceAnalyzer: Send {
    /// Detect faces, highest confidence first.
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, VisionError>;

    /// Locate the 68 landmark points for one detected face.
    fn landmarks(&mut self, frame: &Frame, face: &FaceBox) -> Result<Landmarks68, VisionError>;

    /// Extract one embedding per face found in the frame.
    fn embeddings(&mut self, frame: &Frame) -> Result<Vec<Embedding>, VisionError>;
}
