//! ONNX Runtime face backends (InsightFace `buffalo_l` model family).
//!
//! - [`FaceDetector`]: SCRFD `det_10g.onnx`, boxes plus five keypoints.
//! - [`FaceRecognizer`]: ArcFace `w600k_r50.onnx`, 512-d embeddings.
//! - [`Landmarker`]: `1k3d68.onnx`, 68-point landmarks.

mod align;
pub mod detector;
pub mod landmarker;
pub mod recognizer;

use std::path::Path;

use image::RgbImage;

use crate::frame::Frame;
use crate::vision::{Embedding, FaceAnalyzer, FaceBox, Landmarks68, VisionError};

pub use detector::FaceDetector;
pub use landmarker::Landmarker;
pub use recognizer::FaceRecognizer;

pub(crate) fn model_err(e: impl std::fmt::Display) -> VisionError {
    VisionError::Model(e.to_string())
}

/// Planar RGB blob `(pixel - mean) / std`, NCHW with N=1.
pub(crate) fn to_chw(image: &RgbImage, mean: f32, std: f32) -> Vec<f32> {
    let (w, h) = image.dimensions();
    let plane = (w * h) as usize;
    let mut blob = vec![0.0f32; 3 * plane];
    for (x, y, px) in image.enumerate_pixels() {
        let i = (y * w + x) as usize;
        for c in 0..3 {
            blob[c * plane + i] = (px[c] as f32 - mean) / std;
        }
    }
    blob
}

/// Detector, recognizer and landmarker bundled behind [`FaceAnalyzer`].
pub struct OnnxFaceAnalyzer {
    detector: FaceDetector,
    recognizer: FaceRecognizer,
    landmarker: Landmarker,
}

impl OnnxFaceAnalyzer {
    pub fn load(detector: &Path, recognizer: &Path, landmarker: &Path) -> Result<Self, VisionError> {
        let detector = FaceDetector::load(detector)?;
        tracing::info!(path = %detector.path().display(), "SCRFD detector loaded");
        let recognizer = FaceRecognizer::load(recognizer)?;
        tracing::info!(path = %recognizer.path().display(), "ArcFace recognizer loaded");
        let landmarker = Landmarker::load(landmarker)?;
        tracing::info!(path = %landmarker.path().display(), "68-point landmarker loaded");
        Ok(Self {
            detector,
            recognizer,
            landmarker,
        })
    }
}

impl FaceAnalyzer for OnnxFaceAnalyzer {
    fn detect_faces(&mut self, frame: &Frame) -> Result<Vec<FaceBox>, VisionError> {
        self.detector.detect(&frame.image)
    }

    fn landmarks(&mut self, frame: &Frame, face: &FaceBox) -> Result<Landmarks68, VisionError> {
        self.landmarker.locate(&frame.image, face)
    }

    fn embeddings(&mut self, frame: &Frame) -> Result<Vec<Embedding>, VisionError> {
        let faces = self.detector.detect(&frame.image)?;
        let mut out = Vec::with_capacity(faces.len());
        for face in &faces {
            let Some(kps) = face.keypoints else {
                continue;
            };
            out.push(self.recognizer.extract(&frame.image, &kps)?);
        }
        Ok(out)
    }
}
