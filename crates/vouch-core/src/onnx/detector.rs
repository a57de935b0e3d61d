use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;

use super::{model_err, to_chw};
use crate::vision::{FaceBox, VisionError};

const INPUT_SIZE: u32 = 640;
const STRIDES: [u32; 3] = [8, 16, 32];
const ANCHORS_PER_CELL: usize = 2;
const SCORE_THRESHOLD: f32 = 0.5;
const NMS_THRESHOLD: f32 = 0.4;

/// SCRFD face detector.
pub struct FaceDetector {
    session: Session,
    path: PathBuf,
}

impl FaceDetector {
    pub fn load(path: &Path) -> Result<Self, VisionError> {
        let session = Session::builder()
            .map_err(model_err)?
            .with_intra_threads(2)
            .map_err(model_err)?
            .commit_from_file(path)
            .map_err(model_err)?;
        Ok(Self {
            session,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Detect faces, highest confidence first.
    pub fn detect(&mut self, image: &RgbImage) -> Result<Vec<FaceBox>, VisionError> {
        let (w, h) = image.dimensions();
        if w == 0 || h == 0 {
            return Err(VisionError::Input("empty frame".into()));
        }

        // Letterbox into the top-left of a square input
        let scale = (INPUT_SIZE as f32 / w as f32).min(INPUT_SIZE as f32 / h as f32);
        let nw = ((w as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let nh = ((h as f32 * scale).round() as u32).clamp(1, INPUT_SIZE);
        let resized = image::imageops::resize(image, nw, nh, FilterType::Triangle);
        let mut canvas = RgbImage::new(INPUT_SIZE, INPUT_SIZE);
        image::imageops::overlay(&mut canvas, &resized, 0, 0);

        let side = INPUT_SIZE as usize;
        let blob = to_chw(&canvas, 127.5, 128.0);
        let input = Tensor::from_array(([1usize, 3, side, side], blob)).map_err(model_err)?;
        let outputs = self.session.run(ort::inputs![input]).map_err(model_err)?;
        if outputs.len() < STRIDES.len() * 3 {
            return Err(VisionError::Model(format!(
                "SCRFD produced {} outputs (expected 9)",
                outputs.len()
            )));
        }

        let mut faces = Vec::new();
        for (level, &stride) in STRIDES.iter().enumerate() {
            let (_, scores) = outputs[level].try_extract_tensor::<f32>().map_err(model_err)?;
            let (_, boxes) = outputs[level + 3]
                .try_extract_tensor::<f32>()
                .map_err(model_err)?;
            let (_, kps) = outputs[level + 6]
                .try_extract_tensor::<f32>()
                .map_err(model_err)?;

            let cells_x = (INPUT_SIZE / stride) as usize;
            let s = stride as f32;
            for (i, &score) in scores.iter().enumerate() {
                if score < SCORE_THRESHOLD {
                    continue;
                }
                let (Some(b), Some(k)) = (boxes.get(i * 4..i * 4 + 4), kps.get(i * 10..i * 10 + 10))
                else {
                    continue;
                };
                let cell = i / ANCHORS_PER_CELL;
                let cx = (cell % cells_x) as f32 * s;
                let cy = (cell / cells_x) as f32 * s;

                let mut keypoints = [(0.0f32, 0.0f32); 5];
                for (p, kp) in keypoints.iter_mut().enumerate() {
                    *kp = (
                        (cx + k[p * 2] * s) / scale,
                        (cy + k[p * 2 + 1] * s) / scale,
                    );
                }

                faces.push(FaceBox {
                    x1: (cx - b[0] * s) / scale,
                    y1: (cy - b[1] * s) / scale,
                    x2: (cx + b[2] * s) / scale,
                    y2: (cy + b[3] * s) / scale,
                    confidence: score,
                    keypoints: Some(keypoints),
                });
            }
        }

        Ok(non_max_suppression(faces, NMS_THRESHOLD))
    }
}

fn iou(a: &FaceBox, b: &FaceBox) -> f32 {
    let ix1 = a.x1.max(b.x1);
    let iy1 = a.y1.max(b.y1);
    let ix2 = a.x2.min(b.x2);
    let iy2 = a.y2.min(b.y2);
    let inter = (ix2 - ix1).max(0.0) * (iy2 - iy1).max(0.0);
    let union = a.area() + b.area() - inter;
    if union <= 0.0 {
        0.0
    } else {
        inter / union
    }
}

fn non_max_suppression(mut faces: Vec<FaceBox>, threshold: f32) -> Vec<FaceBox> {
    faces.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    let mut kept: Vec<FaceBox> = Vec::with_capacity(faces.len());
    for face in faces {
        if kept.iter().all(|k| iou(k, &face) <= threshold) {
            kept.push(face);
        }
    }
    kept
}
