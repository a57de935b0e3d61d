use std::path::{Path, PathBuf};

use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;

use super::align::warp_crop;
use super::{model_err, to_chw};
use crate::vision::{FaceBox, Landmarks68, VisionError, LANDMARK_COUNT};

const INPUT_SIZE: u32 = 192;
/// Crop side relative to the larger face box side.
const CROP_MARGIN: f32 = 1.5;

/// 68-point landmark regressor on a face-centred crop.
pub struct Landmarker {
    session: Session,
    path: PathBuf,
}

impl Landmarker {
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

    pub fn locate(&mut self, image: &RgbImage, face: &FaceBox) -> Result<Landmarks68, VisionError> {
        let side = face.width().max(face.height()) * CROP_MARGIN;
        if side <= f32::EPSILON {
            return Err(VisionError::Input("empty face box".into()));
        }
        let (cx, cy) = face.center();
        let scale = INPUT_SIZE as f32 / side;
        let half = INPUT_SIZE as f32 / 2.0;
        let tx = half - cx * scale;
        let ty = half - cy * scale;
        let crop = warp_crop(image, [scale, 0.0, tx, 0.0, scale, ty, 0.0, 0.0, 1.0], INPUT_SIZE)?;

        let n = INPUT_SIZE as usize;
        let blob = to_chw(&crop, 0.0, 1.0);
        let input = Tensor::from_array(([1usize, 3, n, n], blob)).map_err(model_err)?;
        let outputs = self.session.run(ort::inputs![input]).map_err(model_err)?;
        let (_, raw) = outputs[0].try_extract_tensor::<f32>().map_err(model_err)?;

        // 3D models emit (x, y, z) triples, 2D models (x, y) pairs; the
        // 68-point set is the tail of the output.
        let dims = if raw.len() >= 3000 { 3 } else { 2 };
        let total = raw.len() / dims;
        if total < LANDMARK_COUNT {
            return Err(VisionError::LandmarkCount(total));
        }
        let tail = &raw[(total - LANDMARK_COUNT) * dims..];

        let mut points = [(0.0f32, 0.0f32); LANDMARK_COUNT];
        for (i, p) in points.iter_mut().enumerate() {
            let x = (tail[i * dims] + 1.0) * half;
            let y = (tail[i * dims + 1] + 1.0) * half;
            *p = ((x - tx) / scale, (y - ty) / scale);
        }
        Ok(points)
    }
}
