use std::path::{Path, PathBuf};

use image::RgbImage;
use ort::session::Session;
use ort::value::Tensor;

use super::align::{similarity_transform, warp_crop};
use super::{model_err, to_chw};
use crate::vision::{Embedding, VisionError};

const INPUT_SIZE: u32 = 112;

/// ArcFace reference positions of the five keypoints in a 112x112 crop.
const ARCFACE_TEMPLATE: [(f32, f32); 5] = [
    (38.2946, 51.6963),
    (73.5318, 51.5014),
    (56.0252, 71.7366),
    (41.5493, 92.3655),
    (70.7299, 92.2041),
];

/// ArcFace embedding extractor.
pub struct FaceRecognizer {
    session: Session,
    path: PathBuf,
}

impl FaceRecognizer {
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

    /// Align the face on its keypoints and return an L2-normalised embedding.
    pub fn extract(
        &mut self,
        image: &RgbImage,
        keypoints: &[(f32, f32); 5],
    ) -> Result<Embedding, VisionError> {
        let matrix = similarity_transform(keypoints, &ARCFACE_TEMPLATE);
        let aligned = warp_crop(image, matrix, INPUT_SIZE)?;

        let side = INPUT_SIZE as usize;
        let blob = to_chw(&aligned, 127.5, 127.5);
        let input = Tensor::from_array(([1usize, 3, side, side], blob)).map_err(model_err)?;
        let outputs = self.session.run(ort::inputs![input]).map_err(model_err)?;
        let (_, values) = outputs[0].try_extract_tensor::<f32>().map_err(model_err)?;
        if values.iter().any(|v| !v.is_finite()) {
            return Err(VisionError::Model("non-finite embedding value".into()));
        }

        let mut embedding = Embedding::new(values.to_vec());
        embedding.normalize();
        Ok(embedding)
    }
}
