use std::path::{Path, PathBuf};

use image::imageops::FilterType;
use image::RgbImage;
use vouch_core::Frame;

use crate::{CameraError, FrameSource, FRAME_HEIGHT, FRAME_WIDTH};

const EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

/// Replays a directory of images in file-name order, looping forever.
pub struct StillImageSource {
    dir: PathBuf,
    images: Vec<RgbImage>,
    next: usize,
}

impl StillImageSource {
    /// Decode every image in `dir` up front. Unreadable files are skipped.
    pub fn open(dir: &Path) -> Result<Self, CameraError> {
        let entries = std::fs::read_dir(dir).map_err(|source| CameraError::ListDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| {
                p.extension()
                    .and_then(|e| e.to_str())
                    .is_some_and(|e| EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            })
            .collect();
        paths.sort();

        let mut images = Vec::with_capacity(paths.len());
        for path in &paths {
            match image::open(path) {
                Ok(img) => images.push(image::imageops::resize(
                    &img.to_rgb8(),
                    FRAME_WIDTH,
                    FRAME_HEIGHT,
                    FilterType::Triangle,
                )),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable frame image");
                }
            }
        }

        if images.is_empty() {
            return Err(CameraError::NoImages(dir.to_path_buf()));
        }

        tracing::info!(dir = %dir.display(), frames = images.len(), "still-image source opened");
        Ok(Self {
            dir: dir.to_path_buf(),
            images,
            next: 0,
        })
    }
}

impl FrameSource for StillImageSource {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let image = self.images[self.next].clone();
        self.next = (self.next + 1) % self.images.len();
        Ok(Frame::new(image))
    }

    fn describe(&self) -> String {
        format!("stills:{} ({} frames)", self.dir.display(), self.images.len())
    }
}
