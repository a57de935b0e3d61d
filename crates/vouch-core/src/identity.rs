use std::path::{Path, PathBuf};
use std::str::FromStr;

use thiserror::Error;

use crate::frame::Frame;
use crate::vision::{Embedding, FaceAnalyzer};

/// Default maximum distance for a positive identity match.
pub const DEFAULT_TOLERANCE: f32 = 0.40;

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png"];

#[derive(Error, Debug)]
pub enum IdentityLoadError {
    #[error("cannot read known-identities directory {path}: {source}")]
    ReadDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Error, Debug)]
#[error("unknown distance metric '{0}' (expected 'cosine' or 'euclidean')")]
pub struct UnknownMetric(String);

/// Distance used to compare candidate and stored embeddings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DistanceMetric {
    Euclidean,
    Cosine,
}

impl DistanceMetric {
    pub fn distance(&self, a: &Embedding, b: &Embedding) -> f32 {
        match self {
            DistanceMetric::Euclidean => a.euclidean_distance(b),
            DistanceMetric::Cosine => a.cosine_distance(b),
        }
    }
}

impl FromStr for DistanceMetric {
    type Err = UnknownMetric;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "euclidean" | "l2" => Ok(DistanceMetric::Euclidean),
            "cosine" => Ok(DistanceMetric::Cosine),
            other => Err(UnknownMetric(other.to_string())),
        }
    }
}

/// A reference identity: name plus the embedding of its reference image.
#[derive(Debug, Clone)]
pub struct KnownIdentity {
    pub name: String,
    pub embedding: Embedding,
}

/// Decides whether any candidate face belongs to a known identity.
pub trait IdentityMatcher: Send {
    /// First stored identity within tolerance of any candidate.
    fn find_match(&self, candidates: &[Embedding]) -> Option<&KnownIdentity>;

    fn is_match(&self, candidates: &[Embedding]) -> bool {
        self.find_match(candidates).is_some()
    }

    /// Number of stored identities.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable set of known identities, loaded once at startup.
#[derive(Debug, Clone)]
pub struct KnownIdentityStore {
    identities: Vec<KnownIdentity>,
    metric: DistanceMetric,
    tolerance: f32,
}

impl KnownIdentityStore {
    pub fn new(identities: Vec<KnownIdentity>, metric: DistanceMetric, tolerance: f32) -> Self {
        Self {
            identities,
            metric,
            tolerance,
        }
    }

    /// Build the store from a directory of reference images.
    ///
    /// Each `.jpg`/`.jpeg`/`.png` file contributes the first face embedding
    /// found in it, named after the file stem. Unreadable images and images
    /// without a face are skipped with a warning.
    pub fn load_dir(
        dir: &Path,
        analyzer: &mut dyn FaceAnalyzer,
        metric: DistanceMetric,
        tolerance: f32,
    ) -> Result<Self, IdentityLoadError> {
        let entries = std::fs::read_dir(dir).map_err(|source| IdentityLoadError::ReadDir {
            path: dir.to_path_buf(),
            source,
        })?;

        let mut paths: Vec<PathBuf> = entries
            .filter_map(|e| e.ok().map(|e| e.path()))
            .filter(|p| is_reference_image(p))
            .collect();
        paths.sort();

        let mut identities = Vec::with_capacity(paths.len());
        for path in paths {
            let Some(name) = path.file_stem().map(|s| s.to_string_lossy().into_owned()) else {
                continue;
            };

            let image = match image::open(&path) {
                Ok(img) => img.to_rgb8(),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unreadable reference image");
                    continue;
                }
            };

            let embeddings = match analyzer.embeddings(&Frame::new(image)) {
                Ok(e) => e,
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping reference image: analysis failed");
                    continue;
                }
            };

            match embeddings.into_iter().next() {
                Some(embedding) => {
                    tracing::info!(name = %name, "loaded known identity");
                    identities.push(KnownIdentity { name, embedding });
                }
                None => {
                    tracing::warn!(path = %path.display(), "skipping reference image: no face found");
                }
            }
        }

        Ok(Self::new(identities, metric, tolerance))
    }

    pub fn identities(&self) -> &[KnownIdentity] {
        &self.identities
    }

    pub fn metric(&self) -> DistanceMetric {
        self.metric
    }

    pub fn tolerance(&self) -> f32 {
        self.tolerance
    }
}

impl IdentityMatcher for KnownIdentityStore {
    fn find_match(&self, candidates: &[Embedding]) -> Option<&KnownIdentity> {
        for candidate in candidates {
            for known in &self.identities {
                let d = self.metric.distance(candidate, &known.embedding);
                if d <= self.tolerance {
                    tracing::debug!(name = %known.name, distance = d, "identity matched");
                    return Some(known);
                }
            }
        }
        None
    }

    fn len(&self) -> usize {
        self.identities.len()
    }
}

fn is_reference_image(path: &Path) -> bool {
    path.is_file()
        && path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| IMAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
            .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vision::{FaceBox, Landmarks68, VisionError};
    use image::{Rgb, RgbImage};

    fn identity(name: &str, values: Vec<f32>) -> KnownIdentity {
        KnownIdentity {
            name: name.to_string(),
            embedding: Embedding::new(values),
        }
    }

    fn store(metric: DistanceMetric) -> KnownIdentityStore {
        KnownIdentityStore::new(
            vec![identity("alice", vec![0.0, 0.0, 0.0, 0.0])],
            metric,
            DEFAULT_TOLERANCE,
        )
    }

    #[test]
    fn within_tolerance_matches() {
        let s = store(DistanceMetric::Euclidean);
        let candidate = Embedding::new(vec![0.39, 0.0, 0.0, 0.0]);
        assert!(s.is_match(&[candidate]));
    }

    #[test]
    fn beyond_tolerance_rejected() {
        let s = store(DistanceMetric::Euclidean);
        let candidate = Embedding::new(vec![0.41, 0.0, 0.0, 0.0]);
        assert!(!s.is_match(&[candidate]));
    }

    #[test]
    fn any_candidate_may_match() {
        let s = store(DistanceMetric::Euclidean);
        let far = Embedding::new(vec![5.0, 5.0, 5.0, 5.0]);
        let near = Embedding::new(vec![0.1, 0.0, 0.0, 0.0]);
        let found = s.find_match(&[far, near]).unwrap();
        assert_eq!(found.name, "alice");
    }

    #[test]
    fn first_stored_match_wins() {
        let s = KnownIdentityStore::new(
            vec![
                identity("alice", vec![1.0, 0.0]),
                identity("bob", vec![1.0, 0.05]),
            ],
            DistanceMetric::Cosine,
            DEFAULT_TOLERANCE,
        );
        let found = s.find_match(&[Embedding::new(vec![1.0, 0.02])]).unwrap();
        assert_eq!(found.name, "alice");
    }

    #[test]
    fn cosine_metric_tolerance() {
        let s = KnownIdentityStore::new(
            vec![identity("alice", vec![1.0, 0.0])],
            DistanceMetric::Cosine,
            DEFAULT_TOLERANCE,
        );
        // cos 45deg ~ 0.707 -> distance ~ 0.29
        assert!(s.is_match(&[Embedding::new(vec![1.0, 1.0])]));
        // orthogonal -> distance 1.0
        assert!(!s.is_match(&[Embedding::new(vec![0.0, 1.0])]));
    }

    #[test]
    fn empty_store_never_matches() {
        let s = KnownIdentityStore::new(vec![], DistanceMetric::Euclidean, DEFAULT_TOLERANCE);
        assert!(s.is_empty());
        assert!(!s.is_match(&[Embedding::new(vec![0.0])]));
    }

    #[test]
    fn metric_parsing() {
        assert_eq!("Cosine".parse::<DistanceMetric>().unwrap(), DistanceMetric::Cosine);
        assert_eq!("euclidean".parse::<DistanceMetric>().unwrap(), DistanceMetric::Euclidean);
        assert!("manhattan".parse::<DistanceMetric>().is_err());
    }

    /// Embeds a reference image by its top-left red channel; faceless when red is 0.
    struct RedChannelFaces;

    impl FaceAnalyzer for RedChannelFaces {
        fn detect_faces(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>, VisionError> {
            Ok(vec![])
        }

        fn landmarks(&mut self, _frame: &Frame, _face: &FaceBox) -> Result<Landmarks68, VisionError> {
            Err(VisionError::Input("unused".into()))
        }

        fn embeddings(&mut self, frame: &Frame) -> Result<Vec<Embedding>, VisionError> {
            let red = frame.image.get_pixel(0, 0)[0];
            if red == 0 {
                return Ok(vec![]);
            }
            Ok(vec![Embedding::new(vec![red as f32 / 255.0, 0.0])])
        }
    }

    #[test]
    fn load_dir_skips_faceless_and_non_images() {
        let dir = std::env::temp_dir().join(format!(
            "vouch-identity-test-{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        RgbImage::from_pixel(8, 8, Rgb([255, 0, 0]))
            .save(dir.join("alice.png"))
            .unwrap();
        RgbImage::from_pixel(8, 8, Rgb([0, 0, 0]))
            .save(dir.join("nobody.png"))
            .unwrap();
        std::fs::write(dir.join("notes.txt"), b"not an image").unwrap();

        let store = KnownIdentityStore::load_dir(
            &dir,
            &mut RedChannelFaces,
            DistanceMetric::Euclidean,
            DEFAULT_TOLERANCE,
        )
        .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.identities()[0].name, "alice");

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn load_dir_missing_directory_errors() {
        let err = KnownIdentityStore::load_dir(
            Path::new("/nonexistent/vouch/known_faces"),
            &mut RedChannelFaces,
            DistanceMetric::Euclidean,
            DEFAULT_TOLERANCE,
        )
        .unwrap_err();
        assert!(matches!(err, IdentityLoadError::ReadDir { .. }));
    }
}
