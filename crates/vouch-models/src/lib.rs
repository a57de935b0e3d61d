//! The face models vouchd loads, where they come from, and how a model
//! directory is checked before the daemon trusts it.
//!
//! All three files come from the InsightFace `buffalo_l` pack. The detector
//! and recognizer digests are pinned from the HuggingFace LFS pointers
//! (`oid sha256:`); the landmark model is not, so only its presence and a
//! non-zero size are checked.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};
use thiserror::Error;

pub const DETECTOR: &str = "det_10g.onnx";
pub const RECOGNIZER: &str = "w600k_r50.onnx";
pub const LANDMARKER: &str = "1k3d68.onnx";

/// What a file on disk has to hash to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checksum {
    Sha256(&'static str),
    Unpinned,
}

#[derive(Debug, Clone, Copy)]
pub struct ModelFile {
    pub name: &'static str,
    pub url: &'static str,
    pub checksum: Checksum,
    /// Approximate download size, for progress messages.
    pub size: &'static str,
}

pub const MODELS: &[ModelFile] = &[
    ModelFile {
        name: DETECTOR,
        url: concat!(
            "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l",
            "/det_10g.onnx"
        ),
        checksum: Checksum::Sha256(
            "5838f7fe053675b1c7a08b633df49e7af5495cee0493c7dcf6697200b85b5b91",
        ),
        size: "16 MB",
    },
    ModelFile {
        name: RECOGNIZER,
        url: concat!(
            "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l",
            "/w600k_r50.onnx"
        ),
        checksum: Checksum::Sha256(
            "4c06341c33c2ca1f86781dab0e829f88ad5b64be9fba56e56bc9ebdefc619e43",
        ),
        size: "166 MB",
    },
    ModelFile {
        name: LANDMARKER,
        url: concat!(
            "https://huggingface.co/public-data/insightface/resolve/main/models/buffalo_l",
            "/1k3d68.onnx"
        ),
        checksum: Checksum::Unpinned,
        size: "137 MB",
    },
];

#[derive(Error, Debug)]
pub enum ModelError {
    #[error("{name} not found at {path}; run `vouch setup`")]
    Missing { name: &'static str, path: PathBuf },

    #[error("{name} at {path} is empty")]
    Empty { name: &'static str, path: PathBuf },

    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("{name} at {path} does not match its pinned digest\n  expected: {expected}\n  actual:   {actual}")]
    Mismatch {
        name: &'static str,
        path: PathBuf,
        expected: &'static str,
        actual: String,
    },
}

impl ModelFile {
    pub fn is_pinned(&self) -> bool {
        matches!(self.checksum, Checksum::Sha256(_))
    }

    /// Check `path` (not necessarily named after the entry) against this entry.
    pub fn check(&self, path: &Path) -> Result<(), ModelError> {
        let meta = fs::metadata(path).map_err(|source| match source.kind() {
            io::ErrorKind::NotFound => ModelError::Missing {
                name: self.name,
                path: path.to_path_buf(),
            },
            _ => ModelError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
        if meta.len() == 0 {
            return Err(ModelError::Empty {
                name: self.name,
                path: path.to_path_buf(),
            });
        }

        if let Checksum::Sha256(expected) = self.checksum {
            let actual = file_sha256(path)?;
            if actual != expected {
                return Err(ModelError::Mismatch {
                    name: self.name,
                    path: path.to_path_buf(),
                    expected,
                    actual,
                });
            }
        }
        Ok(())
    }
}

/// Lowercase hex SHA-256 of a file's contents, streamed.
pub fn file_sha256(path: &Path) -> Result<String, ModelError> {
    let io_err = |source| ModelError::Io {
        path: path.to_path_buf(),
        source,
    };
    let mut file = fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    io::copy(&mut file, &mut hasher).map_err(io_err)?;
    Ok(format!("{:x}", hasher.finalize()))
}

/// Check every manifest entry inside `model_dir`, stopping at the first problem.
pub fn verify_models_dir(model_dir: &Path) -> Result<(), ModelError> {
    MODELS
        .iter()
        .try_for_each(|model| model.check(&model_dir.join(model.name)))
}

/// `/var/lib/vouch/models` for root, `$XDG_DATA_HOME/vouch/models` otherwise.
pub fn default_model_dir() -> PathBuf {
    if is_root() {
        return PathBuf::from("/var/lib/vouch/models");
    }
    let data_home = std::env::var_os("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| {
            std::env::var_os("HOME")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("/tmp"))
                .join(".local/share")
        });
    data_home.join("vouch").join("models")
}

fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions.
    unsafe { libc::geteuid() == 0 }
}
