use std::path::PathBuf;
use std::time::Duration;

use vouch_core::gesture::DEFAULT_CONFIDENCE_THRESHOLD;
use vouch_core::identity::DEFAULT_TOLERANCE;
use vouch_core::liveness::DEFAULT_EAR_THRESHOLD;
use vouch_core::{DistanceMetric, SessionConfig};

/// Hosted CLIP zero-shot image classification endpoint.
pub const DEFAULT_CLASSIFIER_URL: &str =
    "https://api-inference.huggingface.co/models/openai/clip-vit-base-patch32";

/// Daemon configuration, loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP listen address (default: 0.0.0.0:5000).
    pub bind_addr: String,
    /// Webcam index passed to the capture backend (default: 0).
    pub camera_index: i32,
    /// Directory of still images replayed instead of the webcam.
    pub frame_dir: Option<PathBuf>,
    /// Directory containing ONNX model files.
    pub model_dir: PathBuf,
    /// One image per known person; the file stem is the identity name.
    pub known_faces_dir: PathBuf,
    /// Optional `<gesture>.jpg` reference pictures shown with a challenge.
    pub gesture_image_dir: PathBuf,
    /// TrueType font for overlays; common system fonts are tried when unset.
    pub font_path: Option<PathBuf>,
    /// Seconds the user has to perform the gesture.
    pub challenge_secs: u64,
    /// Averaged eye-aspect-ratio at or below which eyes count as closed.
    pub ear_threshold: f32,
    /// Maximum embedding distance (inclusive) for an identity match.
    pub match_tolerance: f32,
    pub match_metric: DistanceMetric,
    /// Classifier score a gesture must exceed.
    pub gesture_confidence: f32,
    pub classifier_url: String,
    /// Bearer token for the classifier endpoint.
    pub classifier_token: Option<String>,
    pub classifier_timeout_secs: u64,
    /// Target frame rate of `/video_feed`.
    pub stream_fps: u32,
    /// Number of warmup frames to discard at startup (camera AGC/AE stabilization).
    pub warmup_frames: usize,
    /// Whether to check model checksums before loading them.
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    pub verify_models: bool,
}

impl Config {
    /// Load configuration from `VOUCH_*` environment variables with defaults.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let parse_f32 = |key: &str, default: f32| parsed(get(key), key, default);
        let parse_u64 = |key: &str, default: u64| parsed(get(key), key, default);

        let match_metric = match get("VOUCH_MATCH_METRIC") {
            Some(raw) => raw.parse().unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to cosine distance");
                DistanceMetric::Cosine
            }),
            None => DistanceMetric::Cosine,
        };

        Self {
            bind_addr: get("VOUCH_BIND").unwrap_or_else(|| "0.0.0.0:5000".to_string()),
            camera_index: parsed(get("VOUCH_CAMERA_INDEX"), "VOUCH_CAMERA_INDEX", 0),
            frame_dir: get("VOUCH_FRAME_DIR").map(PathBuf::from),
            model_dir: get("VOUCH_MODEL_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(vouch_models::default_model_dir),
            known_faces_dir: get("VOUCH_KNOWN_FACES_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("known_faces")),
            gesture_image_dir: get("VOUCH_GESTURE_IMAGE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("hand_gestures")),
            font_path: get("VOUCH_FONT_PATH").map(PathBuf::from),
            challenge_secs: parse_u64("VOUCH_CHALLENGE_SECS", 5).max(1),
            ear_threshold: parse_f32("VOUCH_EAR_THRESHOLD", DEFAULT_EAR_THRESHOLD),
            match_tolerance: parse_f32("VOUCH_MATCH_TOLERANCE", DEFAULT_TOLERANCE),
            match_metric,
            gesture_confidence: parse_f32("VOUCH_GESTURE_CONFIDENCE", DEFAULT_CONFIDENCE_THRESHOLD),
            classifier_url: get("VOUCH_CLASSIFIER_URL")
                .unwrap_or_else(|| DEFAULT_CLASSIFIER_URL.to_string()),
            classifier_token: get("VOUCH_CLASSIFIER_TOKEN").filter(|t| !t.is_empty()),
            classifier_timeout_secs: parse_u64("VOUCH_CLASSIFIER_TIMEOUT_SECS", 10),
            stream_fps: parsed(get("VOUCH_STREAM_FPS"), "VOUCH_STREAM_FPS", 15u32).max(1),
            warmup_frames: parsed(get("VOUCH_WARMUP_FRAMES"), "VOUCH_WARMUP_FRAMES", 4),
            verify_models: get("VOUCH_VERIFY_MODELS")
                .map(|v| v != "0")
                .unwrap_or(true),
        }
    }

    /// Path to the SCRFD detection model.
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    pub fn detector_model_path(&self) -> PathBuf {
        self.model_dir.join(vouch_models::DETECTOR)
    }

    /// Path to the ArcFace recognition model.
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    pub fn recognizer_model_path(&self) -> PathBuf {
        self.model_dir.join(vouch_models::RECOGNIZER)
    }

    /// Path to the 68-point landmark model.
    #[cfg_attr(not(feature = "onnx"), allow(dead_code))]
    pub fn landmark_model_path(&self) -> PathBuf {
        self.model_dir.join(vouch_models::LANDMARKER)
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            challenge_duration: Duration::from_secs(self.challenge_secs),
            ear_threshold: self.ear_threshold,
            gesture_confidence: self.gesture_confidence,
        }
    }

    pub fn stream_interval(&self) -> Duration {
        Duration::from_secs(1) / self.stream_fps
    }
}

fn parsed<T: std::str::FromStr>(raw: Option<String>, key: &str, default: T) -> T {
    match raw {
        Some(v) => v.trim().parse().unwrap_or_else(|_| {
            tracing::warn!(key, value = %v, "ignoring unparsable setting");
            default
        }),
        None => default,
    }
}
