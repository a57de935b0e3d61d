//! vouch-core: liveness, identity matching, gesture judging, overlay
//! rendering and the verification state machine.
//!
//! Everything here is synchronous and free of I/O beyond loading reference
//! images; the camera, the face models and the classifier are supplied by
//! the caller through the traits in [`vision`] and [`gesture`].

pub mod frame;
pub mod gesture;
pub mod identity;
pub mod liveness;
pub mod overlay;
pub mod session;
pub mod vision;

#[cfg(feature = "onnx")]
pub mod onnx;

pub use frame::{encode_jpeg, Frame};
pub use gesture::{ClassifierError, Gesture, GestureClassifier, GestureJudge, LabelScore};
pub use identity::{DistanceMetric, IdentityMatcher, KnownIdentity, KnownIdentityStore};
pub use liveness::{LivenessChecker, LivenessResult};
pub use overlay::OverlayRenderer;
pub use session::{
    Backends, Outcome, SessionConfig, SessionError, SessionSnapshot, Verdict,
    VerificationSession, VerificationState,
};
pub use vision::{Embedding, FaceAnalyzer, FaceBox, Landmarks68, VisionError};
