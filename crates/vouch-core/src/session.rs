//! The verification state machine.
//!
//! One [`VerificationSession`] exists per process. A challenge names a
//! gesture and a start instant; a capture then runs liveness, identity and
//! gesture checks in that order, each short-circuiting the rest.
//!
//! ```text
//!   issue_challenge          capture ok
//!  ───────────────▶ waiting ───────────▶ success
//!                     │
//!                     │ capture fails / timer expires
//!                     ▼
//!                   failure
//! ```
//!
//! `success` and `failure` are absorbing until the next challenge, with one
//! exception: a failure set by the stream renderer when the timer ran out
//! still admits one capture, which then reports `time_up`. Time is passed
//! in explicitly so expiry is evaluated lazily by whoever observes the
//! session: the stream renderer or a capture.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use image::RgbImage;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::frame::Frame;
use crate::gesture::{self, ClassifierError, Gesture, GestureClassifier, GestureJudge, JudgeOutcome};
use crate::identity::IdentityMatcher;
use crate::liveness::{LivenessChecker, DEFAULT_EAR_THRESHOLD};
use crate::overlay::OverlayRenderer;
use crate::vision::FaceAnalyzer;

/// Default time the user has to perform the gesture.
pub const DEFAULT_CHALLENGE_DURATION: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum VerificationState {
    Waiting,
    Success,
    Failure,
}

impl VerificationState {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, VerificationState::Waiting)
    }
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("no gesture challenge in progress")]
    NoActiveChallenge,
    #[error("challenge already concluded ({0:?}); request a new gesture")]
    ChallengeConcluded(VerificationState),
}

/// Tunables for one verification flow.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub challenge_duration: Duration,
    pub ear_threshold: f32,
    pub gesture_confidence: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            challenge_duration: DEFAULT_CHALLENGE_DURATION,
            ear_threshold: DEFAULT_EAR_THRESHOLD,
            gesture_confidence: gesture::DEFAULT_CONFIDENCE_THRESHOLD,
        }
    }
}

/// The gesture currently requested and when it was requested.
#[derive(Debug, Clone)]
pub struct Challenge {
    pub id: Uuid,
    pub gesture: &'static Gesture,
    pub started_at: Instant,
    pub issued_at: DateTime<Utc>,
}

/// External collaborators a capture consults, owned by the caller.
pub struct Backends {
    pub analyzer: Box<dyn FaceAnalyzer>,
    pub identities: Box<dyn IdentityMatcher>,
    pub classifier: Box<dyn GestureClassifier>,
}

/// Why a capture ended the way it did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Verified,
    NotLive,
    NoFace,
    NotRecognized,
    TimeUp,
    GestureMismatch,
    /// Classifier in a transient state (cold start, rate limit); retry allowed.
    ClassifierUnavailable(ClassifierError),
    /// Classifier or face backend failed; counted as a failure.
    AnalysisFailed(String),
}

pub const MSG_VERIFIED: &str = "Verification successful";
pub const MSG_NO_FACE: &str = "No face detected";
pub const MSG_NOT_RECOGNIZED: &str = "Face not recognized";
pub const MSG_TIME_UP: &str = "Time's up! Gesture verification failed.";
pub const MSG_GESTURE_FAILED: &str = "Gesture verification failed";
pub const MSG_RETRY: &str = "Gesture classifier is warming up, try again";
pub const MSG_ANALYSIS_FAILED: &str = "Face analysis failed";

/// The single answer to one capture.
#[derive(Debug, Clone)]
pub struct Verdict {
    pub outcome: Outcome,
    pub message: String,
    /// Capture with gesture diagnostics, when the classifier was consulted.
    pub annotated: Option<RgbImage>,
}

impl Verdict {
    fn new(outcome: Outcome, message: impl Into<String>) -> Self {
        Self {
            outcome,
            message: message.into(),
            annotated: None,
        }
    }

    pub fn verified(&self) -> bool {
        self.outcome == Outcome::Verified
    }

    /// Set once the capture reached the timing check.
    pub fn time_up(&self) -> Option<bool> {
        match self.outcome {
            Outcome::TimeUp => Some(true),
            Outcome::Verified
            | Outcome::GestureMismatch
            | Outcome::ClassifierUnavailable(_) => Some(false),
            Outcome::AnalysisFailed(_) | Outcome::NotLive | Outcome::NoFace | Outcome::NotRecognized => None,
        }
    }

    pub fn retry(&self) -> bool {
        matches!(self.outcome, Outcome::ClassifierUnavailable(_))
    }
}

/// Read-only view of the session for status reporting.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    pub state: VerificationState,
    pub gesture: Option<&'static str>,
    pub challenge_id: Option<Uuid>,
    pub issued_at: Option<DateTime<Utc>>,
    pub remaining_secs: Option<f32>,
    pub face_verified: bool,
    pub time_limit: u64,
}

pub struct VerificationSession {
    config: SessionConfig,
    liveness: LivenessChecker,
    judge: GestureJudge,
    active: Option<Challenge>,
    state: VerificationState,
    face_verified: bool,
    /// Failure came from the stream timer, not from a capture.
    expired_unreported: bool,
}

impl VerificationSession {
    pub fn new(config: SessionConfig) -> Self {
        Self {
            liveness: LivenessChecker::new(config.ear_threshold),
            judge: GestureJudge::new(config.gesture_confidence),
            config,
            active: None,
            state: VerificationState::Waiting,
            face_verified: false,
            expired_unreported: false,
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn state(&self) -> VerificationState {
        self.state
    }

    pub fn face_verified(&self) -> bool {
        self.face_verified
    }

    pub fn active(&self) -> Option<&Challenge> {
        self.active.as_ref()
    }

    /// Pick a gesture uniformly at random and start a fresh challenge.
    pub fn issue_challenge<R: Rng + ?Sized>(&mut self, rng: &mut R, now: Instant) -> &Challenge {
        let catalog = gesture::catalog();
        let gesture = &catalog[rng.gen_range(0..catalog.len())];
        self.start_challenge(gesture, now)
    }

    /// Start a challenge for a specific gesture, discarding any previous outcome.
    pub fn start_challenge(&mut self, gesture: &'static Gesture, now: Instant) -> &Challenge {
        self.state = VerificationState::Waiting;
        self.face_verified = false;
        self.expired_unreported = false;
        let challenge = Challenge {
            id: Uuid::new_v4(),
            gesture,
            started_at: now,
            issued_at: Utc::now(),
        };
        tracing::info!(
            challenge_id = %challenge.id,
            gesture = gesture.name,
            limit_secs = self.config.challenge_duration.as_secs_f32(),
            "challenge issued"
        );
        self.active.insert(challenge)
    }

    /// Time left on the active challenge; `None` without one.
    pub fn remaining(&self, now: Instant) -> Option<Duration> {
        self.active.as_ref().map(|c| {
            self.config
                .challenge_duration
                .saturating_sub(now.saturating_duration_since(c.started_at))
        })
    }

    /// The single expiry rule: the limit itself is still in time.
    fn elapsed_exceeds_limit(&self, challenge: &Challenge, now: Instant) -> bool {
        now.saturating_duration_since(challenge.started_at) > self.config.challenge_duration
    }

    /// The challenge a capture would be judged against, or why there is none.
    pub fn capturable(&self) -> Result<&Challenge, SessionError> {
        let challenge = self.active.as_ref().ok_or(SessionError::NoActiveChallenge)?;
        match self.state {
            VerificationState::Waiting => Ok(challenge),
            VerificationState::Failure if self.expired_unreported => Ok(challenge),
            state => Err(SessionError::ChallengeConcluded(state)),
        }
    }

    /// Run the full check sequence against one captured frame.
    ///
    /// Liveness, face extraction, identity match, timing and gesture are
    /// evaluated in order; the first failure decides the verdict and the
    /// later collaborators are never consulted.
    pub fn capture_and_verify(
        &mut self,
        frame: &Frame,
        now: Instant,
        backends: &mut Backends,
        overlay: &OverlayRenderer,
    ) -> Result<Verdict, SessionError> {
        let challenge = self.capturable()?.clone();

        let verdict = self.evaluate(&challenge, frame, now, backends, overlay);
        match verdict.outcome {
            Outcome::Verified => self.state = VerificationState::Success,
            // Transient classifier trouble leaves the challenge open.
            Outcome::ClassifierUnavailable(_) => {}
            _ => self.state = VerificationState::Failure,
        }
        if self.state.is_terminal() {
            self.expired_unreported = false;
        }

        tracing::info!(
            challenge_id = %challenge.id,
            gesture = challenge.gesture.name,
            outcome = ?verdict.outcome,
            state = ?self.state,
            "capture evaluated"
        );
        Ok(verdict)
    }

    fn evaluate(
        &mut self,
        challenge: &Challenge,
        frame: &Frame,
        now: Instant,
        backends: &mut Backends,
        overlay: &OverlayRenderer,
    ) -> Verdict {
        let liveness = match self.liveness.check(frame, backends.analyzer.as_mut()) {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(error = %e, "liveness analysis failed");
                return Verdict::new(Outcome::AnalysisFailed(e.to_string()), MSG_ANALYSIS_FAILED);
            }
        };
        if !liveness.is_live {
            tracing::debug!(reason = liveness.reason, ear = ?liveness.ear, "liveness rejected");
            return Verdict::new(Outcome::NotLive, liveness.reason);
        }

        let embeddings = match backends.analyzer.embeddings(frame) {
            Ok(e) => e,
            Err(e) => {
                tracing::error!(error = %e, "embedding extraction failed");
                return Verdict::new(Outcome::AnalysisFailed(e.to_string()), MSG_ANALYSIS_FAILED);
            }
        };
        if embeddings.is_empty() {
            return Verdict::new(Outcome::NoFace, MSG_NO_FACE);
        }

        match backends.identities.find_match(&embeddings) {
            Some(identity) => {
                tracing::debug!(name = %identity.name, "face verified");
                self.face_verified = true;
            }
            None => return Verdict::new(Outcome::NotRecognized, MSG_NOT_RECOGNIZED),
        }

        if self.elapsed_exceeds_limit(challenge, now) {
            return Verdict::new(Outcome::TimeUp, MSG_TIME_UP);
        }

        let judgement = self
            .judge
            .judge(frame, challenge.gesture, backends.classifier.as_mut(), overlay);
        let mut verdict = match judgement.outcome {
            JudgeOutcome::Match => Verdict::new(Outcome::Verified, MSG_VERIFIED),
            JudgeOutcome::Mismatch => Verdict::new(Outcome::GestureMismatch, MSG_GESTURE_FAILED),
            JudgeOutcome::Unavailable(e) if e.is_retryable() => {
                Verdict::new(Outcome::ClassifierUnavailable(e), MSG_RETRY)
            }
            JudgeOutcome::Unavailable(e) => {
                Verdict::new(Outcome::AnalysisFailed(e.to_string()), MSG_GESTURE_FAILED)
            }
        };
        verdict.annotated = Some(judgement.annotated);
        verdict
    }

    /// Annotate a live frame with timer, gesture and badge.
    ///
    /// The only mutation is the lazy expiry transition `waiting -> failure`.
    pub fn render_stream_frame(
        &mut self,
        frame: &Frame,
        now: Instant,
        overlay: &OverlayRenderer,
    ) -> RgbImage {
        let mut image = frame.image.clone();
        if let Some(challenge) = &self.active {
            if !self.elapsed_exceeds_limit(challenge, now) {
                let remaining = self
                    .config
                    .challenge_duration
                    .saturating_sub(now.saturating_duration_since(challenge.started_at));
                image = overlay.draw_timer(&image, remaining.as_secs_f32());
                image = overlay.draw_gesture_name(&image, challenge.gesture.name);
            } else if self.state == VerificationState::Waiting {
                tracing::info!(challenge_id = %challenge.id, "challenge expired");
                self.state = VerificationState::Failure;
                self.expired_unreported = true;
            }
        }
        overlay.draw_badge(&image, self.state)
    }

    pub fn snapshot(&self, now: Instant) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            gesture: self.active.as_ref().map(|c| c.gesture.name),
            challenge_id: self.active.as_ref().map(|c| c.id),
            issued_at: self.active.as_ref().map(|c| c.issued_at),
            remaining_secs: self.remaining(now).map(|r| r.as_secs_f32()),
            face_verified: self.face_verified,
            time_limit: self.config.challenge_duration.as_secs(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gesture::LabelScore;
    use crate::identity::{DistanceMetric, KnownIdentity, KnownIdentityStore};
    use crate::liveness::{LEFT_EYE, RIGHT_EYE};
    use crate::vision::{Embedding, FaceBox, Landmarks68, VisionError};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct Calls {
        detect: AtomicUsize,
        landmarks: AtomicUsize,
        embeddings: AtomicUsize,
        matches: AtomicUsize,
        classify: AtomicUsize,
    }

    struct StubAnalyzer {
        calls: Arc<Calls>,
        eyes_open: bool,
        embedding: Option<Vec<f32>>,
    }

    fn eye(x0: f32, h: f32) -> [(f32, f32); 6] {
        [
            (x0, 0.0),
            (x0 + 3.0, -h),
            (x0 + 7.0, -h),
            (x0 + 10.0, 0.0),
            (x0 + 7.0, h),
            (x0 + 3.0, h),
        ]
    }

    impl FaceAnalyzer for StubAnalyzer {
        fn detect_faces(&mut self, _frame: &Frame) -> Result<Vec<FaceBox>, VisionError> {
            self.calls.detect.fetch_add(1, Ordering::SeqCst);
            Ok(vec![FaceBox {
                x1: 10.0,
                y1: 10.0,
                x2: 50.0,
                y2: 50.0,
                confidence: 0.99,
                keypoints: None,
            }])
        }

        fn landmarks(&mut self, _frame: &Frame, _face: &FaceBox) -> Result<Landmarks68, VisionError> {
            self.calls.landmarks.fetch_add(1, Ordering::SeqCst);
            let h = if self.eyes_open { 4.0 } else { 0.5 };
            let mut lm = [(0.0, 0.0); 68];
            lm[LEFT_EYE].copy_from_slice(&eye(0.0, h));
            lm[RIGHT_EYE].copy_from_slice(&eye(20.0, h));
            Ok(lm)
        }

        fn embeddings(&mut self, _frame: &Frame) -> Result<Vec<Embedding>, VisionError> {
            self.calls.embeddings.fetch_add(1, Ordering::SeqCst);
            Ok(self.embedding.iter().cloned().map(Embedding::new).collect())
        }
    }

    struct CountingMatcher {
        calls: Arc<Calls>,
        inner: KnownIdentityStore,
    }

    impl IdentityMatcher for CountingMatcher {
        fn find_match(&self, candidates: &[Embedding]) -> Option<&KnownIdentity> {
            self.calls.matches.fetch_add(1, Ordering::SeqCst);
            self.inner.find_match(candidates)
        }

        fn len(&self) -> usize {
            self.inner.len()
        }
    }

    struct StubClassifier {
        calls: Arc<Calls>,
        response: Arc<Mutex<Result<Vec<LabelScore>, ClassifierError>>>,
    }

    impl GestureClassifier for StubClassifier {
        fn classify(&mut self, _frame: &Frame, _labels: &[&str]) -> Result<Vec<LabelScore>, ClassifierError> {
            self.calls.classify.fetch_add(1, Ordering::SeqCst);
            self.response.lock().unwrap().clone()
        }
    }

    struct Harness {
        calls: Arc<Calls>,
        response: Arc<Mutex<Result<Vec<LabelScore>, ClassifierError>>>,
        backends: Backends,
        session: VerificationSession,
        overlay: OverlayRenderer,
        frame: Frame,
    }

    fn harness(eyes_open: bool, embedding: Option<Vec<f32>>) -> Harness {
        let calls = Arc::new(Calls::default());
        let response = Arc::new(Mutex::new(Ok(vec![LabelScore {
            label: "thumbs_up".into(),
            score: 0.8,
        }])));
        let store = KnownIdentityStore::new(
            vec![KnownIdentity {
                name: "alice".into(),
                embedding: Embedding::new(vec![1.0, 0.0, 0.0]),
            }],
            DistanceMetric::Euclidean,
            0.4,
        );
        Harness {
            backends: Backends {
                analyzer: Box::new(StubAnalyzer {
                    calls: calls.clone(),
                    eyes_open,
                    embedding,
                }),
                identities: Box::new(CountingMatcher {
                    calls: calls.clone(),
                    inner: store,
                }),
                classifier: Box::new(StubClassifier {
                    calls: calls.clone(),
                    response: response.clone(),
                }),
            },
            calls,
            response,
            session: VerificationSession::new(SessionConfig::default()),
            overlay: OverlayRenderer::without_font(),
            frame: Frame::new(RgbImage::new(64, 48)),
        }
    }

    fn known() -> Option<Vec<f32>> {
        Some(vec![1.0, 0.1, 0.0])
    }

    fn thumbs_up() -> &'static Gesture {
        gesture::find("thumbs_up").unwrap()
    }

    impl Harness {
        fn capture(&mut self, now: Instant) -> Result<Verdict, SessionError> {
            self.session
                .capture_and_verify(&self.frame, now, &mut self.backends, &self.overlay)
        }
    }

    #[test]
    fn issue_challenge_resets_state() {
        let mut h = harness(false, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        h.capture(t0).unwrap();
        assert_eq!(h.session.state(), VerificationState::Failure);

        let mut rng = rand::thread_rng();
        let challenge = h.session.issue_challenge(&mut rng, t0).clone();
        assert!(gesture::catalog().contains(challenge.gesture));
        assert_eq!(h.session.state(), VerificationState::Waiting);
        assert!(!h.session.face_verified());
        assert_eq!(h.session.active().unwrap().started_at, t0);
    }

    #[test]
    fn issue_challenge_clears_face_verified_after_success() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        assert!(h.capture(t0).unwrap().verified());
        assert!(h.session.face_verified());

        h.session.issue_challenge(&mut rand::thread_rng(), t0);
        assert!(!h.session.face_verified());
        assert_eq!(h.session.state(), VerificationState::Waiting);
    }

    #[test]
    fn capture_without_challenge_is_precondition_error() {
        let mut h = harness(true, known());
        let err = h.capture(Instant::now()).unwrap_err();
        assert_eq!(err, SessionError::NoActiveChallenge);
        assert_eq!(h.calls.detect.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn failed_liveness_short_circuits() {
        let mut h = harness(false, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0).unwrap();
        assert!(!verdict.verified());
        assert_eq!(verdict.outcome, Outcome::NotLive);
        assert_eq!(verdict.message, "Eyes are closed");
        assert_eq!(verdict.time_up(), None);
        assert_eq!(h.session.state(), VerificationState::Failure);
        assert_eq!(h.calls.embeddings.load(Ordering::SeqCst), 0);
        assert_eq!(h.calls.matches.load(Ordering::SeqCst), 0);
        assert_eq!(h.calls.classify.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn no_embeddings_means_no_face() {
        let mut h = harness(true, None);
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0).unwrap();
        assert_eq!(verdict.outcome, Outcome::NoFace);
        assert_eq!(verdict.message, MSG_NO_FACE);
        assert_eq!(h.calls.matches.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn unknown_face_not_recognized() {
        let mut h = harness(true, Some(vec![0.0, 1.0, 0.0]));
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0).unwrap();
        assert_eq!(verdict.outcome, Outcome::NotRecognized);
        assert_eq!(verdict.message, MSG_NOT_RECOGNIZED);
        assert!(!h.session.face_verified());
        assert_eq!(h.calls.classify.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn time_up_skips_gesture_judge() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0 + Duration::from_secs(6)).unwrap();
        assert_eq!(verdict.outcome, Outcome::TimeUp);
        assert_eq!(verdict.time_up(), Some(true));
        assert_eq!(verdict.message, MSG_TIME_UP);
        assert!(h.session.face_verified());
        assert_eq!(h.session.state(), VerificationState::Failure);
        assert_eq!(h.calls.classify.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn end_to_end_matching_gesture_verifies() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0 + Duration::from_secs(3)).unwrap();
        assert!(verdict.verified());
        assert_eq!(verdict.message, MSG_VERIFIED);
        assert_eq!(verdict.time_up(), Some(false));
        assert!(verdict.annotated.is_some());
        assert_eq!(h.session.state(), VerificationState::Success);
        assert_eq!(h.calls.classify.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn end_to_end_wrong_gesture_fails() {
        let mut h = harness(true, known());
        *h.response.lock().unwrap() = Ok(vec![LabelScore {
            label: "peace".into(),
            score: 0.9,
        }]);
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0 + Duration::from_secs(3)).unwrap();
        assert!(!verdict.verified());
        assert_eq!(verdict.message, "Gesture verification failed");
        assert_eq!(verdict.time_up(), Some(false));
        assert_eq!(h.session.state(), VerificationState::Failure);
    }

    #[test]
    fn cold_start_keeps_challenge_open() {
        let mut h = harness(true, known());
        *h.response.lock().unwrap() = Err(ClassifierError::Loading {
            estimated_secs: Some(12.0),
        });
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0).unwrap();
        assert!(verdict.retry());
        assert_eq!(verdict.message, MSG_RETRY);
        assert_eq!(h.session.state(), VerificationState::Waiting);

        *h.response.lock().unwrap() = Ok(vec![LabelScore {
            label: "thumbs_up".into(),
            score: 0.6,
        }]);
        assert!(h.capture(t0 + Duration::from_secs(1)).unwrap().verified());
    }

    #[test]
    fn classifier_error_fails_closed() {
        let mut h = harness(true, known());
        *h.response.lock().unwrap() = Err(ClassifierError::Malformed("not a list".into()));
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        let verdict = h.capture(t0).unwrap();
        assert!(!verdict.verified());
        assert!(!verdict.retry());
        assert_eq!(h.session.state(), VerificationState::Failure);
    }

    #[test]
    fn concluded_challenge_rejects_capture() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        h.capture(t0).unwrap();
        let err = h.capture(t0).unwrap_err();
        assert_eq!(err, SessionError::ChallengeConcluded(VerificationState::Success));
        assert_eq!(h.calls.classify.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn stream_render_expires_waiting_challenge() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);

        let img = h.session.render_stream_frame(&h.frame, t0 + Duration::from_secs(1), &h.overlay);
        assert_eq!(img.dimensions(), (64, 48));
        assert_eq!(h.session.state(), VerificationState::Waiting);

        h.session
            .render_stream_frame(&h.frame, t0 + Duration::from_secs(6), &h.overlay);
        assert_eq!(h.session.state(), VerificationState::Failure);
    }

    #[test]
    fn capture_after_stream_expiry_reports_time_up() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        let late = t0 + Duration::from_secs(6);
        h.session.start_challenge(thumbs_up(), t0);
        h.session.render_stream_frame(&h.frame, late, &h.overlay);
        assert_eq!(h.session.state(), VerificationState::Failure);

        let verdict = h.capture(late).unwrap();
        assert_eq!(verdict.time_up(), Some(true));
        assert_eq!(verdict.message, MSG_TIME_UP);
        assert_eq!(h.session.state(), VerificationState::Failure);
        assert_eq!(h.calls.classify.load(Ordering::SeqCst), 0);

        // Reported once; the failure is absorbing from here on.
        let err = h.capture(late).unwrap_err();
        assert_eq!(err, SessionError::ChallengeConcluded(VerificationState::Failure));
    }

    #[test]
    fn stream_and_capture_agree_at_exact_limit() {
        let limit = SessionConfig::default().challenge_duration;

        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        h.session.render_stream_frame(&h.frame, t0 + limit, &h.overlay);
        assert_eq!(h.session.state(), VerificationState::Waiting);
        assert!(h.capture(t0 + limit).unwrap().verified());

        let mut h = harness(true, known());
        h.session.start_challenge(thumbs_up(), t0);
        let past = t0 + limit + Duration::from_millis(1);
        h.session.render_stream_frame(&h.frame, past, &h.overlay);
        assert_eq!(h.session.state(), VerificationState::Failure);
        assert_eq!(h.capture(past).unwrap().time_up(), Some(true));
    }

    #[test]
    fn stream_render_never_overwrites_success() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        h.session.start_challenge(thumbs_up(), t0);
        assert!(h.capture(t0).unwrap().verified());
        h.session
            .render_stream_frame(&h.frame, t0 + Duration::from_secs(30), &h.overlay);
        assert_eq!(h.session.state(), VerificationState::Success);
    }

    #[test]
    fn stream_render_without_challenge_is_read_only() {
        let mut h = harness(true, known());
        h.session
            .render_stream_frame(&h.frame, Instant::now(), &h.overlay);
        assert_eq!(h.session.state(), VerificationState::Waiting);
        assert!(h.session.active().is_none());
    }

    #[test]
    fn snapshot_reports_remaining_time() {
        let mut h = harness(true, known());
        let t0 = Instant::now();
        assert!(h.session.snapshot(t0).gesture.is_none());
        h.session.start_challenge(thumbs_up(), t0);
        let snap = h.session.snapshot(t0 + Duration::from_secs(2));
        assert_eq!(snap.gesture, Some("thumbs_up"));
        assert_eq!(snap.time_limit, 5);
        assert!((snap.remaining_secs.unwrap() - 3.0).abs() < 1e-3);
    }
}
