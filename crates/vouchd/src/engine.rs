use std::path::{Path, PathBuf};
use std::thread::JoinHandle;
use std::time::Instant;

use chrono::{DateTime, Utc};
use image::RgbImage;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;
use vouch_core::frame::JPEG_QUALITY;
use vouch_core::{
    encode_jpeg, Backends, Frame, Gesture, OverlayRenderer, SessionConfig, SessionError,
    SessionSnapshot, Verdict, VerificationSession,
};
use vouch_hw::{CameraError, FrameSource, FRAME_HEIGHT, FRAME_WIDTH};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("camera error: {0}")]
    Camera(#[from] CameraError),
    #[error(transparent)]
    Session(#[from] SessionError),
    #[error("image encoding failed: {0}")]
    Encode(#[from] image::ImageError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// A freshly issued challenge plus its preview assets.
#[derive(Debug)]
pub struct ChallengeIssued {
    pub id: Uuid,
    pub gesture: &'static Gesture,
    pub issued_at: DateTime<Utc>,
    pub time_limit_secs: u64,
    /// JPEG of the gesture reference picture.
    pub reference_jpeg: Vec<u8>,
    /// JPEG of the white description card.
    pub card_jpeg: Vec<u8>,
}

/// Session snapshot plus engine-level facts.
#[derive(Debug)]
pub struct StatusReport {
    pub session: SessionSnapshot,
    pub known_identities: usize,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Challenge {
        reply: oneshot::Sender<Result<ChallengeIssued, EngineError>>,
    },
    Capture {
        reply: oneshot::Sender<Result<Verdict, EngineError>>,
    },
    StreamFrame {
        reply: oneshot::Sender<Result<Vec<u8>, EngineError>>,
    },
    Status {
        reply: oneshot::Sender<StatusReport>,
    },
    Shutdown,
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Pick a random gesture and restart the session around it.
    pub async fn challenge(&self) -> Result<ChallengeIssued, EngineError> {
        self.request(|reply| EngineRequest::Challenge { reply }).await?
    }

    /// Grab the current frame and run the full verification sequence on it.
    pub async fn capture(&self) -> Result<Verdict, EngineError> {
        self.request(|reply| EngineRequest::Capture { reply }).await?
    }

    /// Grab the current frame, annotate it and return it as JPEG.
    pub async fn stream_frame(&self) -> Result<Vec<u8>, EngineError> {
        self.request(|reply| EngineRequest::StreamFrame { reply }).await?
    }

    pub async fn status(&self) -> Result<StatusReport, EngineError> {
        self.request(|reply| EngineRequest::Status { reply }).await
    }

    /// Ask the engine to release its resources and exit.
    pub async fn shutdown(&self) {
        if self.tx.send(EngineRequest::Shutdown).await.is_err() {
            tracing::debug!("engine already stopped");
        }
    }
}

/// Everything the engine thread owns.
pub struct EngineParts {
    pub source: Box<dyn FrameSource>,
    pub backends: Backends,
    pub overlay: OverlayRenderer,
    pub session: SessionConfig,
    /// Directory searched for `<gesture>.jpg` reference pictures.
    pub gesture_image_dir: PathBuf,
    pub warmup_frames: usize,
}

/// Spawn the engine on a dedicated OS thread.
///
/// Discards warmup frames, then enters a request loop that serialises
/// every session operation. The returned join handle completes once the
/// engine has dropped its frame source.
pub fn spawn_engine(parts: EngineParts) -> Result<(EngineHandle, JoinHandle<()>), EngineError> {
    let EngineParts {
        mut source,
        mut backends,
        overlay,
        session,
        gesture_image_dir,
        warmup_frames,
    } = parts;

    // Discard warmup frames for camera AGC/AE stabilization
    if warmup_frames > 0 {
        tracing::info!(count = warmup_frames, source = %source.describe(), "discarding warmup frames");
        for _ in 0..warmup_frames {
            let _ = source.read_frame();
        }
    }

    let (tx, mut rx) = mpsc::channel::<EngineRequest>(8);

    let join = std::thread::Builder::new()
        .name("vouch-engine".into())
        .spawn(move || {
            tracing::info!(
                known_identities = backends.identities.len(),
                "engine thread started"
            );
            let mut session = VerificationSession::new(session);
            let mut rng = rand::thread_rng();

            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Challenge { reply } => {
                        let result =
                            run_challenge(&mut session, &mut rng, &overlay, &gesture_image_dir);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Capture { reply } => {
                        let result =
                            run_capture(&mut session, source.as_mut(), &mut backends, &overlay);
                        let _ = reply.send(result);
                    }
                    EngineRequest::StreamFrame { reply } => {
                        let result = run_stream_frame(&mut session, source.as_mut(), &overlay);
                        let _ = reply.send(result);
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(StatusReport {
                            session: session.snapshot(Instant::now()),
                            known_identities: backends.identities.len(),
                        });
                    }
                    EngineRequest::Shutdown => break,
                }
            }

            tracing::info!(source = %source.describe(), "engine thread exiting, releasing frame source");
            drop(source);
        })
        .map_err(EngineError::Spawn)?;

    Ok((EngineHandle { tx }, join))
}

fn grab_frame(source: &mut dyn FrameSource) -> Result<Frame, EngineError> {
    Ok(source.read_frame()?.resized(FRAME_WIDTH, FRAME_HEIGHT))
}

fn run_challenge(
    session: &mut VerificationSession,
    rng: &mut impl rand::Rng,
    overlay: &OverlayRenderer,
    gesture_image_dir: &Path,
) -> Result<ChallengeIssued, EngineError> {
    let challenge = session.issue_challenge(rng, Instant::now()).clone();
    let gesture = challenge.gesture;

    Ok(ChallengeIssued {
        id: challenge.id,
        gesture,
        issued_at: challenge.issued_at,
        time_limit_secs: session.config().challenge_duration.as_secs(),
        reference_jpeg: reference_jpeg(gesture, gesture_image_dir)?,
        card_jpeg: encode_jpeg(&overlay.description_card(gesture), JPEG_QUALITY)?,
    })
}

/// Stored `<name>.jpg` when present, otherwise a drawing of the key points.
fn reference_jpeg(gesture: &Gesture, dir: &Path) -> Result<Vec<u8>, EngineError> {
    let path = dir.join(format!("{}.jpg", gesture.name));
    match std::fs::read(&path) {
        Ok(bytes) => Ok(bytes),
        Err(e) => {
            tracing::debug!(path = %path.display(), error = %e, "rendering reference image");
            let image: RgbImage = OverlayRenderer::reference_image(gesture);
            Ok(encode_jpeg(&image, JPEG_QUALITY)?)
        }
    }
}

fn run_capture(
    session: &mut VerificationSession,
    source: &mut dyn FrameSource,
    backends: &mut Backends,
    overlay: &OverlayRenderer,
) -> Result<Verdict, EngineError> {
    // Reject before touching the camera when no challenge can be answered
    session.capturable()?;

    let frame = grab_frame(source).inspect_err(|e| {
        tracing::error!(error = %e, "capture: could not read frame");
    })?;
    Ok(session.capture_and_verify(&frame, Instant::now(), backends, overlay)?)
}

fn run_stream_frame(
    session: &mut VerificationSession,
    source: &mut dyn FrameSource,
    overlay: &OverlayRenderer,
) -> Result<Vec<u8>, EngineError> {
    let frame = grab_frame(source)?;
    let annotated = session.render_stream_frame(&frame, Instant::now(), overlay);
    tracing::trace!(state = ?session.state(), "stream frame rendered");
    Ok(encode_jpeg(&annotated, JPEG_QUALITY)?)
}
