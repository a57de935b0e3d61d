//! HTTP surface: MJPEG preview, challenge issue, capture and status.
//!
//! Handlers are thin: each one forwards to the engine thread and maps the
//! answer onto JSON. All routes allow cross-origin access.

use std::convert::Infallible;
use std::time::Duration;

use axum::body::Body;
use axum::extract::State;
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tokio::sync::watch;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use uuid::Uuid;
use vouch_core::frame::JPEG_QUALITY;
use vouch_core::{encode_jpeg, SessionError, SessionSnapshot, Verdict};

use crate::engine::{ChallengeIssued, EngineError, EngineHandle, StatusReport};

pub const MJPEG_BOUNDARY: &str = "frame";

#[derive(Clone)]
pub struct AppState {
    pub engine: EngineHandle,
    pub stream_interval: Duration,
    /// Flips to `true` when the daemon is shutting down; ends open streams.
    pub shutdown: watch::Receiver<bool>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/video_feed", get(video_feed))
        .route("/get_gesture", get(get_gesture))
        .route("/capture", post(capture))
        .route("/status", get(status))
        .with_state(state)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
}

// ── Responses ──

#[derive(Serialize)]
pub struct GestureResponse {
    pub gesture_name: &'static str,
    pub gesture_description: &'static str,
    pub gesture_prompt: &'static str,
    /// Base64 JPEG reference picture.
    pub gesture_image: String,
    /// Base64 JPEG description card.
    pub description_image: String,
    pub time_limit: u64,
    pub challenge_id: Uuid,
    pub issued_at: DateTime<Utc>,
}

impl From<ChallengeIssued> for GestureResponse {
    fn from(c: ChallengeIssued) -> Self {
        Self {
            gesture_name: c.gesture.name,
            gesture_description: c.gesture.description,
            gesture_prompt: c.gesture.prompt,
            gesture_image: STANDARD.encode(&c.reference_jpeg),
            description_image: STANDARD.encode(&c.card_jpeg),
            time_limit: c.time_limit_secs,
            challenge_id: c.id,
            issued_at: c.issued_at,
        }
    }
}

#[derive(Serialize)]
pub struct CaptureResponse {
    pub verified: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time_up: Option<bool>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub retry: bool,
    /// Base64 JPEG of the capture annotated with the classifier's scores.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diagnostics_image: Option<String>,
}

impl From<&Verdict> for CaptureResponse {
    fn from(v: &Verdict) -> Self {
        Self {
            verified: v.verified(),
            message: v.message.clone(),
            time_up: v.time_up(),
            retry: v.retry(),
            diagnostics_image: v.annotated.as_ref().and_then(|image| {
                match encode_jpeg(image, JPEG_QUALITY) {
                    Ok(jpeg) => Some(STANDARD.encode(jpeg)),
                    Err(e) => {
                        tracing::warn!(error = %e, "dropping gesture diagnostics image");
                        None
                    }
                }
            }),
        }
    }
}

#[derive(Serialize)]
pub struct StatusResponse {
    #[serde(flatten)]
    pub session: SessionSnapshot,
    pub known_identities: usize,
}

impl From<StatusReport> for StatusResponse {
    fn from(r: StatusReport) -> Self {
        Self {
            session: r.session,
            known_identities: r.known_identities,
        }
    }
}

/// Engine failure rendered as an HTTP error.
pub struct ApiError(EngineError);

impl From<EngineError> for ApiError {
    fn from(e: EngineError) -> Self {
        Self(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match &self.0 {
            EngineError::Session(SessionError::NoActiveChallenge) => (
                StatusCode::CONFLICT,
                json!({
                    "verified": false,
                    "error": "No gesture challenge in progress; request one from /get_gesture",
                    "code": "no_active_challenge",
                }),
            ),
            EngineError::Session(e @ SessionError::ChallengeConcluded(_)) => (
                StatusCode::CONFLICT,
                json!({
                    "verified": false,
                    "error": e.to_string(),
                    "code": "challenge_concluded",
                }),
            ),
            EngineError::Camera(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "verified": false, "error": "Could not capture frame" }),
            ),
            EngineError::ChannelClosed | EngineError::Spawn(_) => (
                StatusCode::SERVICE_UNAVAILABLE,
                json!({ "verified": false, "error": "Verification engine unavailable" }),
            ),
            EngineError::Encode(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                json!({ "verified": false, "error": "Could not encode image" }),
            ),
        };
        tracing::warn!(status = status.as_u16(), error = %self.0, "request failed");
        (status, Json(body)).into_response()
    }
}

// ── Handlers ──

async fn get_gesture(State(state): State<AppState>) -> Result<Json<GestureResponse>, ApiError> {
    let issued = state.engine.challenge().await?;
    Ok(Json(issued.into()))
}

async fn capture(State(state): State<AppState>) -> Result<Json<CaptureResponse>, ApiError> {
    let verdict = state.engine.capture().await?;
    Ok(Json(CaptureResponse::from(&verdict)))
}

async fn status(State(state): State<AppState>) -> Result<Json<StatusResponse>, ApiError> {
    let report = state.engine.status().await?;
    Ok(Json(report.into()))
}

/// Wrap one JPEG in a multipart part delimited by [`MJPEG_BOUNDARY`].
pub fn mjpeg_part(jpeg: &[u8]) -> Bytes {
    let header = format!(
        "--{MJPEG_BOUNDARY}\r\nContent-Type: image/jpeg\r\nContent-Length: {}\r\n\r\n",
        jpeg.len()
    );
    let mut part = Vec::with_capacity(header.len() + jpeg.len() + 2);
    part.extend_from_slice(header.as_bytes());
    part.extend_from_slice(jpeg);
    part.extend_from_slice(b"\r\n");
    Bytes::from(part)
}

async fn video_feed(State(state): State<AppState>) -> Response {
    let AppState {
        engine,
        stream_interval,
        mut shutdown,
    } = state;

    let stream = async_stream::stream! {
        let mut ticker = tokio::time::interval(stream_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        tracing::debug!("video stream opened");

        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            match engine.stream_frame().await {
                Ok(jpeg) => yield Ok::<_, Infallible>(mjpeg_part(&jpeg)),
                Err(EngineError::ChannelClosed) => break,
                Err(e) => tracing::warn!(error = %e, "stream frame skipped"),
            }
        }
        tracing::debug!("video stream closed");
    };

    (
        [(
            header::CONTENT_TYPE,
            format!("multipart/x-mixed-replace; boundary={MJPEG_BOUNDARY}"),
        )],
        Body::from_stream(stream),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::tests::{fixture, fixture_with, short_challenge, Fixture};
    use axum::http::Request;
    use http_body_util::BodyExt;
    use tower::ServiceExt;

    fn app(f: &Fixture) -> (Router, watch::Sender<bool>) {
        let (tx, rx) = watch::channel(false);
        let router = router(AppState {
            engine: f.handle.clone(),
            stream_interval: Duration::from_millis(10),
            shutdown: rx,
        });
        (router, tx)
    }

    async fn json_body(resp: Response) -> serde_json::Value {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    fn post_req(uri: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap()
    }

    #[tokio::test]
    async fn capture_without_challenge_is_conflict() {
        let f = fixture(false);
        let (app, _tx) = app(&f);

        let resp = app.oneshot(post_req("/capture")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = json_body(resp).await;
        assert_eq!(body["verified"], false);
        assert_eq!(body["code"], "no_active_challenge");

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn gesture_then_capture_round_trip() {
        let f = fixture(false);
        let (app, _tx) = app(&f);

        let resp = app.clone().oneshot(get_req("/get_gesture")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        let name = body["gesture_name"].as_str().unwrap().to_string();
        assert!(vouch_core::gesture::find(&name).is_some());
        assert_eq!(body["time_limit"], 5);
        for key in ["gesture_description", "gesture_prompt", "challenge_id", "issued_at"] {
            assert!(body[key].is_string(), "missing {key}");
        }
        let card = STANDARD
            .decode(body["description_image"].as_str().unwrap())
            .unwrap();
        assert_eq!(&card[..2], &[0xFF, 0xD8]);

        // Classifier reports some other gesture
        let wrong = vouch_core::gesture::catalog()
            .iter()
            .find(|g| g.name != name)
            .unwrap();
        *f.label.lock().unwrap() = Some(wrong.name.to_string());

        let resp = app.clone().oneshot(post_req("/capture")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["verified"], false);
        assert_eq!(body["message"], "Gesture verification failed");
        assert_eq!(body["time_up"], false);
        assert!(body.get("retry").is_none());
        let diagnostics = STANDARD
            .decode(body["diagnostics_image"].as_str().unwrap())
            .unwrap();
        assert_eq!(&diagnostics[..2], &[0xFF, 0xD8]);

        let resp = app.oneshot(get_req("/status")).await.unwrap();
        let body = json_body(resp).await;
        assert_eq!(body["state"], "failure");
        assert_eq!(body["gesture"], name.as_str());
        assert_eq!(body["face_verified"], true);
        assert_eq!(body["known_identities"], 1);

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn late_capture_while_streaming_reports_time_up() {
        let f = fixture_with(false, short_challenge());
        let (app, _tx) = app(&f);

        app.clone().oneshot(get_req("/get_gesture")).await.unwrap();
        tokio::time::sleep(Duration::from_millis(120)).await;
        f.handle.stream_frame().await.unwrap();

        let resp = app.oneshot(post_req("/capture")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["verified"], false);
        assert_eq!(body["time_up"], true);
        assert_eq!(body["message"], "Time's up! Gesture verification failed.");
        assert!(body.get("diagnostics_image").is_none());

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn classifier_warming_up_asks_for_retry() {
        let f = fixture(false);
        let (app, _tx) = app(&f);

        app.clone().oneshot(get_req("/get_gesture")).await.unwrap();
        let resp = app.oneshot(post_req("/capture")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json_body(resp).await;
        assert_eq!(body["verified"], false);
        assert_eq!(body["retry"], true);

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn camera_failure_is_service_unavailable() {
        let f = fixture(true);
        let (app, _tx) = app(&f);

        app.clone().oneshot(get_req("/get_gesture")).await.unwrap();
        let resp = app.oneshot(post_req("/capture")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let body = json_body(resp).await;
        assert_eq!(body["error"], "Could not capture frame");

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn cors_headers_present() {
        let f = fixture(false);
        let (app, _tx) = app(&f);

        let req = Request::builder()
            .uri("/status")
            .header("Origin", "http://example.test")
            .body(Body::empty())
            .unwrap();
        let resp = app.oneshot(req).await.unwrap();
        assert_eq!(
            resp.headers()
                .get("access-control-allow-origin")
                .map(|v| v.to_str().unwrap()),
            Some("*")
        );

        f.handle.shutdown().await;
    }

    #[tokio::test]
    async fn video_feed_streams_jpeg_parts_until_shutdown() {
        let f = fixture(false);
        let (app, tx) = app(&f);

        let resp = app.oneshot(get_req("/video_feed")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()[header::CONTENT_TYPE],
            "multipart/x-mixed-replace; boundary=frame"
        );

        let mut body = resp.into_body();
        let first = body.frame().await.unwrap().unwrap().into_data().unwrap();
        assert!(first.starts_with(b"--frame\r\nContent-Type: image/jpeg\r\n"));

        tx.send(true).unwrap();
        // Drain whatever was in flight; the stream must then end
        while let Some(frame) = body.frame().await {
            frame.unwrap();
        }

        f.handle.shutdown().await;
    }

    #[test]
    fn mjpeg_part_layout() {
        let part = mjpeg_part(&[0xFF, 0xD8, 0xFF, 0xD9]);
        let expected_head = b"--frame\r\nContent-Type: image/jpeg\r\nContent-Length: 4\r\n\r\n";
        assert!(part.starts_with(expected_head));
        assert!(part.ends_with(&[0xFF, 0xD8, 0xFF, 0xD9, b'\r', b'\n']));
    }
}
