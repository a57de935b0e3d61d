//! Blocking client for a hosted zero-shot image classifier.
//!
//! The request carries the frame as base64 JPEG plus the candidate labels;
//! the response must be a JSON array of `{label, score}` objects. Anything
//! else fails closed with a typed [`ClassifierError`].

use std::time::Duration;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};
use vouch_core::frame::JPEG_QUALITY;
use vouch_core::{encode_jpeg, ClassifierError, Frame, GestureClassifier, LabelScore};

#[derive(Serialize)]
struct Parameters<'a> {
    candidate_labels: &'a [&'a str],
}

#[derive(Serialize)]
struct ClassifyRequest<'a> {
    inputs: String,
    parameters: Parameters<'a>,
}

/// Body the inference service returns while the model is being loaded.
#[derive(Deserialize)]
struct LoadingBody {
    estimated_time: Option<f32>,
}

pub struct HttpClassifier {
    agent: ureq::Agent,
    url: String,
    token: Option<String>,
}

impl HttpClassifier {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .timeout_global(Some(timeout))
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            url: url.into(),
            token,
        }
    }
}

impl GestureClassifier for HttpClassifier {
    fn classify(&mut self, frame: &Frame, labels: &[&str]) -> Result<Vec<LabelScore>, ClassifierError> {
        let jpeg = encode_jpeg(&frame.image, JPEG_QUALITY)
            .map_err(|e| ClassifierError::Encode(e.to_string()))?;
        let payload = ClassifyRequest {
            inputs: STANDARD.encode(jpeg),
            parameters: Parameters {
                candidate_labels: labels,
            },
        };

        let mut request = self.agent.post(&self.url);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {token}"));
        }

        let started = std::time::Instant::now();
        let mut response = request
            .send_json(&payload)
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;
        let status = response.status().as_u16();
        let body = response
            .body_mut()
            .read_to_string()
            .map_err(|e| ClassifierError::Transport(e.to_string()))?;

        tracing::debug!(
            status,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "classifier responded"
        );
        interpret_response(status, &body)
    }
}

/// Map an HTTP status and body onto predictions or a typed error.
pub fn interpret_response(status: u16, body: &str) -> Result<Vec<LabelScore>, ClassifierError> {
    match status {
        200..=299 => serde_json::from_str::<Vec<LabelScore>>(body)
            .map_err(|e| ClassifierError::Malformed(e.to_string())),
        503 => {
            let estimated_secs = serde_json::from_str::<LoadingBody>(body)
                .ok()
                .and_then(|b| b.estimated_time);
            Err(ClassifierError::Loading { estimated_secs })
        }
        429 => Err(ClassifierError::RateLimited),
        other => Err(ClassifierError::Status(other)),
    }
}
