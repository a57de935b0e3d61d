//! Thin HTTP client for a running `vouchd`.

use std::path::Path;

use anyhow::{bail, Context, Result};
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde_json::Value;

pub struct Client {
    agent: ureq::Agent,
    base: String,
}

impl Client {
    pub fn new(base: &str) -> Self {
        // Error bodies carry the explanation, so statuses are not turned into errors
        let agent: ureq::Agent = ureq::Agent::config_builder()
            .http_status_as_error(false)
            .build()
            .into();
        Self {
            agent,
            base: base.trim_end_matches('/').to_string(),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    fn read(url: &str, mut resp: ureq::http::Response<ureq::Body>) -> Result<(u16, Value)> {
        let status = resp.status().as_u16();
        tracing::debug!(url, status, "daemon responded");
        let body: Value = resp
            .body_mut()
            .read_json()
            .context("daemon returned a non-JSON body")?;
        Ok((status, body))
    }

    pub fn get(&self, path: &str) -> Result<(u16, Value)> {
        let url = self.url(path);
        let resp = self
            .agent
            .get(&url)
            .call()
            .with_context(|| format!("failed to reach {url}"))?;
        Self::read(&url, resp)
    }

    pub fn post(&self, path: &str) -> Result<(u16, Value)> {
        let url = self.url(path);
        let resp = self
            .agent
            .post(&url)
            .send_empty()
            .with_context(|| format!("failed to reach {url}"))?;
        Self::read(&url, resp)
    }
}

/// `vouch challenge`: request a gesture and optionally save its preview images.
pub fn challenge(client: &Client, save_dir: Option<&Path>) -> Result<()> {
    let (status, body) = client.get("/get_gesture")?;
    if status != 200 {
        bail!("challenge request failed ({status}): {}", error_text(&body));
    }

    println!("Gesture:     {}", text(&body, "gesture_name"));
    println!("Prompt:      {}", text(&body, "gesture_prompt"));
    println!("Description: {}", text(&body, "gesture_description"));
    println!("Time limit:  {}s", body["time_limit"]);

    if let Some(dir) = save_dir {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
        let name = text(&body, "gesture_name");
        for (field, file) in [
            ("gesture_image", format!("{name}.jpg")),
            ("description_image", format!("{name}_description.jpg")),
        ] {
            let bytes = STANDARD
                .decode(text(&body, field))
                .with_context(|| format!("{field} is not valid base64"))?;
            let path = dir.join(file);
            std::fs::write(&path, bytes)
                .with_context(|| format!("failed to write {}", path.display()))?;
            println!("Saved {}", path.display());
        }
    }
    Ok(())
}

/// `vouch capture`: run one verification; returns whether it passed.
pub fn capture(client: &Client) -> Result<bool> {
    let (status, body) = client.post("/capture")?;
    match status {
        200 => {
            let verified = body["verified"].as_bool().unwrap_or(false);
            println!(
                "{} {}",
                if verified { "VERIFIED" } else { "REJECTED" },
                text(&body, "message")
            );
            if body["time_up"] == Value::Bool(true) {
                println!("The challenge timed out; request a new gesture.");
            }
            if body["retry"] == Value::Bool(true) {
                println!("The classifier is not ready yet; capture again shortly.");
            }
            Ok(verified)
        }
        _ => bail!("capture failed ({status}): {}", error_text(&body)),
    }
}

/// `vouch status`: print the daemon's session snapshot.
pub fn status(client: &Client) -> Result<()> {
    let (status, body) = client.get("/status")?;
    if status != 200 {
        bail!("status request failed ({status}): {}", error_text(&body));
    }
    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}

fn text<'a>(body: &'a Value, key: &str) -> &'a str {
    body[key].as_str().unwrap_or("")
}

fn error_text(body: &Value) -> String {
    match (body["error"].as_str(), body["code"].as_str()) {
        (Some(e), Some(code)) => format!("{e} [{code}]"),
        (Some(e), None) => e.to_string(),
        _ => body.to_string(),
    }
}
