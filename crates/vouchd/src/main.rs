use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use vouch_core::{Backends, FaceAnalyzer, IdentityMatcher, KnownIdentityStore, OverlayRenderer};
use vouch_hw::{FrameSource, StillImageSource};

mod classifier;
mod config;
mod engine;
mod http;

use classifier::HttpClassifier;
use config::Config;
use engine::EngineParts;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    tracing::info!(version = env!("CARGO_PKG_VERSION"), "vouchd starting");

    let config = Config::from_env();

    // Open the frame source and load models synchronously (fail-fast)
    let source = frame_source(&config)?;
    tracing::info!(source = %source.describe(), "frame source ready");

    let mut analyzer = face_analyzer(&config)?;

    let identities = KnownIdentityStore::load_dir(
        &config.known_faces_dir,
        analyzer.as_mut(),
        config.match_metric,
        config.match_tolerance,
    )
    .with_context(|| {
        format!(
            "failed to load known identities from {}",
            config.known_faces_dir.display()
        )
    })?;
    if identities.is_empty() {
        tracing::warn!(
            dir = %config.known_faces_dir.display(),
            "no known identities loaded; every capture will be rejected"
        );
    }

    if config.classifier_token.is_none() {
        tracing::warn!("VOUCH_CLASSIFIER_TOKEN not set; classifier requests are unauthenticated");
    }
    let classifier = HttpClassifier::new(
        config.classifier_url.clone(),
        config.classifier_token.clone(),
        Duration::from_secs(config.classifier_timeout_secs),
    );

    let (engine, engine_thread) = engine::spawn_engine(EngineParts {
        source,
        backends: Backends {
            analyzer,
            identities: Box::new(identities),
            classifier: Box::new(classifier),
        },
        overlay: OverlayRenderer::load(config.font_path.as_deref()),
        session: config.session_config(),
        gesture_image_dir: config.gesture_image_dir.clone(),
        warmup_frames: config.warmup_frames,
    })?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = http::router(http::AppState {
        engine: engine.clone(),
        stream_interval: config.stream_interval(),
        shutdown: shutdown_rx,
    });

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;
    tracing::info!(addr = %config.bind_addr, "vouchd ready");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            // Open MJPEG streams never finish on their own
            let _ = shutdown_tx.send(true);
        })
        .await
        .context("HTTP server failed")?;

    engine.shutdown().await;
    tokio::task::spawn_blocking(move || engine_thread.join())
        .await
        .context("failed to wait for engine thread")?
        .map_err(|_| anyhow::anyhow!("engine thread panicked"))?;

    tracing::info!("vouchd stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("vouchd shutting down");
}

fn frame_source(config: &Config) -> Result<Box<dyn FrameSource>> {
    if let Some(dir) = &config.frame_dir {
        let source = StillImageSource::open(dir)
            .with_context(|| format!("failed to open frame directory {}", dir.display()))?;
        return Ok(Box::new(source));
    }
    open_webcam(config.camera_index)
}

#[cfg(feature = "opencv")]
fn open_webcam(index: i32) -> Result<Box<dyn FrameSource>> {
    let camera = vouch_hw::OpenCvCamera::open(index)
        .with_context(|| format!("failed to open webcam {index}"))?;
    Ok(Box::new(camera))
}

#[cfg(not(feature = "opencv"))]
fn open_webcam(_index: i32) -> Result<Box<dyn FrameSource>> {
    anyhow::bail!("no VOUCH_FRAME_DIR set and vouchd was built without webcam support (enable the `opencv` feature)")
}

#[cfg(feature = "onnx")]
fn face_analyzer(config: &Config) -> Result<Box<dyn FaceAnalyzer>> {
    if config.verify_models {
        vouch_models::verify_models_dir(&config.model_dir)
            .context("model integrity check failed; run `vouch setup`")?;
        tracing::info!(dir = %config.model_dir.display(), "model checksums verified");
    }
    let analyzer = vouch_core::onnx::OnnxFaceAnalyzer::load(
        &config.detector_model_path(),
        &config.recognizer_model_path(),
        &config.landmark_model_path(),
    )?;
    Ok(Box::new(analyzer))
}

#[cfg(not(feature = "onnx"))]
fn face_analyzer(_config: &Config) -> Result<Box<dyn FaceAnalyzer>> {
    anyhow::bail!("vouchd was built without a face analysis backend (enable the `onnx` feature)")
}
