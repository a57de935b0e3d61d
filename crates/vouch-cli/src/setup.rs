//! `vouch setup`: downloads the ONNX models used for face detection, recognition and landmarks.

use anyhow::{bail, Context, Result};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use vouch_models::{default_model_dir, ModelError, ModelFile, MODELS};

/// What to do with a file that is already on disk.
#[derive(Debug, PartialEq, Eq)]
enum Existing {
    Keep,
    Replace(&'static str),
}

fn check_existing(model: &ModelFile, path: &Path) -> Existing {
    match model.check(path) {
        Ok(()) => Existing::Keep,
        Err(ModelError::Mismatch { .. }) => Existing::Replace("checksum differs"),
        Err(ModelError::Empty { .. }) => Existing::Replace("file is empty"),
        Err(_) => Existing::Replace("unreadable"),
    }
}

/// Download a single model file with progress output.
fn download_model(model: &ModelFile, dest: &Path) -> Result<()> {
    let tmp_path = dest.with_extension("onnx.part");

    println!("  downloading {} ({})...", model.name, model.size);

    let resp = ureq::get(model.url)
        .call()
        .with_context(|| format!("failed to download {}", model.url))?;

    let content_length = resp
        .headers()
        .get("Content-Length")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok());

    let mut reader = resp.into_body().into_reader();
    let mut file = fs::File::create(&tmp_path)
        .with_context(|| format!("failed to create {}", tmp_path.display()))?;

    let mut buf = [0u8; 65536];
    let mut total: u64 = 0;
    let mut last_pct: u64 = 0;

    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        file.write_all(&buf[..n])?;
        total += n as u64;

        // Print progress every 10%
        if let Some(len) = content_length.filter(|l| *l > 0) {
            let pct = (total * 100) / len;
            if pct / 10 > last_pct / 10 {
                print!("  {pct}%\r");
                io::stdout().flush().ok();
                last_pct = pct;
            }
        }
    }

    file.flush()?;
    drop(file);

    if model.is_pinned() {
        print!("  verifying checksum... ");
        io::stdout().flush().ok();
    }
    if let Err(e) = model.check(&tmp_path) {
        fs::remove_file(&tmp_path).ok();
        bail!("downloaded file rejected: {e}");
    }
    if model.is_pinned() {
        println!("ok");
    } else {
        println!("  {} has no pinned checksum; kept {total} bytes", model.name);
    }

    // Atomic rename
    fs::rename(&tmp_path, dest).with_context(|| {
        format!(
            "failed to rename {} -> {}",
            tmp_path.display(),
            dest.display()
        )
    })?;

    Ok(())
}

/// Run the setup command: download and verify ONNX models.
pub fn run(model_dir: Option<PathBuf>) -> Result<()> {
    let dir = model_dir.unwrap_or_else(default_model_dir);

    println!("Model directory: {}", dir.display());

    fs::create_dir_all(&dir)
        .with_context(|| format!("failed to create directory {}", dir.display()))?;

    let mut downloaded = 0;
    let mut skipped = 0;

    for model in MODELS {
        let dest = dir.join(model.name);
        if dest.exists() {
            match check_existing(model, &dest) {
                Existing::Keep => {
                    println!("  {} already present", model.name);
                    skipped += 1;
                    continue;
                }
                Existing::Replace(reason) => {
                    println!("  {} exists but {reason}; re-downloading", model.name);
                }
            }
        }

        download_model(model, &dest)?;
        downloaded += 1;
    }

    println!();
    if downloaded > 0 {
        println!("Setup complete: {downloaded} model(s) downloaded, {skipped} already present.");
    } else {
        println!("All models already present. Nothing to download.");
    }

    Ok(())
}
