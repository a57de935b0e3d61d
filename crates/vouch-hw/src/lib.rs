//! Frame sources for the verification daemon.
//!
//! A [`FrameSource`] hands out one RGB frame per call, already resized to
//! [`FRAME_WIDTH`]x[`FRAME_HEIGHT`]. Two implementations exist:
//!
//! - [`StillImageSource`] cycles through a directory of images. Useful for
//!   development and for exercising the daemon without a camera.
//! - `OpenCvCamera` (feature `opencv`) reads a webcam by index. It is a
//!   [`ReopeningSource`]: the device is re-opened lazily after a failure
//!   and released on drop.

use std::path::PathBuf;

use thiserror::Error;
use vouch_core::Frame;

pub mod reopen;
pub mod still;
#[cfg(feature = "opencv")]
pub mod webcam;

pub use reopen::{CaptureDevice, DeviceOpener, ReopeningSource};
pub use still::StillImageSource;
#[cfg(feature = "opencv")]
pub use webcam::OpenCvCamera;

pub const FRAME_WIDTH: u32 = 640;
pub const FRAME_HEIGHT: u32 = 480;

#[derive(Error, Debug)]
pub enum CameraError {
    #[error("failed to open camera {0}: {1}")]
    Open(String, String),
    #[error("failed to read frame: {0}")]
    Read(String),
    #[error("camera returned an empty frame")]
    EmptyFrame,
    #[error("failed to list {path}: {source}")]
    ListDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no readable images in {0}")]
    NoImages(PathBuf),
}

/// Anything that can produce frames on demand.
///
/// Calls block until a frame is available or the source fails. A failed
/// read does not poison the source; the next call may succeed.
pub trait FrameSource: Send {
    fn read_frame(&mut self) -> Result<Frame, CameraError>;

    /// Human-readable identifier for logs.
    fn describe(&self) -> String;
}
