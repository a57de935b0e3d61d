//! Lazy open / release-on-failure wrapper around a capture device.
//!
//! The device is opened on the first read (or eagerly through
//! [`ReopeningSource::connect`]). Any read error releases the device and
//! surfaces the error; the following read opens it again from scratch.
//! Dropping the source releases whatever is still open.

use image::imageops::{self, FilterType};
use image::RgbImage;
use vouch_core::Frame;

use crate::{CameraError, FrameSource, FRAME_HEIGHT, FRAME_WIDTH};

/// An opened capture device.
pub trait CaptureDevice: Send {
    fn grab(&mut self) -> Result<RgbImage, CameraError>;

    fn release(&mut self) -> Result<(), CameraError>;
}

/// Knows how to open one kind of capture device.
pub trait DeviceOpener: Send {
    type Device: CaptureDevice;

    fn open(&mut self) -> Result<Self::Device, CameraError>;

    fn describe(&self) -> String;
}

pub struct ReopeningSource<O: DeviceOpener> {
    opener: O,
    device: Option<O::Device>,
}

impl<O: DeviceOpener> ReopeningSource<O> {
    /// Wrap an opener without touching the device yet.
    pub fn new(opener: O) -> Self {
        Self {
            opener,
            device: None,
        }
    }

    /// Open the device now so a missing camera fails at startup.
    pub fn connect(mut self) -> Result<Self, CameraError> {
        self.ensure_open()?;
        Ok(self)
    }

    pub fn is_open(&self) -> bool {
        self.device.is_some()
    }

    fn ensure_open(&mut self) -> Result<&mut O::Device, CameraError> {
        if self.device.is_none() {
            let device = self.opener.open()?;
            tracing::info!(device = %self.opener.describe(), "capture device opened");
            self.device = Some(device);
        }
        self.device
            .as_mut()
            .ok_or_else(|| CameraError::Open(self.opener.describe(), "device not available".into()))
    }

    fn release(&mut self) {
        if let Some(mut device) = self.device.take() {
            match device.release() {
                Ok(()) => tracing::info!(device = %self.opener.describe(), "capture device released"),
                Err(e) => {
                    tracing::warn!(device = %self.opener.describe(), error = %e, "capture device release failed")
                }
            }
        }
    }
}

impl<O: DeviceOpener> FrameSource for ReopeningSource<O> {
    fn read_frame(&mut self) -> Result<Frame, CameraError> {
        let grabbed = self.ensure_open().and_then(|device| device.grab());
        match grabbed {
            Ok(raw) if raw.dimensions() == (FRAME_WIDTH, FRAME_HEIGHT) => Ok(Frame::new(raw)),
            Ok(raw) => Ok(Frame::new(imageops::resize(
                &raw,
                FRAME_WIDTH,
                FRAME_HEIGHT,
                FilterType::Triangle,
            ))),
            Err(e) => {
                tracing::warn!(device = %self.opener.describe(), error = %e, "frame read failed; will re-open");
                self.release();
                Err(e)
            }
        }
    }

    fn describe(&self) -> String {
        self.opener.describe()
    }
}

impl<O: DeviceOpener> Drop for ReopeningSource<O> {
    fn drop(&mut self) {
        self.release();
    }
}
