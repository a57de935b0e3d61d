use image::RgbImage;
use opencv::{
    core::{Mat, Size},
    imgproc,
    prelude::*,
    videoio::{VideoCapture, VideoCaptureAPIs},
};

use crate::reopen::{CaptureDevice, DeviceOpener, ReopeningSource};
use crate::{CameraError, FRAME_HEIGHT, FRAME_WIDTH};

/// Webcam opened by index through OpenCV, re-opened after a failed read.
pub type OpenCvCamera = ReopeningSource<WebcamIndex>;

impl ReopeningSource<WebcamIndex> {
    /// Open the device eagerly so startup fails fast on a missing camera.
    pub fn open(index: i32) -> Result<Self, CameraError> {
        ReopeningSource::new(WebcamIndex(index)).connect()
    }
}

/// Opens `/dev/video<N>` (or the platform equivalent) through videoio.
pub struct WebcamIndex(pub i32);

impl DeviceOpener for WebcamIndex {
    type Device = OpenCvDevice;

    fn open(&mut self) -> Result<OpenCvDevice, CameraError> {
        let index = self.0;
        let open_err = |e: opencv::Error| CameraError::Open(index.to_string(), e.to_string());
        let capture =
            VideoCapture::new(index, VideoCaptureAPIs::CAP_ANY as i32).map_err(open_err)?;
        if !capture.is_opened().map_err(open_err)? {
            return Err(CameraError::Open(
                index.to_string(),
                "device not available".into(),
            ));
        }
        Ok(OpenCvDevice { capture })
    }

    fn describe(&self) -> String {
        format!("webcam:{}", self.0)
    }
}

pub struct OpenCvDevice {
    capture: VideoCapture,
}

impl CaptureDevice for OpenCvDevice {
    fn grab(&mut self) -> Result<RgbImage, CameraError> {
        let mut bgr = Mat::default();
        self.capture
            .read(&mut bgr)
            .map_err(|e| CameraError::Read(e.to_string()))?;
        if bgr.empty() {
            return Err(CameraError::EmptyFrame);
        }

        let mut resized = Mat::default();
        imgproc::resize(
            &bgr,
            &mut resized,
            Size::new(FRAME_WIDTH as i32, FRAME_HEIGHT as i32),
            0.0,
            0.0,
            imgproc::INTER_LINEAR,
        )
        .map_err(|e| CameraError::Read(e.to_string()))?;

        let mut rgb = Mat::default();
        imgproc::cvt_color(&resized, &mut rgb, imgproc::COLOR_BGR2RGB, 0)
            .map_err(|e| CameraError::Read(e.to_string()))?;

        let bytes = rgb
            .data_bytes()
            .map_err(|e| CameraError::Read(e.to_string()))?;
        RgbImage::from_raw(FRAME_WIDTH, FRAME_HEIGHT, bytes.to_vec())
            .ok_or_else(|| CameraError::Read("unexpected frame buffer size".into()))
    }

    fn release(&mut self) -> Result<(), CameraError> {
        self.capture
            .release()
            .map_err(|e| CameraError::Read(e.to_string()))
    }
}
