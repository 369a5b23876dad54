use super::FrameSource;
use crate::error::{Result, VisionError};
use image::{imageops, RgbImage};
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

const REQUESTED_FPS: u32 = 30;

fn capture_error(what: &str, err: impl std::fmt::Display) -> VisionError {
    VisionError::Capture(format!("{}: {}", what, err))
}

/// Live webcam stream. It never reports end of stream; stop it with a cancel token.
pub struct WebcamCapture {
    camera: Camera,
    size: (u32, u32),
}

impl WebcamCapture {
    /// Open device `device_index` and deliver frames scaled to `width` x `height`
    pub fn new(device_index: u32, width: u32, height: u32) -> Result<Self> {
        let _span = tracing::info_span!("webcam", device = device_index).entered();

        let wanted = CameraFormat::new(
            Resolution::new(width, height),
            FrameFormat::MJPEG,
            REQUESTED_FPS,
        );
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(CameraIndex::Index(device_index), requested)
            .map_err(|e| capture_error("cannot open camera", e))?;
        camera
            .open_stream()
            .map_err(|e| capture_error("cannot start stream", e))?;

        let native = camera.resolution();
        tracing::info!(
            "Camera streaming at {}x{}, frames scaled to {}x{}",
            native.width(),
            native.height(),
            width,
            height
        );

        Ok(Self {
            camera,
            size: (width, height),
        })
    }
}

impl FrameSource for WebcamCapture {
    fn next_frame(&mut self) -> Result<Option<RgbImage>> {
        let buffer = self
            .camera
            .frame()
            .map_err(|e| capture_error("frame grab failed", e))?;
        let decoded = buffer
            .decode_image::<RgbFormat>()
            .map_err(|e| capture_error("frame decode failed", e))?;

        if decoded.dimensions() == self.size {
            return Ok(Some(decoded));
        }
        let (width, height) = self.size;
        Ok(Some(imageops::resize(
            &decoded,
            width,
            height,
            imageops::FilterType::Triangle,
        )))
    }

    fn resolution(&self) -> Option<(u32, u32)> {
        Some(self.size)
    }
}

impl Drop for WebcamCapture {
    fn drop(&mut self) {
        if let Err(e) = self.camera.stop_stream() {
            tracing::warn!("Failed to stop camera stream: {}", e);
        }
    }
}
