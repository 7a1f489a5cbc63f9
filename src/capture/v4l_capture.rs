use std::time::Instant;

use anyhow::{Context, Result};
use image::DynamicImage;
use nokhwa::pixel_format::RgbFormat;
use nokhwa::utils::{
    CameraFormat, CameraIndex, FrameFormat, RequestedFormat, RequestedFormatType, Resolution,
};
use nokhwa::Camera;

use super::CaptureSource;
use crate::convert;
use crate::frame::{I420Frame, Rotation};

/// Webcam capture that hands frames over in the planar transport layout,
/// tagged with a capture timestamp and the mounting rotation.
pub struct WebcamCapture {
    camera: Camera,
    width: u32,
    height: u32,
    rotation: Rotation,
    started: Instant,
}

impl WebcamCapture {
    pub fn new(
        device_index: u32,
        width: u32,
        height: u32,
        fps: u32,
        rotation: Rotation,
    ) -> Result<Self> {
        tracing::info!(
            "Opening webcam {} at {}x{} ({} fps, rotated {}°)",
            device_index,
            width,
            height,
            fps,
            rotation.degrees()
        );

        let index = CameraIndex::Index(device_index);
        let wanted = CameraFormat::new(Resolution::new(width, height), FrameFormat::MJPEG, fps);
        let requested = RequestedFormat::new::<RgbFormat>(RequestedFormatType::Closest(wanted));

        let mut camera = Camera::new(index, requested).context("Failed to open camera")?;
        camera
            .open_stream()
            .context("Failed to open camera stream")?;

        let actual = camera.resolution();
        if (actual.width(), actual.height()) != (width, height) {
            tracing::warn!(
                "Camera delivers {}x{} instead of {}x{}",
                actual.width(),
                actual.height(),
                width,
                height
            );
        }

        Ok(Self {
            camera,
            width: actual.width(),
            height: actual.height(),
            rotation,
            started: Instant::now(),
        })
    }
}

impl CaptureSource for WebcamCapture {
    fn next_frame(&mut self) -> Result<I420Frame> {
        let buffer = self.camera.frame().context("Failed to capture frame")?;
        let timestamp_ns = i64::try_from(self.started.elapsed().as_nanos()).unwrap_or(i64::MAX);

        let decoded = buffer
            .decode_image::<RgbFormat>()
            .context("Failed to decode frame")?;
        let rgba = DynamicImage::ImageRgb8(decoded).to_rgba8();

        convert::to_planar(&rgba, timestamp_ns, self.rotation)
            .context("Failed to convert captured frame")
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}
