mod v4l_capture;

pub use v4l_capture::WebcamCapture;

use anyhow::Result;

use crate::frame::I420Frame;

/// Delivers transport frames, one per call.
pub trait CaptureSource {
    fn next_frame(&mut self) -> Result<I420Frame>;

    /// Resolution of delivered frames before rotation.
    fn resolution(&self) -> (u32, u32);
}
