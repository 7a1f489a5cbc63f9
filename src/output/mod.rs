mod loopback;

pub use loopback::V4L2Output;

use anyhow::Result;

use crate::frame::I420Frame;

/// Consumes transport frames.
pub trait OutputSink {
    fn write_frame(&mut self, frame: &I420Frame) -> Result<()>;

    fn resolution(&self) -> (u32, u32);
}
