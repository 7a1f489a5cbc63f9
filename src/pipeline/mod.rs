//! Frame pipeline controller: mode dispatch, throttling, circuit breaker
//! and the last-good-frame cache.

mod breaker;
mod cache;
mod clock;
mod control;
mod controller;
mod memory;
mod mode;

pub use breaker::CircuitBreaker;
pub use cache::FrameCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use control::{ControlHandle, PipelineStats};
pub use controller::{FramePipeline, PipelineBuilder};
pub use memory::{check_pressure, MemoryProbe, NoProbe, ProcMeminfo};
pub use mode::ProcessingMode;

use crate::frame::I420Frame;

/// Anything that sits in the transport's frame path: takes ownership of a
/// frame and hands one back.
pub trait FrameProcessor {
    fn on_frame(&mut self, frame: I420Frame) -> I420Frame;
}
