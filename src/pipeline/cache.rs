use crate::frame::I420Frame;

/// Single-slot cache of the last successfully processed frame.
///
/// Storing replaces the previous frame wholesale; nothing mutates a cached
/// frame in place.
#[derive(Debug, Default)]
pub struct FrameCache {
    slot: Option<I420Frame>,
}

impl FrameCache {
    pub fn store(&mut self, frame: I420Frame) {
        self.slot = Some(frame);
    }

    /// A copy of the cached frame restamped for the frame it stands in for.
    pub fn replay(&self, timestamp_ns: i64) -> Option<I420Frame> {
        self.slot
            .as_ref()
            .map(|frame| frame.clone().with_timestamp(timestamp_ns))
    }

    pub fn invalidate(&mut self) {
        if let Some(mut frame) = self.slot.take() {
            frame.release();
        }
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }
}
