use std::sync::{Mutex, MutexGuard};

use image::RgbaImage;

use super::types::{RawMask, Segmenter};
use crate::error::ClassifierError;

/// Owns the one classifier instance shared across frames.
///
/// All access goes through [`ClassifierSlot::with`], which holds the lock for
/// the whole call, so the classifier is never entered concurrently.
/// [`ClassifierSlot::release`] waits for an in-flight call before dropping it.
#[derive(Default)]
pub struct ClassifierSlot {
    inner: Mutex<Option<Box<dyn Segmenter>>>,
}

impl ClassifierSlot {
    pub fn new(segmenter: Box<dyn Segmenter>) -> Self {
        Self {
            inner: Mutex::new(Some(segmenter)),
        }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Option<Box<dyn Segmenter>>> {
        // A panic inside a classifier call leaves the model usable for the next frame.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` with exclusive access to the classifier.
    pub fn with<R>(
        &self,
        f: impl FnOnce(&mut dyn Segmenter) -> Result<R, ClassifierError>,
    ) -> Result<R, ClassifierError> {
        let mut guard = self.lock();
        match guard.as_deref_mut() {
            Some(segmenter) => f(segmenter),
            None => Err(ClassifierError::NotInitialized),
        }
    }

    pub fn segment(
        &self,
        image: &RgbaImage,
        timestamp_ms: u64,
    ) -> Result<Option<RawMask>, ClassifierError> {
        self.with(|segmenter| segmenter.segment(image, timestamp_ms))
    }

    pub fn reset_state(&self) {
        if let Some(segmenter) = self.lock().as_deref_mut() {
            segmenter.reset_state();
        }
    }

    pub fn is_loaded(&self) -> bool {
        self.lock().is_some()
    }

    /// Swap in a new classifier, dropping the previous one.
    pub fn install(&self, segmenter: Box<dyn Segmenter>) {
        *self.lock() = Some(segmenter);
    }

    /// Drop the classifier. Releasing an empty slot is a no-op.
    pub fn release(&self) -> bool {
        let released = self.lock().take();
        released.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::segmentation::Polarity;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct Counting {
        active: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    }

    impl Segmenter for Counting {
        fn segment(
            &mut self,
            _image: &RgbaImage,
            _timestamp_ms: u64,
        ) -> Result<Option<RawMask>, ClassifierError> {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(std::time::Duration::from_millis(2));
            self.active.fetch_sub(1, Ordering::SeqCst);
            Ok(Some(RawMask::confidence(1, 1, vec![1.0], Polarity::SubjectHigh)))
        }
    }

    #[test]
    fn calls_never_overlap() {
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let slot = Arc::new(ClassifierSlot::new(Box::new(Counting {
            active: active.clone(),
            peak: peak.clone(),
        })));

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let slot = slot.clone();
                std::thread::spawn(move || {
                    let image = RgbaImage::new(1, 1);
                    for ts in 0..10 {
                        slot.segment(&image, ts).unwrap();
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(peak.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn released_slot_reports_not_initialized() {
        let slot = ClassifierSlot::empty();
        assert!(!slot.release());
        let err = slot.segment(&RgbaImage::new(1, 1), 0).unwrap_err();
        assert!(matches!(err, ClassifierError::NotInitialized));
    }
}
