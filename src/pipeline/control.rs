use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use image::RgbaImage;

use super::controller::FrameState;
use super::mode::ProcessingMode;
use crate::error::InitError;
use crate::segmentation::ClassifierSlot;

/// What the control thread has asked for. Replaced wholesale on every
/// change; the frame thread reads one snapshot per frame.
#[derive(Debug, Default)]
pub(crate) struct Settings {
    pub mode: ProcessingMode,
    pub background: Option<Arc<RgbaImage>>,
    /// Bumped on every change that must invalidate per-mode state.
    pub epoch: u64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub processed: AtomicU64,
    pub skipped: AtomicU64,
    pub passthrough: AtomicU64,
    pub failed: AtomicU64,
}

/// State shared between the frame thread and the control thread.
pub(crate) struct Shared {
    settings: Mutex<Arc<Settings>>,
    pub classifier: ClassifierSlot,
    frame: Mutex<FrameState>,
    pub reset_requested: AtomicBool,
    pub stopped: AtomicBool,
    pub counters: Counters,
}

impl Shared {
    pub fn new(frame: FrameState) -> Self {
        Self {
            settings: Mutex::new(Arc::new(Settings::default())),
            classifier: ClassifierSlot::empty(),
            frame: Mutex::new(frame),
            reset_requested: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
            counters: Counters::default(),
        }
    }

    pub fn snapshot(&self) -> Arc<Settings> {
        Arc::clone(&self.settings.lock().unwrap_or_else(|p| p.into_inner()))
    }

    /// Held for the whole per-frame path, so holding it elsewhere waits out
    /// any frame in flight.
    pub fn lock_frame(&self) -> MutexGuard<'_, FrameState> {
        self.frame.lock().unwrap_or_else(|p| p.into_inner())
    }

    fn update(&self, f: impl FnOnce(&Settings) -> Settings) {
        let mut guard = self.settings.lock().unwrap_or_else(|p| p.into_inner());
        let next = f(&guard);
        *guard = Arc::new(next);
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }
}

/// Counters since the pipeline was built.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PipelineStats {
    /// Frames that went through segmentation and compositing.
    pub processed: u64,
    /// Frames answered from the cache (or passed through) by the throttle.
    pub skipped: u64,
    /// Frames passed through while the circuit breaker was open.
    pub passthrough: u64,
    pub failed: u64,
}

/// Cloneable handle for the control thread.
#[derive(Clone)]
pub struct ControlHandle {
    pub(crate) shared: Arc<Shared>,
}

impl ControlHandle {
    pub fn mode(&self) -> ProcessingMode {
        self.shared.snapshot().mode
    }

    pub fn has_background(&self) -> bool {
        self.shared.snapshot().background.is_some()
    }

    /// Switch modes. Takes effect on the next frame; switching to the
    /// current mode is a no-op.
    pub fn set_mode(&self, mode: ProcessingMode) {
        if self.shared.is_stopped() {
            tracing::warn!("ignoring mode change to {mode}: pipeline is stopped");
            return;
        }
        let mut changed = false;
        self.shared.update(|current| {
            changed = current.mode != mode;
            Settings {
                mode,
                background: current.background.clone(),
                epoch: current.epoch + u64::from(changed),
            }
        });
        if changed {
            tracing::info!("processing mode set to {mode}");
        }
    }

    /// Replace the virtual background. `Some` also switches to
    /// virtual-background mode; `None` clears the image and keeps the mode.
    pub fn set_background(&self, image: Option<RgbaImage>) {
        if self.shared.is_stopped() {
            tracing::warn!("ignoring background change: pipeline is stopped");
            return;
        }
        let image = image.filter(|img| img.width() > 0 && img.height() > 0);
        match &image {
            Some(img) => tracing::info!(
                "virtual background set ({}x{})",
                img.width(),
                img.height()
            ),
            None => tracing::info!("virtual background cleared"),
        }
        self.shared.update(|current| Settings {
            mode: if image.is_some() {
                ProcessingMode::VirtualBackground
            } else {
                current.mode
            },
            background: image.map(Arc::new),
            epoch: current.epoch + 1,
        });
    }

    pub fn set_background_from_path(&self, path: &Path) -> Result<(), InitError> {
        let image = image::open(path)
            .map_err(|source| InitError::Background {
                path: path.to_path_buf(),
                source,
            })?
            .to_rgba8();
        self.set_background(Some(image));
        Ok(())
    }

    /// Clear the failure counter and close the breaker before the next frame.
    pub fn reset_failures(&self) {
        self.shared.reset_requested.store(true, Ordering::Release);
        tracing::info!("failure counter reset requested");
    }

    pub fn stats(&self) -> PipelineStats {
        let counters = &self.shared.counters;
        PipelineStats {
            processed: counters.processed.load(Ordering::Relaxed),
            skipped: counters.skipped.load(Ordering::Relaxed),
            passthrough: counters.passthrough.load(Ordering::Relaxed),
            failed: counters.failed.load(Ordering::Relaxed),
        }
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.is_stopped()
    }

    /// Tear the pipeline down. Blocks until a frame in flight has finished,
    /// then drops the cached frame, the background and the classifier.
    /// Every later frame passes through unmodified.
    pub fn stop(&self) {
        if self.shared.stopped.swap(true, Ordering::AcqRel) {
            return;
        }
        {
            let mut frame = self.shared.lock_frame();
            frame.clear();
        }
        let released = self.shared.classifier.release();
        self.shared.update(|current| Settings {
            mode: ProcessingMode::Off,
            background: None,
            epoch: current.epoch + 1,
        });
        tracing::info!("pipeline stopped (classifier released: {released})");
    }
}
