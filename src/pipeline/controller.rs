use std::panic::{self, AssertUnwindSafe};
use std::path::Path;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use image::RgbaImage;

use super::breaker::CircuitBreaker;
use super::cache::FrameCache;
use super::clock::{Clock, SystemClock};
use super::control::{ControlHandle, Settings, Shared};
use super::memory::{self, MemoryProbe, NoProbe};
use super::mode::ProcessingMode;
use super::FrameProcessor;
use crate::composite::{fit_cover, Backdrop, BlurStrategy, Compositor, PlatformBlur};
use crate::config::PipelineConfig;
use crate::convert;
use crate::error::{FrameError, InitError};
use crate::frame::{I420Frame, Rotation};
use crate::mask::{fallback_mask, mask_to_rgba, MaskProcessor};
use crate::segmentation::{self, Segmenter};

/// Per-frame state. Only touched on the frame path, and by `stop()` once the
/// frame in flight has finished.
pub(crate) struct FrameState {
    epoch: u64,
    cache: FrameCache,
    breaker: CircuitBreaker,
    last_attempt: Option<Instant>,
    timestamps: Timestamps,
    background: FittedBackground,
    warned_missing_background: bool,
    timing: Timing,
}

impl FrameState {
    fn new(config: &PipelineConfig) -> Self {
        Self {
            epoch: 0,
            cache: FrameCache::default(),
            breaker: CircuitBreaker::new(config.failure_threshold, config.cooldown),
            last_attempt: None,
            timestamps: Timestamps::default(),
            background: FittedBackground::default(),
            warned_missing_background: false,
            timing: Timing::default(),
        }
    }

    pub(crate) fn clear(&mut self) {
        self.cache.invalidate();
        self.background.clear();
        self.breaker.reset();
        self.last_attempt = None;
    }
}

/// Classifier timestamps in ms, forced strictly increasing.
#[derive(Debug, Default)]
struct Timestamps {
    last_ms: Option<u64>,
}

impl Timestamps {
    fn next(&mut self, timestamp_ns: i64) -> u64 {
        let ms = u64::try_from(timestamp_ns).unwrap_or(0) / 1_000_000;
        let ms = match self.last_ms {
            Some(last) if ms <= last => last + 1,
            _ => ms,
        };
        self.last_ms = Some(ms);
        ms
    }
}

/// The virtual background cover-fitted to the current frame size.
#[derive(Default)]
struct FittedBackground {
    cached: Option<(Arc<RgbaImage>, RgbaImage)>,
}

impl FittedBackground {
    fn get(&mut self, source: &Arc<RgbaImage>, width: u32, height: u32) -> &RgbaImage {
        let fresh = matches!(
            &self.cached,
            Some((cached_source, fitted))
                if Arc::ptr_eq(cached_source, source) && fitted.dimensions() == (width, height)
        );
        if !fresh {
            tracing::debug!(
                "fitting {}x{} background to {width}x{height}",
                source.width(),
                source.height()
            );
            self.cached = None;
        }
        let (_, fitted) = self
            .cached
            .get_or_insert_with(|| (Arc::clone(source), fit_cover(source, width, height)));
        fitted
    }

    fn clear(&mut self) {
        self.cached = None;
    }
}

#[derive(Debug, Default)]
struct Timing {
    frames: u64,
    segmentation: Duration,
    total: Duration,
}

/// Builds a [`FramePipeline`].
pub struct PipelineBuilder {
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    memory: Box<dyn MemoryProbe>,
    platform_blur: Option<Arc<dyn PlatformBlur>>,
    classifier: Option<Box<dyn Segmenter>>,
    mode: ProcessingMode,
}

impl PipelineBuilder {
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn memory_probe(mut self, probe: Box<dyn MemoryProbe>) -> Self {
        self.memory = probe;
        self
    }

    /// Offer a platform blur primitive; whether it is used depends on the
    /// configured blur choice.
    pub fn platform_blur(mut self, blur: Arc<dyn PlatformBlur>) -> Self {
        self.platform_blur = Some(blur);
        self
    }

    pub fn classifier(mut self, classifier: Box<dyn Segmenter>) -> Self {
        self.classifier = Some(classifier);
        self
    }

    pub fn mode(mut self, mode: ProcessingMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn build(self) -> FramePipeline {
        let blur = BlurStrategy::select(
            self.config.blur_choice,
            self.platform_blur,
            self.config.blur,
        );
        let compositor = Compositor::new(blur, self.config.route);
        let masks = MaskProcessor::new(self.config.mask);

        let shared = Arc::new(Shared::new(FrameState::new(&self.config)));
        if let Some(classifier) = self.classifier {
            shared.classifier.install(classifier);
        }
        let pipeline = FramePipeline {
            shared,
            compositor,
            masks,
            config: self.config,
            clock: self.clock,
            memory: self.memory,
        };
        pipeline.control().set_mode(self.mode);
        pipeline
    }
}

/// Removes or replaces the background of each frame handed to it.
///
/// Runs synchronously on the frame thread; a [`ControlHandle`] changes
/// mode and background from elsewhere.
pub struct FramePipeline {
    shared: Arc<Shared>,
    compositor: Compositor,
    masks: MaskProcessor,
    config: PipelineConfig,
    clock: Arc<dyn Clock>,
    memory: Box<dyn MemoryProbe>,
}

impl FramePipeline {
    pub fn builder(config: PipelineConfig) -> PipelineBuilder {
        PipelineBuilder {
            config,
            clock: Arc::new(SystemClock),
            memory: Box::new(NoProbe),
            platform_blur: None,
            classifier: None,
            mode: ProcessingMode::Off,
        }
    }

    pub fn control(&self) -> ControlHandle {
        ControlHandle {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Load the bundled matting model. On failure the pipeline stays inert
    /// and every frame passes through.
    pub fn initialize(&self, model_path: &Path) -> Result<(), InitError> {
        if self.shared.is_stopped() {
            return Err(InitError::Stopped);
        }
        match segmentation::create_default_model(model_path) {
            Ok(classifier) => {
                self.shared.classifier.install(classifier);
                tracing::info!("classifier loaded from {}", model_path.display());
                Ok(())
            }
            Err(err) => {
                tracing::error!("classifier initialization failed: {err}");
                Err(err)
            }
        }
    }

    pub fn install_classifier(&self, classifier: Box<dyn Segmenter>) -> Result<(), InitError> {
        if self.shared.is_stopped() {
            return Err(InitError::Stopped);
        }
        self.shared.classifier.install(classifier);
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.shared.classifier.is_loaded()
    }

    /// Process one frame. Never fails: every error degrades to returning
    /// the input frame. While throttled the cached output is replayed, but
    /// only if the latest attempt succeeded; a failure empties the cache.
    pub fn process_frame(&self, frame: I420Frame) -> I420Frame {
        if self.shared.is_stopped() {
            return frame;
        }
        let settings = self.shared.snapshot();
        let mut state = self.shared.lock_frame();
        if self.shared.is_stopped() {
            return frame;
        }

        if state.epoch != settings.epoch {
            self.enter_epoch(&mut state, settings.epoch);
        }
        if self.shared.reset_requested.swap(false, Ordering::AcqRel) {
            state.breaker.reset();
        }

        if settings.mode == ProcessingMode::Off || !self.shared.classifier.is_loaded() {
            return frame;
        }

        let counters = &self.shared.counters;
        let now = self.clock.now();
        if let Some(last) = state.last_attempt {
            if now.saturating_duration_since(last) < self.config.min_interval {
                counters.skipped.fetch_add(1, Ordering::Relaxed);
                return match state.cache.replay(frame.timestamp_ns()) {
                    Some(cached) => cached,
                    None => frame,
                };
            }
        }

        if !state.breaker.allow(now) {
            counters.passthrough.fetch_add(1, Ordering::Relaxed);
            return frame;
        }
        state.last_attempt = Some(now);

        let started = Instant::now();
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            self.attempt(&frame, &settings, &mut state)
        }));
        match outcome {
            Ok(Ok(output)) => {
                state.breaker.record_success();
                state.cache.store(output.clone());
                counters.processed.fetch_add(1, Ordering::Relaxed);
                self.record_timing(&mut state, started.elapsed());
                output
            }
            Ok(Err(err)) => {
                tracing::warn!("frame processing failed, passing through: {err}");
                state.cache.invalidate();
                state.breaker.record_failure(now);
                counters.failed.fetch_add(1, Ordering::Relaxed);
                frame
            }
            Err(_) => {
                tracing::warn!("frame processing panicked, passing through");
                state.cache.invalidate();
                state.breaker.record_failure(now);
                counters.failed.fetch_add(1, Ordering::Relaxed);
                frame
            }
        }
    }

    fn enter_epoch(&self, state: &mut FrameState, epoch: u64) {
        tracing::debug!("settings changed (epoch {} -> {epoch})", state.epoch);
        state.clear();
        state.warned_missing_background = false;
        state.epoch = epoch;
        self.shared.classifier.reset_state();
    }

    fn attempt(
        &self,
        frame: &I420Frame,
        settings: &Settings,
        state: &mut FrameState,
    ) -> Result<I420Frame, FrameError> {
        let upright = convert::apply_rotation(convert::to_packed(frame)?, frame.rotation());
        let (width, height) = upright.dimensions();

        let mask = match memory::check_pressure(
            self.memory.as_ref(),
            self.config.memory_limit_percent,
        ) {
            Err(pressure) => {
                tracing::debug!("{pressure}, skipping segmentation for this frame");
                fallback_mask(width, height)
            }
            Ok(()) => {
                let timestamp_ms = state.timestamps.next(frame.timestamp_ns());
                let segment_started = Instant::now();
                let raw = {
                    let _span = tracing::debug_span!("segment", timestamp_ms).entered();
                    self.shared.classifier.segment(&upright, timestamp_ms)?
                };
                state.timing.segmentation += segment_started.elapsed();
                self.masks.process(raw.as_ref(), width, height)
            }
        };

        let composed = if self.config.show_matte {
            mask_to_rgba(&mask)
        } else {
            let backdrop = match (&settings.mode, &settings.background) {
                (ProcessingMode::VirtualBackground, Some(background)) => {
                    Backdrop::Image(state.background.get(background, width, height))
                }
                (ProcessingMode::VirtualBackground, None) => {
                    if !state.warned_missing_background {
                        tracing::warn!("no virtual background set, blurring instead");
                        state.warned_missing_background = true;
                    }
                    Backdrop::Blur
                }
                _ => Backdrop::Blur,
            };
            self.compositor.composite(&upright, backdrop, &mask)
        };

        Ok(convert::to_planar(&composed, frame.timestamp_ns(), Rotation::Deg0)?)
    }

    fn record_timing(&self, state: &mut FrameState, elapsed: Duration) {
        let timing = &mut state.timing;
        timing.frames += 1;
        timing.total += elapsed;

        let every = self.config.stats_every;
        if every == 0 || timing.frames % every != 0 {
            return;
        }
        let stats = self.control().stats();
        tracing::debug!(
            "avg segmentation {:.1}ms, avg total {:.1}ms over {} frames; skipped {}, passthrough {}, failed {}",
            timing.segmentation.as_secs_f64() * 1000.0 / every as f64,
            timing.total.as_secs_f64() * 1000.0 / every as f64,
            every,
            stats.skipped,
            stats.passthrough,
            stats.failed
        );
        timing.segmentation = Duration::ZERO;
        timing.total = Duration::ZERO;
    }
}

impl FrameProcessor for FramePipeline {
    fn on_frame(&mut self, frame: I420Frame) -> I420Frame {
        self.process_frame(frame)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    #[test]
    fn timestamps_strictly_increase() {
        let mut timestamps = Timestamps::default();
        assert_eq!(timestamps.next(5_000_000), 5);
        assert_eq!(timestamps.next(5_400_000), 6);
        assert_eq!(timestamps.next(-1), 7);
        assert_eq!(timestamps.next(40_000_000), 40);
    }

    #[test]
    fn fitted_background_is_reused_until_source_or_size_changes() {
        let mut fitted = FittedBackground::default();
        let source = Arc::new(RgbaImage::from_pixel(8, 8, Rgba([1, 2, 3, 255])));

        let first = fitted.get(&source, 4, 2).as_ptr();
        let second = fitted.get(&source, 4, 2).as_ptr();
        assert_eq!(first, second);

        assert_eq!(fitted.get(&source, 2, 4).dimensions(), (2, 4));

        let replacement = Arc::new(RgbaImage::from_pixel(8, 8, Rgba([9, 9, 9, 255])));
        assert_eq!(fitted.get(&replacement, 2, 4).get_pixel(0, 0).0, [9, 9, 9, 255]);
    }
}
