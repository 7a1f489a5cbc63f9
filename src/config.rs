use std::time::Duration;

use crate::composite::{BlurChoice, BlurSettings, CompositeRoute};
use crate::mask::MaskSettings;

/// Tunables for the frame pipeline. Defaults match the values the
/// pipeline was tuned with; the binary overrides a subset from the
/// command line.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Minimum spacing between segmentation attempts.
    pub min_interval: Duration,
    /// Consecutive failures before processing is suspended.
    pub failure_threshold: u32,
    /// How long processing stays suspended.
    pub cooldown: Duration,
    pub mask: MaskSettings,
    pub blur_choice: BlurChoice,
    pub blur: BlurSettings,
    pub route: CompositeRoute,
    /// Above this share of used system memory the classifier is skipped.
    pub memory_limit_percent: f64,
    /// Log a stats line every this many processed frames; 0 disables it.
    pub stats_every: u64,
    /// Emit the alpha mask instead of the composite.
    pub show_matte: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_interval: Duration::from_millis(50),
            failure_threshold: 5,
            cooldown: Duration::from_secs(2),
            mask: MaskSettings::default(),
            blur_choice: BlurChoice::default(),
            blur: BlurSettings::default(),
            route: CompositeRoute::default(),
            memory_limit_percent: 95.0,
            stats_every: 300,
            show_matte: false,
        }
    }
}
