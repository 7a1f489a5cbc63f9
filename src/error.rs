use std::path::PathBuf;

use thiserror::Error;

/// Failures while moving pixels between the planar transport layout and
/// the packed layout used for segmentation and compositing.
#[derive(Debug, Error)]
pub enum ConversionError {
    #[error("frame has zero-sized dimensions ({width}x{height})")]
    EmptyFrame { width: u32, height: u32 },

    #[error("{plane} plane holds {actual} bytes, need at least {required} (stride {stride})")]
    ShortPlane {
        plane: &'static str,
        stride: usize,
        required: usize,
        actual: usize,
    },

    #[error("{plane} plane stride {stride} is narrower than its row width {row}")]
    BadStride {
        plane: &'static str,
        stride: usize,
        row: usize,
    },

    #[error("frame buffer was already released")]
    Released,

    #[error(transparent)]
    Exhausted(#[from] ResourceExhaustionError),
}

/// Failures at the classifier boundary.
#[derive(Debug, Error)]
pub enum ClassifierError {
    #[error("classifier is not initialized")]
    NotInitialized,

    #[error("classifier invocation failed: {0:#}")]
    Invocation(anyhow::Error),

    #[error("classifier output is malformed: {0}")]
    MalformedOutput(String),
}

#[derive(Debug, Error)]
pub enum ResourceExhaustionError {
    #[error("failed to allocate {bytes} bytes for {what}")]
    Allocation { what: &'static str, bytes: usize },

    #[error("memory usage at {used_percent:.1}% exceeds the {limit_percent:.1}% limit")]
    MemoryPressure { used_percent: f64, limit_percent: f64 },
}

/// Any failure inside a single per-frame attempt. These never leave the
/// pipeline: the controller logs them and degrades to passthrough.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("pixel conversion failed: {0}")]
    Conversion(#[from] ConversionError),

    #[error("segmentation failed: {0}")]
    Classifier(#[from] ClassifierError),

    #[error("resources exhausted: {0}")]
    Exhausted(#[from] ResourceExhaustionError),
}

/// Setup failures, surfaced once to whoever initializes the pipeline.
#[derive(Debug, Error)]
pub enum InitError {
    #[error("model asset not found at {}", .0.display())]
    ModelNotFound(PathBuf),

    #[error("failed to construct classifier from {}: {reason:#}", .path.display())]
    Classifier { path: PathBuf, reason: anyhow::Error },

    #[error("failed to load background image from {}: {source}", .path.display())]
    Background {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },

    #[error("pipeline has been stopped")]
    Stopped,
}

/// Attempt to allocate a zeroed byte buffer, reporting failure instead of aborting.
pub(crate) fn try_alloc<T: Clone + Default>(
    what: &'static str,
    len: usize,
) -> Result<Vec<T>, ResourceExhaustionError> {
    let mut buf = Vec::new();
    buf.try_reserve_exact(len)
        .map_err(|_| ResourceExhaustionError::Allocation {
            what,
            bytes: len.saturating_mul(std::mem::size_of::<T>()),
        })?;
    buf.resize(len, T::default());
    Ok(buf)
}
