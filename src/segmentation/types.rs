use image::RgbaImage;

use crate::error::ClassifierError;

/// Which end of the value range a classifier uses for the person.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Polarity {
    /// Larger values mean "subject" (alpha-matte convention).
    #[default]
    SubjectHigh,
    /// Larger values mean "background" (MediaPipe selfie masks: 0 = person).
    SubjectLow,
}

/// The encodings a classifier may hand back.
#[derive(Debug, Clone, PartialEq)]
pub enum RawMaskData {
    /// Discrete class ids; pixels equal to `subject` are the person.
    Category { codes: Vec<u8>, subject: u8 },
    /// Continuous confidence in `[0, 1]`.
    Confidence { values: Vec<f32>, polarity: Polarity },
    /// Confidence quantized to a byte, `0..=255`.
    Alpha { values: Vec<u8>, polarity: Polarity },
}

/// Classifier output at its native resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct RawMask {
    pub width: u32,
    pub height: u32,
    pub data: RawMaskData,
}

impl RawMask {
    pub fn confidence(width: u32, height: u32, values: Vec<f32>, polarity: Polarity) -> Self {
        Self {
            width,
            height,
            data: RawMaskData::Confidence { values, polarity },
        }
    }

    pub fn category(width: u32, height: u32, codes: Vec<u8>, subject: u8) -> Self {
        Self {
            width,
            height,
            data: RawMaskData::Category { codes, subject },
        }
    }

    pub fn alpha(width: u32, height: u32, values: Vec<u8>, polarity: Polarity) -> Self {
        Self {
            width,
            height,
            data: RawMaskData::Alpha { values, polarity },
        }
    }

    /// Number of samples carried, whatever the encoding.
    pub fn len(&self) -> usize {
        match &self.data {
            RawMaskData::Category { codes, .. } => codes.len(),
            RawMaskData::Confidence { values, .. } => values.len(),
            RawMaskData::Alpha { values, .. } => values.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A person/background classifier consumed as a black box.
///
/// Implementations are not required to be reentrant; the pipeline never
/// calls `segment` concurrently.
pub trait Segmenter: Send {
    /// Classify `image`. `timestamp_ms` increases strictly between calls.
    ///
    /// `Ok(None)` means the classifier ran but produced nothing usable.
    fn segment(
        &mut self,
        image: &RgbaImage,
        timestamp_ms: u64,
    ) -> Result<Option<RawMask>, ClassifierError>;

    /// Reset internal state (for models with temporal/recurrent components)
    ///
    /// Call this when:
    /// - Switching modes
    /// - Scene cuts detected
    /// - Starting a new video session
    fn reset_state(&mut self) {}
}
